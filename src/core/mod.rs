// Domain-layer modules and shared errors/models
pub mod pipeline {
    pub use crate::dedup::*;
    pub use crate::dispatch::*;
    pub use crate::inbound::*;
    pub use crate::ingestion::*;
    pub use crate::rate_limiter::*;
    pub use crate::scheduler::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
