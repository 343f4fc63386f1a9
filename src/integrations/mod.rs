//! External service integrations.

pub mod gateway_client {
    pub use crate::gateway_client::*;
}

pub mod webhook_models {
    pub use crate::webhook_models::*;
}
