/// Bulk import and campaign scheduling through `POST /leads/bulk`.
mod common;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use common::{post_json, read_json, spawn_app, user_token, TestApp};

fn app_with_user() -> (TestApp, Uuid, String) {
    let app = spawn_app("http://gateway.invalid");
    let tenant = Uuid::new_v4();
    let user = app.store.add_profile(tenant, true);
    let token = user_token(user.id);
    (app, tenant, token)
}

async fn bulk(app: &TestApp, token: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .router
        .clone()
        .oneshot(post_json("/leads/bulk", Some(token), &body))
        .await
        .unwrap();
    read_json(response).await
}

#[tokio::test]
async fn test_bulk_with_duplicate_schedules_campaign_for_new_leads() {
    let (app, tenant, token) = app_with_user();
    app.store.seed_lead(tenant, "Existente", "5511911111111");

    let before = Utc::now();
    let (status, body) = bulk(
        &app,
        &token,
        json!({
            "leads": [
                {"name": "Ana", "phone": "+55 11 92222-2222"},
                {"name": "Bruno", "phone": "+55 11 91111-1111"},
                {"name": "Carla", "phone": "5511933333333", "email": "carla@example.com"}
            ],
            "auto_prospect": true,
            "message_template": "Olá {{nome}} & bem-vindo",
            "campaign_name": "Lançamento",
            "delay_seconds": 15
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["results"]["success"], 2);
    assert_eq!(body["results"]["duplicates"], 1);
    assert_eq!(body["results"]["errors"], 0);

    let campaign_id: Uuid = body["campaign_id"].as_str().unwrap().parse().unwrap();
    let campaign = app.store.campaign(campaign_id).unwrap();
    assert_eq!(campaign.status, "scheduled");
    assert_eq!(campaign.name, "Lançamento");
    assert_eq!(campaign.total_leads, 2);
    assert_eq!(campaign.delay_seconds, 15);
    assert_eq!(campaign.message_template, "Olá {{nome}} &amp; bem-vindo");

    let rows = app.store.campaign_messages(campaign_id);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == "scheduled"));
    assert!((rows[0].scheduled_at - before).num_seconds().abs() <= 5);
    assert_eq!((rows[1].scheduled_at - rows[0].scheduled_at).num_seconds(), 15);

    // Leads in batch order: Ana then Carla
    let leads = app.store.leads();
    let ana = leads.iter().find(|l| l.name == "Ana").unwrap();
    let carla = leads.iter().find(|l| l.name == "Carla").unwrap();
    assert_eq!(rows[0].lead_id, ana.id);
    assert_eq!(rows[1].lead_id, carla.id);
    assert_eq!(ana.source, "import");
}

#[tokio::test]
async fn test_bulk_without_auto_prospect_creates_no_campaign() {
    let (app, _, token) = app_with_user();

    let (status, body) = bulk(
        &app,
        &token,
        json!({"leads": [{"name": "Ana", "phone": "5511922222222"}]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["success"], 1);
    assert!(body.get("campaign_id").is_none());
    assert!(app.store.campaigns().is_empty());
}

#[tokio::test]
async fn test_invalid_rows_are_counted_and_batch_continues() {
    let (app, _, token) = app_with_user();

    let (status, body) = bulk(
        &app,
        &token,
        json!({"leads": [
            {"name": "Ana", "phone": "5511922222222"},
            {"name": "Sem telefone"},
            {"phone": "5511933333333"},
            {"name": "Duda", "phone": "5511944444444", "email": "bad-email"},
            {"name": "Eva", "phone": "5511955555555"}
        ]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["success"], 2);
    assert_eq!(body["results"]["errors"], 3);
    let details: Vec<String> = body["results"]["error_details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d.as_str().unwrap().to_string())
        .collect();
    assert_eq!(details.len(), 3);
    assert!(details[0].starts_with("Linha 2:"));
    assert!(details[1].starts_with("Linha 3:"));
    assert!(details[2].starts_with("Linha 4:"));
    assert_eq!(app.store.leads().len(), 2);
}

#[tokio::test]
async fn test_row_storage_failure_reports_generic_detail() {
    let (app, _, token) = app_with_user();
    app.store.fail_lead_inserts.store(true, Ordering::SeqCst);

    let (status, body) = bulk(
        &app,
        &token,
        json!({"leads": [{"name": "Ana", "phone": "5511922222222"}]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["errors"], 1);
    assert_eq!(body["results"]["error_details"][0], "Linha 1: database error");
    assert!(!body.to_string().contains("pool timed out"));
}

#[tokio::test]
async fn test_oversized_batch_is_rejected_before_any_row() {
    let (app, _, token) = app_with_user();
    let rows: Vec<Value> = (0..101)
        .map(|i| json!({"name": format!("Lead {}", i), "phone": format!("55119{:08}", i)}))
        .collect();

    let (status, _) = bulk(&app, &token, json!({"leads": rows})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.leads().is_empty());

    let (status, _) = bulk(&app, &token, json!({"leads": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_script_template_is_rejected_before_persistence() {
    let (app, _, token) = app_with_user();

    let (status, body) = bulk(
        &app,
        &token,
        json!({
            "leads": [{"name": "Ana", "phone": "5511922222222"}],
            "auto_prospect": true,
            "message_template": "Oi <SCRIPT>alert(1)</SCRIPT>"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"][0]["field"], "message_template");
    assert!(app.store.leads().is_empty());
    assert!(app.store.campaigns().is_empty());
}

#[tokio::test]
async fn test_auto_prospect_requires_template_and_valid_delay() {
    let (app, _, token) = app_with_user();
    let leads = json!([{"name": "Ana", "phone": "5511922222222"}]);

    let (status, _) = bulk(&app, &token, json!({"leads": leads, "auto_prospect": true})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = bulk(
        &app,
        &token,
        json!({"leads": leads, "auto_prospect": true, "message_template": "Oi", "delay_seconds": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"][0]["field"], "delay_seconds");
    assert!(app.store.leads().is_empty());
}

#[tokio::test]
async fn test_default_campaign_name_and_delay() {
    let (app, _, token) = app_with_user();

    let (_, body) = bulk(
        &app,
        &token,
        json!({
            "leads": [
                {"name": "Ana", "phone": "5511922222222"},
                {"name": "Bia", "phone": "5511933333333"}
            ],
            "auto_prospect": true,
            "message_template": "Oi {{nome}}"
        }),
    )
    .await;

    let campaign_id: Uuid = body["campaign_id"].as_str().unwrap().parse().unwrap();
    let campaign = app.store.campaign(campaign_id).unwrap();
    assert!(campaign.name.starts_with("Campanha "));
    assert_eq!(campaign.delay_seconds, 30);
    let rows = app.store.campaign_messages(campaign_id);
    assert_eq!((rows[1].scheduled_at - rows[0].scheduled_at).num_seconds(), 30);
}

#[tokio::test]
async fn test_campaign_failure_surfaces_warning_and_keeps_leads() {
    let (app, _, token) = app_with_user();
    app.store.fail_campaigns.store(true, Ordering::SeqCst);

    let (status, body) = bulk(
        &app,
        &token,
        json!({
            "leads": [{"name": "Ana", "phone": "5511922222222"}],
            "auto_prospect": true,
            "message_template": "Oi"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"]["success"], 1);
    assert!(body.get("campaign_id").is_none());
    let warning = body["campaign_warning"].as_str().unwrap();
    assert_eq!(warning, "Campaign was not created: database error");
    assert!(!warning.contains("pool timed out"));
    assert_eq!(app.store.leads().len(), 1);
}

#[tokio::test]
async fn test_bulk_requires_active_user() {
    let app = spawn_app("http://gateway.invalid");
    let body = json!({"leads": [{"name": "Ana", "phone": "5511922222222"}]});

    let (status, _) = bulk(&app, "not-a-jwt", body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let inactive = app.store.add_profile(Uuid::new_v4(), false);
    let (status, _) = bulk(&app, &user_token(inactive.id), body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = bulk(&app, &user_token(Uuid::new_v4()), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.store.leads().is_empty());
}

#[tokio::test]
async fn test_bulk_is_rate_limited_per_user() {
    let (app, tenant, token) = app_with_user();

    for _ in 0..10 {
        let (status, _) = bulk(&app, &token, json!({"leads": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _) = bulk(&app, &token, json!({"leads": []})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // A different user in the same tenant has its own budget
    let other = app.store.add_profile(tenant, true);
    let (status, _) = bulk(&app, &user_token(other.id), json!({"leads": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
