//! tests/api_tests.rs
//! Endpoints HTTP montados sobre servicios con proveedores falsos.

use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};

use super::support::{test_day, FakeMode, Harness};
use crate::app;

macro_rules! init_app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($h.quota.clone()))
                .app_data(web::Data::new($h.contacts.clone()))
                .app_data(web::Data::new($h.campaigns.clone()))
                .app_data(web::Data::new($h.newsletter.clone()))
                .app_data(web::Data::new($h.sms.clone()))
                .configure(app::init_app),
        )
        .await
    };
}

#[actix_web::test]
async fn test_quota_endpoint_reports_today() {
    let h = Harness::new().await;
    let app = init_app!(h);

    let req = test::TestRequest::get().uri("/api/quota/email").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["channel"], "email");
    assert_eq!(body["date"], "2025-03-10");
    assert_eq!(body["used"], 0);
    assert_eq!(body["limit"], 100);
    assert_eq!(body["available"], 100);
}

#[actix_web::test]
async fn test_send_without_contacts_is_unprocessable() {
    let h = Harness::new().await;
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/campaigns/email")
        .set_json(json!({"subject": "Hola", "content": "<p>Hola</p>"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("consentimiento"));
    assert!(body.get("campaign_id").is_none());
}

#[actix_web::test]
async fn test_contact_then_campaign_round_trip() {
    let h = Harness::new().await;
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/contacts")
        .set_json(json!({
            "name": "Ana",
            "marketing_consent": true,
            "emails": ["ana@example.com"]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri("/api/campaigns/email")
        .set_json(json!({"subject": "Hola {{name}}", "content": "<p>Hola {{name}}</p>"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["sent_count"], 1);
    let id = body["campaign_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/campaigns/{}", id))
        .to_request();
    let campaign: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(campaign["kind"], "email");
    assert_eq!(campaign["sent_count"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/api/campaigns/{}/logs", id))
        .to_request();
    let logs: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(logs.as_array().unwrap().len(), 1);
    assert_eq!(logs[0]["status"], "sent");

    let req = test::TestRequest::get().uri("/api/campaigns").to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["items"][0]["id"], id.as_str());
}

#[actix_web::test]
async fn test_invalid_contact_is_bad_request() {
    let h = Harness::new().await;
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/contacts")
        .set_json(json!({"name": "Ana", "emails": ["no-es-email"]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("no-es-email"));
}

#[actix_web::test]
async fn test_contact_storage_failure_is_internal_error() {
    let h = Harness::new().await;
    let app = init_app!(h);

    sqlx::query("DROP TABLE contact_phones")
        .execute(&h.pool)
        .await
        .unwrap();

    let req = test::TestRequest::post()
        .uri("/api/contacts")
        .set_json(json!({"name": "Ana", "phones": ["809 555 0001"]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // no se filtran detalles de la DB
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    let message = body["message"].as_str().unwrap();
    assert!(!message.contains("contact_phones"));
    assert!(!message.contains("SQL"));
}

#[actix_web::test]
async fn test_unknown_campaign_is_not_found() {
    let h = Harness::new().await;
    let app = init_app!(h);

    let req = test::TestRequest::get().uri("/api/campaigns/nada").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // continuar SMS sin cuerpo
    let req = test::TestRequest::post()
        .uri("/api/campaigns/sms/nada/continue")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn test_sms_estimate_endpoint() {
    let h = Harness::new().await;
    h.seed_contacts(2).await;
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/campaigns/sms/estimate")
        .set_json(json!({"message": "Hola {{name}}"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["estimate"]["recipients"], 2);
    assert_eq!(body["estimate"]["segments_per_message"], 1);
    assert_eq!(body["estimate"]["encoding"], "gsm7");
}

#[actix_web::test]
async fn test_sms_at_night_is_rejected_over_http() {
    let h = Harness::new().await;
    h.seed_contacts(1).await;
    h.clock.set(test_day(), 21, 15);
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/campaigns/sms")
        .set_json(json!({"message": "Hola"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("21:15"));
}

#[actix_web::test]
async fn test_provider_failure_reports_failed_campaign() {
    let h = Harness::new().await;
    h.seed_contacts(2).await;
    h.email_provider.set_mode(FakeMode::TotalFailure);
    let app = init_app!(h);

    let req = test::TestRequest::post()
        .uri("/api/campaigns/email")
        .set_json(json!({"subject": "Hola", "content": "<p>Hola</p>"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "failed");
    assert!(body["campaign_id"].is_string());
}
