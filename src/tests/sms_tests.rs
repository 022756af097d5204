//! tests/sms_tests.rs
//! Campañas de SMS: ventana horaria, modo prueba, estimación y fallas.

use std::collections::HashSet;

use actix_rt::test;
use chrono::Duration;

use super::support::{
    sms_req, test_config, test_day, FakeEmailProvider, FakeMode, FakeSmsProvider, Harness,
};
use crate::config::campaign_config::CampaignConfig;
use crate::errors::CampaignError;
use crate::models::campaign_model::{CampaignKind, CampaignStatus, RecipientLogStatus};
use crate::models::contact_model::CreateContactRequest;
use crate::models::delivery_model::{SmsEncoding, SmsSender};
use crate::models::quota_model::QuotaChannel;

#[test]
async fn test_sms_campaign_sends_to_normalized_numbers() {
    let h = Harness::new().await;
    h.seed_contacts(3).await;

    let resp = h
        .sms
        .send_sms_campaign(sms_req("Hola {{name}}, 20% en todo"))
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.sent_count, Some(3));
    assert_eq!(resp.status, Some(CampaignStatus::Completed));

    let estimate = resp.estimate.expect("estimación");
    assert_eq!(estimate.recipients, 3);
    assert_eq!(estimate.segments_per_message, 1);

    let sent = h.sms_provider.sent.lock().unwrap().clone();
    assert_eq!(sent[0].to, "+18095550000");
    assert_eq!(sent[0].body, "Hola Cliente 0, 20% en todo");
    assert_eq!(sent[0].sender, SmsSender::From("+15550001111".to_string()));

    let id = resp.campaign_id.unwrap();
    let campaign = h.campaigns.get_campaign(&id).await.unwrap().unwrap();
    assert_eq!(campaign.kind, CampaignKind::Sms);
    assert!(campaign.subject.is_none());
    assert_eq!(campaign.name, "SMS 2025-03-10");

    let sms_quota = h.quota.current_status(QuotaChannel::Sms).await.unwrap();
    let email_quota = h.quota.current_status(QuotaChannel::Email).await.unwrap();
    assert_eq!(sms_quota.used, 3);
    assert_eq!(email_quota.used, 0);
}

#[test]
async fn test_sms_outside_allowed_hours_has_no_side_effects() {
    let h = Harness::new().await;
    h.seed_contacts(2).await;
    h.clock.set(test_day(), 21, 0);

    let err = h
        .sms
        .send_sms_campaign(sms_req("Hola"))
        .await
        .unwrap_err();
    match &err {
        CampaignError::SmsOutsideAllowedHours { hour, start, end, .. } => {
            assert_eq!((*hour, *start, *end), (21, 9, 20));
        }
        other => panic!("se esperaba SmsOutsideAllowedHours, llegó {:?}", other),
    }
    assert_eq!(err.status_code().as_u16(), 422);

    assert_eq!(h.sms_provider.call_count(), 0);
    assert_eq!(h.campaign_count().await, 0);
    let quota = h.quota.current_status(QuotaChannel::Sms).await.unwrap();
    assert_eq!(quota.used, 0);
    // tampoco toma el candado
    assert!(h.lock.acquire().await.is_ok());
}

#[test]
async fn test_allowed_window_is_half_open() {
    let h = Harness::new().await;

    h.clock.set(test_day(), 9, 0);
    assert!(h.sms.check_allowed_hours(false).is_ok());

    h.clock.set(test_day(), 19, 59);
    assert!(h.sms.check_allowed_hours(false).is_ok());

    h.clock.set(test_day(), 20, 0);
    assert!(h.sms.check_allowed_hours(false).is_err());

    h.clock.set(test_day(), 8, 59);
    assert!(h.sms.check_allowed_hours(false).is_err());
    assert!(h.sms.check_allowed_hours(true).is_ok());
}

#[test]
async fn test_override_hours_sends_at_night() {
    let h = Harness::new().await;
    h.seed_contacts(2).await;
    h.clock.set(test_day(), 23, 30);

    let mut req = sms_req("Última hora");
    req.override_hours = true;
    let resp = h.sms.send_sms_campaign(req).await.unwrap();
    assert_eq!(resp.sent_count, Some(2));
    assert_eq!(h.sms_provider.call_count(), 2);
}

#[test]
async fn test_test_mode_uses_only_configured_numbers() {
    let config = CampaignConfig {
        sms_test_numbers: vec!["809 555 9999".to_string(), "basura".to_string()],
        ..test_config()
    };
    let h = Harness::with_config(config).await;
    h.seed_contacts(5).await;

    let mut req = sms_req("Prueba {{name}}");
    req.test_mode = true;
    let resp = h.sms.send_sms_campaign(req).await.unwrap();

    assert!(resp.campaign_id.is_none());
    assert_eq!(resp.sent_count, Some(1));
    assert_eq!(resp.total_recipients, Some(1));
    assert!(resp.estimate.is_some());

    let sent = h.sms_provider.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "+18095559999");
    assert_eq!(sent[0].body, "Prueba Cliente");

    assert_eq!(h.campaign_count().await, 0);
    let quota = h.quota.current_status(QuotaChannel::Sms).await.unwrap();
    assert_eq!(quota.used, 0);
}

#[test]
async fn test_test_mode_without_numbers_is_rejected() {
    let h = Harness::new().await;
    let mut req = sms_req("Prueba");
    req.test_mode = true;

    let err = h.sms.send_sms_campaign(req).await.unwrap_err();
    assert!(matches!(err, CampaignError::InvalidRequest(_)));
    assert_eq!(h.sms_provider.call_count(), 0);
}

#[test]
async fn test_estimate_counts_eligible_recipients() {
    let h = Harness::new().await;
    h.seed_contacts(3).await;
    h.contacts
        .create_contact(CreateContactRequest {
            name: "Número roto".to_string(),
            marketing_consent: true,
            emails: vec![],
            phones: vec!["12".to_string()],
        })
        .await
        .unwrap();

    let estimate = h.sms.estimate("Hola").await.unwrap();
    assert_eq!(estimate.recipients, 3);
    assert_eq!(estimate.encoding, SmsEncoding::Gsm7);
    assert_eq!(estimate.total_segments, 3);
    assert!((estimate.estimated_cost - 0.0237).abs() < 1e-9);

    let long = h.sms.estimate(&"á".repeat(80)).await.unwrap();
    assert_eq!(long.encoding, SmsEncoding::Ucs2);
    assert_eq!(long.segments_per_message, 2);
}

#[test]
async fn test_carrier_failures_are_logged_per_recipient() {
    let bad: HashSet<String> = ["+18095550001".to_string()].into_iter().collect();
    let h = Harness::build(
        test_config(),
        FakeEmailProvider::new(FakeMode::AllDelivered),
        FakeSmsProvider::new(FakeMode::FailFor(bad)),
    )
    .await;
    h.seed_contacts(3).await;

    let resp = h.sms.send_sms_campaign(sms_req("Hola")).await.unwrap();
    assert_eq!(resp.sent_count, Some(2));
    assert_eq!(resp.failed_count, Some(1));
    assert_eq!(resp.status, Some(CampaignStatus::InProgress));

    let id = resp.campaign_id.unwrap();
    let logs = h.campaigns.list_recipient_logs(&id).await.unwrap();
    let failed = logs
        .iter()
        .find(|l| l.status == RecipientLogStatus::Failed)
        .expect("log fallido");
    assert_eq!(failed.address, "+18095550001");
    assert_eq!(failed.external_message_id.as_deref(), Some("SM2"));
    assert!(failed.error_message.as_deref().unwrap().contains("30006"));

    let quota = h.quota.current_status(QuotaChannel::Sms).await.unwrap();
    assert_eq!(quota.used, 2);
}

#[test]
async fn test_transport_failure_on_every_sms_fails_campaign() {
    let h = Harness::build(
        test_config(),
        FakeEmailProvider::new(FakeMode::AllDelivered),
        FakeSmsProvider::new(FakeMode::TotalFailure),
    )
    .await;
    h.seed_contacts(2).await;

    let err = h.sms.send_sms_campaign(sms_req("Hola")).await.unwrap_err();
    let id = match err {
        CampaignError::ProviderSendFailure {
            campaign_id: Some(id),
            ..
        } => id,
        other => panic!("se esperaba ProviderSendFailure, llegó {:?}", other),
    };

    let campaign = h.campaigns.get_campaign(&id).await.unwrap().unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert_eq!(h.log_count(&id).await, 0);
    let quota = h.quota.current_status(QuotaChannel::Sms).await.unwrap();
    assert_eq!(quota.used, 0);
}

#[test]
async fn test_continue_sms_checks_hours_then_sends_rest() {
    let h = Harness::with_config(CampaignConfig {
        sms_daily_limit: 2,
        ..test_config()
    })
    .await;
    h.seed_contacts(3).await;

    let first = h.sms.send_sms_campaign(sms_req("Hola")).await.unwrap();
    assert_eq!(first.remaining, Some(1));
    let id = first.campaign_id.unwrap();

    h.clock.set(test_day() + Duration::days(1), 21, 0);
    let err = h.sms.continue_sms_campaign(&id, false).await.unwrap_err();
    assert!(matches!(err, CampaignError::SmsOutsideAllowedHours { .. }));
    assert_eq!(h.sms_provider.call_count(), 2);

    let resp = h.sms.continue_sms_campaign(&id, true).await.unwrap();
    assert_eq!(resp.sent_count, Some(1));
    assert_eq!(resp.status, Some(CampaignStatus::Completed));
    assert_eq!(h.log_count(&id).await, 3);
}

#[test]
async fn test_estimate_uses_personalized_text() {
    let h = Harness::new().await;
    for (name, phone) in [
        ("Łukasz", "809-555-0001"),
        ("Bartholomew Montgomery-Smith", "809-555-0002"),
    ] {
        h.contacts
            .create_contact(CreateContactRequest {
                name: name.to_string(),
                marketing_consent: true,
                emails: vec![],
                phones: vec![phone.to_string()],
            })
            .await
            .unwrap();
    }
    // 159 caracteres GSM sin personalizar: un segmento
    let message = format!("{} {{{{name}}}}", "a".repeat(150));

    let estimate = h.sms.estimate(&message).await.unwrap();
    assert_eq!(estimate.recipients, 2);
    // "Ł" pasa ese mensaje a UCS-2 (157 unidades, 3 segmentos); el nombre
    // largo deja el otro en 179 septetos (2 segmentos)
    assert_eq!(estimate.encoding, SmsEncoding::Ucs2);
    assert_eq!(estimate.segments_per_message, 3);
    assert_eq!(estimate.total_segments, 5);

    let resp = h.sms.send_sms_campaign(sms_req(&message)).await.unwrap();
    let sent_estimate = resp.estimate.expect("estimación del lote");
    assert_eq!(sent_estimate.total_segments, 5);
    assert_eq!(sent_estimate.segments_per_message, 3);
}

#[test]
async fn test_sms_template_with_unknown_variable_is_rejected() {
    let h = Harness::new().await;
    h.seed_contacts(1).await;

    let err = h
        .sms
        .send_sms_campaign(sms_req("Hola {{ nombre }}"))
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::InvalidRequest(_)));
    assert_eq!(h.sms_provider.call_count(), 0);
    assert_eq!(h.campaign_count().await, 0);
}
