//! tests/support.rs
//! Helpers compartidos: DB en memoria, reloj fijo y proveedores falsos.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};
use tokio::sync::Notify;

use crate::{
    clock::{Clock, FixedClock},
    config::campaign_config::CampaignConfig,
    db,
    models::{
        campaign_model::{SendNewsletterRequest, SendSmsCampaignRequest},
        contact_model::CreateContactRequest,
        delivery_model::{DeliveryOutcome, OutboundEmail, OutboundSms, SmsDeliveryResult},
    },
    services::{
        campaign_runner::CampaignRunner,
        campaign_service::CampaignService,
        contact_service::ContactService,
        email_provider::EmailProvider,
        lock_service::CampaignLockService,
        newsletter_service::NewsletterService,
        quota_service::QuotaService,
        sms_campaign_service::{SmsCampaignService, SmsRules},
        sms_provider::SmsProvider,
    },
};

pub async fn test_pool() -> Pool<Sqlite> {
    let pool = db::connect("sqlite::memory:")
        .await
        .expect("no se pudo abrir sqlite en memoria");
    db::run_migrations(&pool).await.expect("migraciones");
    pool
}

pub fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).expect("fecha")
}

pub fn test_config() -> CampaignConfig {
    CampaignConfig {
        email_from: "Estudio Web <hola@example.com>".to_string(),
        email_daily_limit: 100,
        sms_daily_limit: 100,
        send_delay_ms: 0,
        twilio_from_number: Some("+15550001111".to_string()),
        ..CampaignConfig::default()
    }
}

// ----------------------------------------------------------------
// Proveedores falsos
// ----------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum FakeMode {
    AllDelivered,
    /// Falla por destinatario para estas direcciones
    FailFor(HashSet<String>),
    /// El proveedor no responde nada
    TotalFailure,
    /// Envía todo pero devuelve un resultado menos
    ShortAnswer,
}

pub struct FakeEmailProvider {
    mode: Mutex<FakeMode>,
    pub sent: Mutex<Vec<OutboundEmail>>,
    pub calls: Mutex<usize>,
    batch_size: usize,
    /// Si está, cada llamada avisa en `entered` y espera `release`
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeEmailProvider {
    pub fn new(mode: FakeMode) -> Self {
        FakeEmailProvider {
            mode: Mutex::new(mode),
            sent: Mutex::new(vec![]),
            calls: Mutex::new(0),
            batch_size: 100,
            gate: None,
        }
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        FakeEmailProvider { batch_size, ..self }
    }

    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        FakeEmailProvider {
            gate: Some((entered, release)),
            ..FakeEmailProvider::new(FakeMode::AllDelivered)
        }
    }

    pub fn set_mode(&self, mode: FakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn sent_addresses(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|e| e.to.clone()).collect()
    }
}

#[async_trait]
impl EmailProvider for FakeEmailProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<Vec<DeliveryOutcome>> {
        *self.calls.lock().unwrap() += 1;
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            FakeMode::TotalFailure => Err(anyhow!("503 Service Unavailable")),
            FakeMode::ShortAnswer => {
                self.sent.lock().unwrap().extend(emails.iter().cloned());
                Ok(emails
                    .iter()
                    .skip(1)
                    .map(|_| DeliveryOutcome::Delivered { external_id: None })
                    .collect())
            }
            FakeMode::AllDelivered => {
                self.sent.lock().unwrap().extend(emails.iter().cloned());
                Ok(emails
                    .iter()
                    .enumerate()
                    .map(|(i, _)| DeliveryOutcome::Delivered {
                        external_id: Some(format!("em_{}", i)),
                    })
                    .collect())
            }
            FakeMode::FailFor(bad) => {
                let mut outcomes = Vec::new();
                for (i, email) in emails.iter().enumerate() {
                    if bad.contains(&email.to) {
                        outcomes.push(DeliveryOutcome::Failed {
                            external_id: None,
                            error: "mailbox unavailable".to_string(),
                        });
                    } else {
                        self.sent.lock().unwrap().push(email.clone());
                        outcomes.push(DeliveryOutcome::Delivered {
                            external_id: Some(format!("em_{}", i)),
                        });
                    }
                }
                Ok(outcomes)
            }
        }
    }
}

pub struct FakeSmsProvider {
    mode: Mutex<FakeMode>,
    pub sent: Mutex<Vec<OutboundSms>>,
    pub calls: Mutex<usize>,
}

impl FakeSmsProvider {
    pub fn new(mode: FakeMode) -> Self {
        FakeSmsProvider {
            mode: Mutex::new(mode),
            sent: Mutex::new(vec![]),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SmsProvider for FakeSmsProvider {
    async fn send(&self, sms: &OutboundSms) -> Result<SmsDeliveryResult> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            FakeMode::TotalFailure => Err(anyhow!("connection refused")),
            FakeMode::FailFor(bad) if bad.contains(&sms.to) => Ok(SmsDeliveryResult {
                sid: Some(format!("SM{}", n)),
                status: "failed".to_string(),
                error_code: Some(30006),
                error_message: Some("Landline or unreachable carrier".to_string()),
            }),
            _ => {
                self.sent.lock().unwrap().push(sms.clone());
                Ok(SmsDeliveryResult {
                    sid: Some(format!("SM{}", n)),
                    status: "queued".to_string(),
                    error_code: None,
                    error_message: None,
                })
            }
        }
    }
}

// ----------------------------------------------------------------
// Harness
// ----------------------------------------------------------------

pub struct Harness {
    pub pool: Pool<Sqlite>,
    pub clock: FixedClock,
    pub quota: QuotaService,
    pub lock: CampaignLockService,
    pub contacts: ContactService,
    pub campaigns: CampaignService,
    pub newsletter: NewsletterService,
    pub sms: SmsCampaignService,
    pub email_provider: Arc<FakeEmailProvider>,
    pub sms_provider: Arc<FakeSmsProvider>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(
            test_config(),
            FakeEmailProvider::new(FakeMode::AllDelivered),
            FakeSmsProvider::new(FakeMode::AllDelivered),
        )
        .await
    }

    pub async fn with_config(config: CampaignConfig) -> Self {
        Self::build(
            config,
            FakeEmailProvider::new(FakeMode::AllDelivered),
            FakeSmsProvider::new(FakeMode::AllDelivered),
        )
        .await
    }

    pub async fn build(
        config: CampaignConfig,
        email_provider: FakeEmailProvider,
        sms_provider: FakeSmsProvider,
    ) -> Self {
        let pool = test_pool().await;
        let clock = FixedClock::at(test_day(), 10, 0);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let quota = QuotaService::new(pool.clone(), shared_clock.clone(), &config);
        let lock = CampaignLockService::new(
            pool.clone(),
            shared_clock.clone(),
            config.lock_window_minutes,
        );
        let contacts = ContactService::new(pool.clone());
        let campaigns = CampaignService::new(
            pool.clone(),
            quota.clone(),
            lock.clone(),
            shared_clock.clone(),
        );
        let runner = CampaignRunner::new(campaigns.clone(), quota.clone(), lock.clone());

        let email_provider = Arc::new(email_provider);
        let sms_provider = Arc::new(sms_provider);

        let newsletter = NewsletterService::new(
            contacts.clone(),
            runner.clone(),
            email_provider.clone(),
            config.email_from.clone(),
            config.default_recipient_name.clone(),
        );
        let rules = SmsRules::from_config(&config).expect("reglas de SMS");
        let sms = SmsCampaignService::new(
            contacts.clone(),
            runner,
            sms_provider.clone(),
            shared_clock,
            rules,
        );

        Harness {
            pool,
            clock,
            quota,
            lock,
            contacts,
            campaigns,
            newsletter,
            sms,
            email_provider,
            sms_provider,
        }
    }

    /// Crea `n` contactos con consentimiento, email y teléfono
    pub async fn seed_contacts(&self, n: usize) {
        for i in 0..n {
            self.contacts
                .create_contact(CreateContactRequest {
                    name: format!("Cliente {}", i),
                    marketing_consent: true,
                    emails: vec![format!("cliente{}@example.com", i)],
                    phones: vec![format!("809-555-{:04}", i)],
                })
                .await
                .expect("crear contacto");
        }
    }

    pub async fn log_count(&self, campaign_id: &str) -> usize {
        self.campaigns
            .list_recipient_logs(campaign_id)
            .await
            .expect("logs")
            .len()
    }

    pub async fn campaign_count(&self) -> u64 {
        self.campaigns
            .list_campaigns(1, 100)
            .await
            .expect("listar campañas")
            .total
    }
}

pub fn newsletter_req(subject: &str) -> SendNewsletterRequest {
    SendNewsletterRequest {
        subject: subject.to_string(),
        content: "<p>Hola {{name}}, tenemos novedades</p>".to_string(),
        name: None,
    }
}

pub fn sms_req(message: &str) -> SendSmsCampaignRequest {
    SendSmsCampaignRequest {
        message: message.to_string(),
        name: None,
        test_mode: false,
        override_hours: false,
    }
}
