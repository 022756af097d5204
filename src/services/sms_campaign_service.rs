//! services/sms_campaign_service.rs
//! Campañas de SMS. Igual que las de email más la ventana horaria, la
//! estimación de segmentos y un modo de prueba.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Timelike;

use crate::{
    clock::Clock,
    config::campaign_config::CampaignConfig,
    errors::{CampaignError, CampaignResult},
    models::{
        campaign_model::{
            CampaignActionResponse, CampaignKind, CampaignRecord, SendSmsCampaignRequest,
        },
        contact_model::Recipient,
        delivery_model::{DeliveryOutcome, OutboundSms, SmsEstimate, SmsSender},
        quota_model::QuotaChannel,
    },
    services::{
        campaign_runner::{CampaignChannel, CampaignRunner, NewCampaign},
        contact_service::{normalize_phone, ContactService},
        lock_service::Lease,
        sms_estimate_service::estimate_sms,
        sms_provider::SmsProvider,
        template_service::{TemplateEscape, TemplateRenderer},
    },
};

/// Reglas de envío de SMS tomadas de la configuración
#[derive(Debug, Clone)]
pub struct SmsRules {
    pub sender: SmsSender,
    pub send_delay: Duration,
    pub allowed_start_hour: u32,
    pub allowed_end_hour: u32,
    pub cost_per_segment: f64,
    pub default_country_code: String,
    pub test_numbers: Vec<String>,
    pub fallback_name: String,
}

impl SmsRules {
    pub fn from_config(config: &CampaignConfig) -> Result<Self> {
        Ok(SmsRules {
            sender: config.sms_sender()?,
            send_delay: Duration::from_millis(config.send_delay_ms),
            allowed_start_hour: config.sms_allowed_start_hour,
            allowed_end_hour: config.sms_allowed_end_hour,
            cost_per_segment: config.sms_cost_per_segment,
            default_country_code: config.sms_default_country_code.clone(),
            test_numbers: config.sms_test_numbers.clone(),
            fallback_name: config.default_recipient_name.clone(),
        })
    }
}

#[derive(Clone)]
pub struct SmsCampaignService {
    contact_service: ContactService,
    runner: CampaignRunner,
    provider: Arc<dyn SmsProvider>,
    clock: Arc<dyn Clock>,
    templates: Arc<TemplateRenderer>,
    rules: SmsRules,
}

impl SmsCampaignService {
    pub fn new(
        contact_service: ContactService,
        runner: CampaignRunner,
        provider: Arc<dyn SmsProvider>,
        clock: Arc<dyn Clock>,
        rules: SmsRules,
    ) -> Self {
        Self {
            contact_service,
            runner,
            provider,
            clock,
            templates: Arc::new(TemplateRenderer::new(&rules.fallback_name)),
            rules,
        }
    }

    /// Estimación para todos los destinatarios elegibles, con el texto ya
    /// personalizado para cada uno
    pub async fn estimate(&self, message: &str) -> CampaignResult<SmsEstimate> {
        self.templates.check(message, TemplateEscape::Plain)?;
        let recipients = self.eligible_recipients().await?;
        let bodies = self.templates.render_all(
            message,
            TemplateEscape::Plain,
            recipients.iter().map(|r| r.name.as_str()),
        )?;
        Ok(estimate_sms(&bodies, self.rules.cost_per_segment))
    }

    /// Ventana [inicio, fin) en hora local
    pub fn check_allowed_hours(&self, override_hours: bool) -> CampaignResult<()> {
        if override_hours {
            return Ok(());
        }
        let now = self.clock.now();
        let hour = now.hour();
        if hour < self.rules.allowed_start_hour || hour >= self.rules.allowed_end_hour {
            log::warn!(
                "(check_allowed_hours) SMS rechazado a las {}:{:02}",
                hour,
                now.minute()
            );
            return Err(CampaignError::SmsOutsideAllowedHours {
                hour,
                minute: now.minute(),
                start: self.rules.allowed_start_hour,
                end: self.rules.allowed_end_hour,
            });
        }
        Ok(())
    }

    pub async fn send_sms_campaign(
        &self,
        req: SendSmsCampaignRequest,
    ) -> CampaignResult<CampaignActionResponse> {
        if req.message.trim().is_empty() {
            return Err(CampaignError::InvalidRequest(
                "El mensaje es obligatorio".to_string(),
            ));
        }
        self.templates.check(&req.message, TemplateEscape::Plain)?;
        if req.test_mode {
            return self.send_test(&req).await;
        }
        self.check_allowed_hours(req.override_hours)?;

        log::info!("(send_sms_campaign) Iniciando campaña SMS...");
        let name = req
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("SMS {}", self.clock.today()));
        let draft = NewCampaign {
            name,
            subject: None,
            content: req.message,
        };
        self.runner.create_and_send(self, draft).await
    }

    pub async fn continue_sms_campaign(
        &self,
        campaign_id: &str,
        override_hours: bool,
    ) -> CampaignResult<CampaignActionResponse> {
        log::info!("(continue_sms_campaign) Reanudando campaña {}...", campaign_id);
        self.runner
            .continue_campaign(self, campaign_id, || {
                self.check_allowed_hours(override_hours)
            })
            .await
    }

    /// Solo a los números de SMS_TEST_NUMBERS; no crea campaña ni usa cupo.
    async fn send_test(&self, req: &SendSmsCampaignRequest) -> CampaignResult<CampaignActionResponse> {
        let numbers: Vec<String> = self
            .rules
            .test_numbers
            .iter()
            .filter_map(|n| normalize_phone(n, &self.rules.default_country_code))
            .collect();
        if numbers.is_empty() {
            return Err(CampaignError::InvalidRequest(
                "Modo prueba sin números configurados (SMS_TEST_NUMBERS)".to_string(),
            ));
        }

        log::info!("(send_test) Enviando SMS de prueba a {} números", numbers.len());
        let body = self
            .templates
            .render(&req.message, "", TemplateEscape::Plain)?;
        let messages: Vec<OutboundSms> = numbers
            .into_iter()
            .map(|to| OutboundSms {
                to,
                body: body.clone(),
                sender: self.rules.sender.clone(),
            })
            .collect();

        let outcomes = self.send_each(&messages, None).await?;

        let sent = outcomes.iter().filter(|o| o.is_delivered()).count() as i64;
        let failed = outcomes.len() as i64 - sent;
        let mut resp = CampaignActionResponse::message(
            true,
            format!("SMS de prueba: {} enviados, {} fallidos", sent, failed),
        )
        .with_estimate(self.estimate_messages(&messages));
        resp.sent_count = Some(sent);
        resp.failed_count = Some(failed);
        resp.total_recipients = Some(outcomes.len() as i64);
        Ok(resp)
    }

    fn estimate_messages(&self, messages: &[OutboundSms]) -> SmsEstimate {
        let bodies: Vec<&str> = messages.iter().map(|m| m.body.as_str()).collect();
        estimate_sms(&bodies, self.rules.cost_per_segment)
    }

    /// Un SMS por llamada, en orden, con pausa entre cada uno. Con candado se
    /// renueva antes de cada SMS. Si todas las llamadas fallan por
    /// transporte, es falla total.
    async fn send_each(
        &self,
        messages: &[OutboundSms],
        lease: Option<&Lease<'_>>,
    ) -> CampaignResult<Vec<DeliveryOutcome>> {
        let mut outcomes = Vec::with_capacity(messages.len());
        let mut transport_failures = 0;
        let mut last_error = None;

        for (i, sms) in messages.iter().enumerate() {
            if i > 0 && !self.rules.send_delay.is_zero() {
                tokio::time::sleep(self.rules.send_delay).await;
            }
            if let Some(lease) = lease {
                lease.renew().await?;
            }
            match self.provider.send(sms).await {
                Ok(result) => outcomes.push(result.into_outcome()),
                Err(e) => {
                    log::error!("(send_each) SMS a {} falló: {:#}", sms.to, e);
                    transport_failures += 1;
                    outcomes.push(DeliveryOutcome::Failed {
                        external_id: None,
                        error: format!("{:#}", e),
                    });
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if transport_failures == messages.len() => {
                Err(CampaignError::ProviderSendFailure {
                    campaign_id: None,
                    reason: format!("{:#}", e),
                })
            }
            _ => Ok(outcomes),
        }
    }
}

#[async_trait]
impl CampaignChannel for SmsCampaignService {
    type Message = OutboundSms;

    fn kind(&self) -> CampaignKind {
        CampaignKind::Sms
    }

    fn quota_channel(&self) -> QuotaChannel {
        QuotaChannel::Sms
    }

    async fn eligible_recipients(&self) -> Result<Vec<Recipient>> {
        self.contact_service
            .eligible_phone_recipients(&self.rules.default_country_code)
            .await
    }

    fn compose(&self, campaign: &CampaignRecord, batch: &[Recipient]) -> Result<Vec<OutboundSms>> {
        let bodies = self.templates.render_all(
            &campaign.content,
            TemplateEscape::Plain,
            batch.iter().map(|r| r.name.as_str()),
        )?;
        Ok(batch
            .iter()
            .zip(bodies)
            .map(|(r, body)| OutboundSms {
                to: r.address.clone(),
                body,
                sender: self.rules.sender.clone(),
            })
            .collect())
    }

    async fn deliver(
        &self,
        messages: &[OutboundSms],
        lease: &Lease<'_>,
    ) -> CampaignResult<Vec<DeliveryOutcome>> {
        self.send_each(messages, Some(lease)).await
    }

    /// Estimación del lote enviado, sobre los textos personalizados
    fn annotate(&self, resp: CampaignActionResponse, messages: &[OutboundSms]) -> CampaignActionResponse {
        let estimate = self.estimate_messages(messages);
        log::info!(
            "(annotate) Lote SMS: hasta {} segmentos por mensaje, {} en total, ~{} USD",
            estimate.segments_per_message,
            estimate.total_segments,
            estimate.estimated_cost
        );
        resp.with_estimate(estimate)
    }
}
