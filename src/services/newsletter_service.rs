//! services/newsletter_service.rs
//! Campañas de email: crear y enviar el primer lote, y reanudar.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    errors::{CampaignError, CampaignResult},
    models::{
        campaign_model::{CampaignActionResponse, CampaignKind, CampaignRecord, SendNewsletterRequest},
        contact_model::Recipient,
        delivery_model::{DeliveryOutcome, OutboundEmail},
        quota_model::QuotaChannel,
    },
    services::{
        campaign_runner::{CampaignChannel, CampaignRunner, NewCampaign},
        contact_service::ContactService,
        email_provider::EmailProvider,
        lock_service::Lease,
        template_service::{TemplateEscape, TemplateRenderer},
    },
};

#[derive(Clone)]
pub struct NewsletterService {
    contact_service: ContactService,
    runner: CampaignRunner,
    provider: Arc<dyn EmailProvider>,
    templates: Arc<TemplateRenderer>,
    from: String,
}

impl NewsletterService {
    pub fn new(
        contact_service: ContactService,
        runner: CampaignRunner,
        provider: Arc<dyn EmailProvider>,
        from: String,
        fallback_name: String,
    ) -> Self {
        Self {
            contact_service,
            runner,
            provider,
            templates: Arc::new(TemplateRenderer::new(&fallback_name)),
            from,
        }
    }

    /// Crea la campaña y envía el primer lote, limitado por el cupo de hoy.
    pub async fn send_batch_newsletter(
        &self,
        req: SendNewsletterRequest,
    ) -> CampaignResult<CampaignActionResponse> {
        if req.subject.trim().is_empty() || req.content.trim().is_empty() {
            return Err(CampaignError::InvalidRequest(
                "El asunto y el contenido son obligatorios".to_string(),
            ));
        }
        self.templates.check(&req.subject, TemplateEscape::Plain)?;
        self.templates.check(&req.content, TemplateEscape::Html)?;
        log::info!(
            "(send_batch_newsletter) Iniciando newsletter '{}'...",
            req.subject
        );

        let name = req
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| req.subject.clone());
        let draft = NewCampaign {
            name,
            subject: Some(req.subject),
            content: req.content,
        };
        self.runner.create_and_send(self, draft).await
    }

    /// Envía el siguiente lote de una campaña de email existente.
    pub async fn continue_campaign(&self, campaign_id: &str) -> CampaignResult<CampaignActionResponse> {
        log::info!("(continue_campaign) Reanudando campaña {}...", campaign_id);
        self.runner
            .continue_campaign(self, campaign_id, || Ok(()))
            .await
    }
}

#[async_trait]
impl CampaignChannel for NewsletterService {
    type Message = OutboundEmail;

    fn kind(&self) -> CampaignKind {
        CampaignKind::Email
    }

    fn quota_channel(&self) -> QuotaChannel {
        QuotaChannel::Email
    }

    async fn eligible_recipients(&self) -> Result<Vec<Recipient>> {
        self.contact_service.eligible_email_recipients().await
    }

    fn compose(&self, campaign: &CampaignRecord, batch: &[Recipient]) -> Result<Vec<OutboundEmail>> {
        let subject = campaign.subject.as_deref().unwrap_or_default();
        let names = || batch.iter().map(|r| r.name.as_str());
        let subjects = self
            .templates
            .render_all(subject, TemplateEscape::Plain, names())?;
        let bodies = self
            .templates
            .render_all(&campaign.content, TemplateEscape::Html, names())?;

        Ok(batch
            .iter()
            .zip(subjects.into_iter().zip(bodies))
            .map(|(r, (subject, html))| OutboundEmail {
                from: self.from.clone(),
                to: r.address.clone(),
                subject,
                html,
            })
            .collect())
    }

    /// Parte el lote según lo que acepta el proveedor. Solo es falla total si
    /// ninguna llamada devolvió datos.
    async fn deliver(
        &self,
        emails: &[OutboundEmail],
        lease: &Lease<'_>,
    ) -> CampaignResult<Vec<DeliveryOutcome>> {
        let chunk_size = self.provider.max_batch_size().max(1);
        let mut outcomes = Vec::with_capacity(emails.len());
        let mut any_answered = false;
        let mut last_error = None;

        log::info!(
            "(deliver) {} emails por {} en bloques de {}",
            emails.len(),
            self.provider.name(),
            chunk_size
        );
        for chunk in emails.chunks(chunk_size) {
            lease.renew().await?;
            match self.provider.send_batch(chunk).await {
                Ok(results) => {
                    any_answered = true;
                    outcomes.extend(results);
                }
                Err(e) => {
                    log::error!("(deliver) Falló un bloque de {} emails: {:#}", chunk.len(), e);
                    outcomes.extend(chunk.iter().map(|_| DeliveryOutcome::Failed {
                        external_id: None,
                        error: format!("{:#}", e),
                    }));
                    last_error = Some(e);
                }
            }
        }

        match (any_answered, last_error) {
            (false, Some(e)) => Err(CampaignError::ProviderSendFailure {
                campaign_id: None,
                reason: format!("{:#}", e),
            }),
            _ => Ok(outcomes),
        }
    }
}
