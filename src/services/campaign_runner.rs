//! services/campaign_runner.rs
//! Flujo común de email y SMS: candado, cupo, campaña y cierre del lote.
//!
//! Cada canal aporta a quién se envía, cómo se arma cada mensaje y cómo se
//! entrega. El candado se toma acá y se libera siempre, salga bien o mal.

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    errors::{CampaignError, CampaignResult},
    models::{
        campaign_model::{CampaignActionResponse, CampaignKind, CampaignRecord},
        contact_model::Recipient,
        delivery_model::DeliveryOutcome,
        quota_model::{QuotaChannel, QuotaReservation},
    },
    services::{
        campaign_service::CampaignService,
        lock_service::{CampaignLockService, Lease, LockToken},
        quota_service::QuotaService,
    },
};

#[async_trait]
pub trait CampaignChannel: Send + Sync {
    type Message: Send + Sync;

    fn kind(&self) -> CampaignKind;

    fn quota_channel(&self) -> QuotaChannel;

    async fn eligible_recipients(&self) -> Result<Vec<Recipient>>;

    /// Un mensaje por destinatario, en el mismo orden que `batch`
    fn compose(&self, campaign: &CampaignRecord, batch: &[Recipient]) -> Result<Vec<Self::Message>>;

    /// Un resultado por mensaje. Renueva `lease` antes de cada llamada al
    /// proveedor; si no devolvió nada por ítem responde `ProviderSendFailure`.
    async fn deliver(
        &self,
        messages: &[Self::Message],
        lease: &Lease<'_>,
    ) -> CampaignResult<Vec<DeliveryOutcome>>;

    fn annotate(
        &self,
        resp: CampaignActionResponse,
        _messages: &[Self::Message],
    ) -> CampaignActionResponse {
        resp
    }
}

/// Datos de una campaña nueva, ya validados por el canal
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub subject: Option<String>,
    pub content: String,
}

#[derive(Clone)]
pub struct CampaignRunner {
    campaign_service: CampaignService,
    quota_service: QuotaService,
    lock_service: CampaignLockService,
}

impl CampaignRunner {
    pub fn new(
        campaign_service: CampaignService,
        quota_service: QuotaService,
        lock_service: CampaignLockService,
    ) -> Self {
        CampaignRunner {
            campaign_service,
            quota_service,
            lock_service,
        }
    }

    /// Crea la campaña y envía el primer lote, limitado por el cupo de hoy.
    pub async fn create_and_send<C: CampaignChannel>(
        &self,
        channel: &C,
        draft: NewCampaign,
    ) -> CampaignResult<CampaignActionResponse> {
        let lock = self.lock_service.acquire().await?;
        let result = self.create_locked(channel, &lock, draft).await;
        self.release(&lock).await;
        result
    }

    /// Envía el siguiente lote. `gate` corre después de validar la campaña y
    /// antes de tomar el candado.
    pub async fn continue_campaign<C, G>(
        &self,
        channel: &C,
        campaign_id: &str,
        gate: G,
    ) -> CampaignResult<CampaignActionResponse>
    where
        C: CampaignChannel,
        G: FnOnce() -> CampaignResult<()>,
    {
        self.campaign_service
            .load_resumable(campaign_id, channel.kind())
            .await?;
        gate()?;

        let lock = self.lock_service.acquire().await?;
        let result = self.resume_locked(channel, &lock, campaign_id).await;
        self.release(&lock).await;
        result
    }

    async fn create_locked<C: CampaignChannel>(
        &self,
        channel: &C,
        lock: &LockToken,
        draft: NewCampaign,
    ) -> CampaignResult<CampaignActionResponse> {
        let recipients = channel.eligible_recipients().await?;
        if recipients.is_empty() {
            return Err(CampaignError::NoEligibleRecipients);
        }
        let total = recipients.len() as i64;

        let reservation = self
            .quota_service
            .reserve_up_to(channel.quota_channel(), total)
            .await?;
        let campaign = match self
            .campaign_service
            .create_campaign(
                channel.kind(),
                &draft.name,
                draft.subject.as_deref(),
                &draft.content,
                total,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                self.quota_service.cancel_reservation(&reservation).await?;
                return Err(e.into());
            }
        };
        self.attach(lock, &campaign.id).await;

        let batch: Vec<Recipient> = recipients
            .into_iter()
            .take(reservation.count as usize)
            .collect();
        self.run_batch(channel, lock, &campaign, &reservation, batch)
            .await
    }

    async fn resume_locked<C: CampaignChannel>(
        &self,
        channel: &C,
        lock: &LockToken,
        campaign_id: &str,
    ) -> CampaignResult<CampaignActionResponse> {
        // la copia leída antes del candado puede estar vieja
        let campaign = self
            .campaign_service
            .load_resumable(campaign_id, channel.kind())
            .await?;
        self.campaign_service.ensure_not_sent_today(&campaign)?;

        let eligible = channel.eligible_recipients().await?;
        let remaining = self
            .campaign_service
            .remaining_recipients(&campaign, eligible)
            .await?;

        if remaining.is_empty() {
            let completed = self.campaign_service.mark_completed(&campaign).await?;
            log::info!(
                "(resume_locked) Campaña {} sin destinatarios pendientes, se marca completada",
                completed.id
            );
            return Ok(CampaignActionResponse::for_batch(
                "No quedan destinatarios pendientes; campaña completada",
                &completed,
                0,
                0,
            ));
        }

        let reservation = self
            .quota_service
            .reserve_up_to(channel.quota_channel(), remaining.len() as i64)
            .await?;
        self.attach(lock, &campaign.id).await;
        let campaign = match self.campaign_service.mark_sending(&campaign).await {
            Ok(c) => c,
            Err(e) => {
                self.quota_service.cancel_reservation(&reservation).await?;
                return Err(e.into());
            }
        };

        let batch: Vec<Recipient> = remaining
            .into_iter()
            .take(reservation.count as usize)
            .collect();
        self.run_batch(channel, lock, &campaign, &reservation, batch)
            .await
    }

    async fn run_batch<C: CampaignChannel>(
        &self,
        channel: &C,
        lock: &LockToken,
        campaign: &CampaignRecord,
        reservation: &QuotaReservation,
        batch: Vec<Recipient>,
    ) -> CampaignResult<CampaignActionResponse> {
        let messages = match channel.compose(campaign, &batch) {
            Ok(messages) => messages,
            Err(e) => {
                let reason = format!("No se pudieron armar los mensajes: {:#}", e);
                return self
                    .campaign_service
                    .fail_batch(campaign, reservation, lock, reason)
                    .await;
            }
        };

        log::info!(
            "(run_batch) Enviando {} mensajes de la campaña {} ({})",
            messages.len(),
            campaign.id,
            campaign.kind.as_str()
        );
        let lease = self.lock_service.lease(lock);
        let outcomes = match channel.deliver(&messages, &lease).await {
            Ok(outcomes) => outcomes,
            Err(CampaignError::ProviderSendFailure { reason, .. }) => {
                return self
                    .campaign_service
                    .fail_batch(campaign, reservation, lock, reason)
                    .await;
            }
            Err(e) => {
                // sin candado no se toca la campaña ni el cupo: lo enviado pudo salir
                log::error!(
                    "(run_batch) Envío de la campaña {} interrumpido: {}",
                    campaign.id,
                    e
                );
                return Err(e);
            }
        };

        let resp = self
            .campaign_service
            .settle_batch(campaign, reservation, lock, batch, outcomes)
            .await?;
        Ok(channel.annotate(resp, &messages))
    }

    async fn attach(&self, lock: &LockToken, campaign_id: &str) {
        if let Err(e) = self.lock_service.attach(lock, campaign_id).await {
            log::warn!("(attach) No se pudo anotar la campaña en el candado: {:#}", e);
        }
    }

    async fn release(&self, lock: &LockToken) {
        if let Err(e) = self.lock_service.release(lock).await {
            log::error!("(release) No se pudo liberar el candado: {:#}", e);
        }
    }
}
