//! services/campaign_service.rs
//! Persistencia de campañas y su bitácora por destinatario, más las reglas
//! compartidas por email y SMS: validar si se puede reanudar y cerrar un lote.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local};
use sqlx::{Pool, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{format_ts, parse_opt_ts, parse_ts},
    errors::{CampaignError, CampaignResult},
    models::{
        campaign_model::{
            CampaignActionResponse, CampaignKind, CampaignRecipientLog, CampaignRecord,
            CampaignStatus, ListCampaignsResponse, NewRecipientLog, RecipientLogStatus,
        },
        contact_model::Recipient,
        delivery_model::DeliveryOutcome,
        quota_model::QuotaReservation,
    },
    services::{
        lock_service::{CampaignLockService, LockToken},
        quota_service::QuotaService,
    },
};

#[derive(Clone)]
pub struct CampaignService {
    db_pool: Pool<Sqlite>,
    quota_service: QuotaService,
    lock_service: CampaignLockService,
    clock: Arc<dyn Clock>,
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: String,
    kind: String,
    name: String,
    subject: Option<String>,
    content: String,
    total_recipients: i64,
    sent_count: i64,
    failed_count: i64,
    status: String,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
    last_batch_sent_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<CampaignRow> for CampaignRecord {
    type Error = anyhow::Error;

    fn try_from(r: CampaignRow) -> Result<Self> {
        Ok(CampaignRecord {
            kind: r.kind.parse()?,
            status: r.status.parse()?,
            created_at: parse_ts(&r.created_at)?,
            updated_at: parse_ts(&r.updated_at)?,
            last_batch_sent_at: parse_opt_ts(r.last_batch_sent_at)?,
            completed_at: parse_opt_ts(r.completed_at)?,
            id: r.id,
            name: r.name,
            subject: r.subject,
            content: r.content,
            total_recipients: r.total_recipients,
            sent_count: r.sent_count,
            failed_count: r.failed_count,
            error_message: r.error_message,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecipientLogRow {
    id: String,
    campaign_id: String,
    contact_id: Option<String>,
    address: String,
    status: String,
    external_message_id: Option<String>,
    error_message: Option<String>,
    created_at: String,
}

const CAMPAIGN_COLUMNS: &str = r#"
    id, kind, name, subject, content, total_recipients, sent_count, failed_count,
    status, error_message, created_at, updated_at, last_batch_sent_at, completed_at
"#;

impl CampaignService {
    pub fn new(
        db_pool: Pool<Sqlite>,
        quota_service: QuotaService,
        lock_service: CampaignLockService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        CampaignService {
            db_pool,
            quota_service,
            lock_service,
            clock,
        }
    }

    /// Crea la campaña en DB con estado "sending"
    pub async fn create_campaign(
        &self,
        kind: CampaignKind,
        name: &str,
        subject: Option<&str>,
        content: &str,
        total_recipients: i64,
    ) -> Result<CampaignRecord> {
        let id = Uuid::new_v4().to_string();
        let now = format_ts(self.clock.now_utc());

        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, kind, name, subject, content, total_recipients,
                sent_count, failed_count, status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?8, ?8)
            "#,
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(name)
        .bind(subject)
        .bind(content)
        .bind(total_recipients)
        .bind(CampaignStatus::Sending.as_str())
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar campaña")?;

        log::info!(
            "(create_campaign) Campaña {} ({}) creada con {} destinatarios",
            id,
            kind.as_str(),
            total_recipients
        );
        self.get_campaign(&id)
            .await?
            .ok_or_else(|| anyhow!("La campaña {} desapareció tras insertarla", id))
    }

    pub async fn get_campaign(&self, id: &str) -> Result<Option<CampaignRecord>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
        let row: Option<CampaignRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Fallo al consultar campaña")?;
        row.map(CampaignRecord::try_from).transpose()
    }

    /// Lista campañas con paginación, más recientes primero
    pub async fn list_campaigns(&self, page: u64, page_size: u64) -> Result<ListCampaignsResponse> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = ((page - 1) * page_size) as i64;

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM campaigns")
            .fetch_one(&self.db_pool)
            .await?;

        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        );
        let rows: Vec<CampaignRow> = sqlx::query_as(&sql)
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.db_pool)
            .await?;

        let items = rows
            .into_iter()
            .map(CampaignRecord::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(ListCampaignsResponse {
            total: total as u64,
            page,
            page_size,
            items,
        })
    }

    pub async fn list_recipient_logs(&self, campaign_id: &str) -> Result<Vec<CampaignRecipientLog>> {
        let rows: Vec<RecipientLogRow> = sqlx::query_as(
            r#"
            SELECT id, campaign_id, contact_id, address, status,
                   external_message_id, error_message, created_at
            FROM campaign_recipient_logs
            WHERE campaign_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for r in rows {
            result.push(CampaignRecipientLog {
                status: r.status.parse()?,
                created_at: parse_ts(&r.created_at)?,
                id: r.id,
                campaign_id: r.campaign_id,
                contact_id: r.contact_id,
                address: r.address,
                external_message_id: r.external_message_id,
                error_message: r.error_message,
            });
        }
        Ok(result)
    }

    /// Direcciones que ya recibieron esta campaña
    pub async fn sent_addresses(&self, campaign_id: &str) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"SELECT DISTINCT address FROM campaign_recipient_logs WHERE campaign_id = ?1 AND status = ?2"#,
        )
        .bind(campaign_id)
        .bind(RecipientLogStatus::Sent.as_str())
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    // ========================================================================
    // Reanudación
    // ========================================================================

    /// Busca la campaña y verifica que sea del tipo esperado y no terminal.
    /// Se llama antes del candado para rechazar rápido y otra vez con el
    /// candado tomado, que es la copia con la que se trabaja.
    pub async fn load_resumable(&self, id: &str, kind: CampaignKind) -> CampaignResult<CampaignRecord> {
        let campaign = self
            .get_campaign(id)
            .await?
            .ok_or_else(|| CampaignError::CampaignNotFound(id.to_string()))?;

        if campaign.kind != kind {
            return Err(CampaignError::InvalidRequest(format!(
                "La campaña {} es de tipo {}, no {}",
                id,
                campaign.kind.as_str(),
                kind.as_str()
            )));
        }
        match campaign.status {
            CampaignStatus::Completed => Err(CampaignError::AlreadyCompleted(id.to_string())),
            CampaignStatus::Failed => Err(CampaignError::CampaignFailed(id.to_string())),
            CampaignStatus::Sending | CampaignStatus::InProgress => Ok(campaign),
        }
    }

    /// Un lote por día calendario (hora local) por campaña
    pub fn ensure_not_sent_today(&self, campaign: &CampaignRecord) -> CampaignResult<()> {
        if let Some(last) = campaign.last_batch_sent_at {
            let last_local: DateTime<Local> = last.with_timezone(&Local);
            if last_local.date_naive() == self.clock.today() {
                return Err(CampaignError::AlreadySentToday(campaign.id.clone()));
            }
        }
        Ok(())
    }

    /// Destinatarios elegibles que todavía no figuran como enviados
    pub async fn remaining_recipients(
        &self,
        campaign: &CampaignRecord,
        eligible: Vec<Recipient>,
    ) -> Result<Vec<Recipient>> {
        let sent = self.sent_addresses(&campaign.id).await?;
        Ok(eligible
            .into_iter()
            .filter(|r| !sent.contains(&r.address))
            .collect())
    }

    pub async fn mark_sending(&self, campaign: &CampaignRecord) -> Result<CampaignRecord> {
        if campaign.status == CampaignStatus::Sending {
            // quedó en "sending" por un lote interrumpido; quien llama ya tiene el candado
            log::warn!(
                "(mark_sending) La campaña {} seguía en 'sending', se retoma",
                campaign.id
            );
            return Ok(campaign.clone());
        }
        self.transition(campaign, CampaignStatus::Sending).await
    }

    /// Reanudación sin pendientes: se cierra sin escribir logs
    pub async fn mark_completed(&self, campaign: &CampaignRecord) -> Result<CampaignRecord> {
        self.transition(campaign, CampaignStatus::Completed).await
    }

    async fn transition(
        &self,
        campaign: &CampaignRecord,
        next: CampaignStatus,
    ) -> Result<CampaignRecord> {
        ensure_transition(campaign, next)?;
        let now = format_ts(self.clock.now_utc());
        let completed_at = (next == CampaignStatus::Completed).then(|| now.clone());

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?2,
                completed_at = COALESCE(?3, completed_at),
                updated_at = ?4
            WHERE id = ?1 AND status = ?5
            "#,
        )
        .bind(&campaign.id)
        .bind(next.as_str())
        .bind(completed_at)
        .bind(&now)
        .bind(campaign.status.as_str())
        .execute(&self.db_pool)
        .await
        .context("Fallo al actualizar estado de campaña")?;

        if result.rows_affected() == 0 {
            bail!(
                "La campaña {} ya no está en '{}'; no se pasa a '{}'",
                campaign.id,
                campaign.status,
                next
            );
        }
        self.reload(&campaign.id).await
    }

    async fn reload(&self, id: &str) -> Result<CampaignRecord> {
        self.get_campaign(id)
            .await?
            .ok_or_else(|| anyhow!("Campaña {} no encontrada", id))
    }

    // ========================================================================
    // Cierre de lote
    // ========================================================================

    /// Cierra un lote con un resultado por destinatario, en el mismo orden
    /// que `batch`.
    ///
    /// Todo lo que se escribe (logs, contadores, devolución de cupo) va en una
    /// sola transacción, y solo se confirma si `lock` sigue siendo el dueño
    /// del candado. Si el proveedor contestó de menos o la escritura falla,
    /// el lote se da por perdido y se devuelve el cupo completo.
    pub async fn settle_batch(
        &self,
        campaign: &CampaignRecord,
        reservation: &QuotaReservation,
        lock: &LockToken,
        batch: Vec<Recipient>,
        outcomes: Vec<DeliveryOutcome>,
    ) -> CampaignResult<CampaignActionResponse> {
        if outcomes.len() != batch.len() {
            let reason = format!(
                "El proveedor devolvió {} resultados para {} destinatarios",
                outcomes.len(),
                batch.len()
            );
            return self.fail_batch(campaign, reservation, lock, reason).await;
        }

        let logs: Vec<NewRecipientLog> = batch
            .into_iter()
            .zip(outcomes)
            .map(|(recipient, outcome)| to_log(recipient, outcome))
            .collect();
        let updated = match self
            .record_batch_outcome(campaign, reservation, lock, &logs)
            .await
        {
            Ok(updated) => updated,
            Err(CampaignError::Internal(e)) => {
                log::error!(
                    "(settle_batch) No se pudo registrar el lote de la campaña {}: {:#}",
                    campaign.id,
                    e
                );
                let reason = format!("No se pudo registrar el resultado del lote: {:#}", e);
                self.record_total_failure(campaign, reservation, lock, &reason)
                    .await?;
                return Err(CampaignError::Internal(e));
            }
            Err(e) => return Err(e),
        };

        let sent = logs
            .iter()
            .filter(|l| l.status == RecipientLogStatus::Sent)
            .count() as i64;
        let failed = logs.len() as i64 - sent;

        let message = match (updated.status, failed) {
            (CampaignStatus::Completed, 0) => {
                format!("Campaña completada: {} enviados", sent)
            }
            (CampaignStatus::Completed, _) => format!(
                "Campaña completada: {} enviados, {} fallidos",
                sent, failed
            ),
            (_, 0) => format!(
                "Lote enviado: {} enviados, quedan {} pendientes",
                sent,
                updated.remaining()
            ),
            (_, _) => format!(
                "Lote enviado con errores: {} enviados, {} fallidos, quedan {} pendientes",
                sent,
                failed,
                updated.remaining()
            ),
        };
        log::info!("(settle_batch) Campaña {}: {}", updated.id, message);
        Ok(CampaignActionResponse::for_batch(message, &updated, sent, failed))
    }

    /// Lote perdido completo: devuelve el cupo, marca la campaña como fallida
    /// y responde `ProviderSendFailure`.
    pub async fn fail_batch(
        &self,
        campaign: &CampaignRecord,
        reservation: &QuotaReservation,
        lock: &LockToken,
        reason: String,
    ) -> CampaignResult<CampaignActionResponse> {
        log::error!(
            "(fail_batch) Fallo total del envío en campaña {}: {}",
            campaign.id,
            reason
        );
        self.record_total_failure(campaign, reservation, lock, &reason)
            .await?;
        Err(CampaignError::ProviderSendFailure {
            campaign_id: Some(campaign.id.clone()),
            reason,
        })
    }

    async fn record_batch_outcome(
        &self,
        campaign: &CampaignRecord,
        reservation: &QuotaReservation,
        lock: &LockToken,
        logs: &[NewRecipientLog],
    ) -> CampaignResult<CampaignRecord> {
        let sent = logs
            .iter()
            .filter(|l| l.status == RecipientLogStatus::Sent)
            .count() as i64;
        let failed = logs.len() as i64 - sent;
        let new_sent = campaign.sent_count + sent;
        let next = if new_sent >= campaign.total_recipients {
            CampaignStatus::Completed
        } else {
            CampaignStatus::InProgress
        };
        ensure_transition(campaign, next)?;

        let now = format_ts(self.clock.now_utc());
        let mut tx = self.db_pool.begin().await.map_err(anyhow::Error::from)?;

        // primero el candado: toma la escritura y corta si ya no es nuestro
        self.lock_service.renew_on(&mut tx, lock).await?;

        insert_logs(&mut tx, &campaign.id, logs, &now).await?;
        self.quota_service
            .release_reserved(&mut tx, reservation, failed)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET sent_count = sent_count + ?2,
                failed_count = failed_count + ?3,
                status = ?4,
                last_batch_sent_at = ?5,
                completed_at = ?6,
                updated_at = ?5
            WHERE id = ?1 AND status = ?7
            "#,
        )
        .bind(&campaign.id)
        .bind(sent)
        .bind(failed)
        .bind(next.as_str())
        .bind(&now)
        .bind((next == CampaignStatus::Completed).then(|| now.clone()))
        .bind(campaign.status.as_str())
        .execute(&mut *tx)
        .await
        .context("Fallo al actualizar progreso de campaña")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "La campaña {} cambió de estado mientras se enviaba el lote",
                campaign.id
            )
            .into());
        }

        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(self.reload(&campaign.id).await?)
    }

    async fn record_total_failure(
        &self,
        campaign: &CampaignRecord,
        reservation: &QuotaReservation,
        lock: &LockToken,
        reason: &str,
    ) -> CampaignResult<CampaignRecord> {
        ensure_transition(campaign, CampaignStatus::Failed)?;
        let now = format_ts(self.clock.now_utc());
        let mut tx = self.db_pool.begin().await.map_err(anyhow::Error::from)?;

        self.lock_service.renew_on(&mut tx, lock).await?;

        self.quota_service
            .release_reserved(&mut tx, reservation, reservation.count)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?2,
                error_message = ?3,
                updated_at = ?4
            WHERE id = ?1 AND status = ?5
            "#,
        )
        .bind(&campaign.id)
        .bind(CampaignStatus::Failed.as_str())
        .bind(reason)
        .bind(&now)
        .bind(campaign.status.as_str())
        .execute(&mut *tx)
        .await
        .context("Fallo al marcar campaña como fallida")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "La campaña {} cambió de estado antes de marcarla fallida",
                campaign.id
            )
            .into());
        }

        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(self.reload(&campaign.id).await?)
    }
}

fn ensure_transition(campaign: &CampaignRecord, next: CampaignStatus) -> Result<()> {
    if campaign.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(anyhow!(
            "Transición inválida de la campaña {}: {} -> {}",
            campaign.id,
            campaign.status,
            next
        ))
    }
}

fn to_log(recipient: Recipient, outcome: DeliveryOutcome) -> NewRecipientLog {
    let (status, external_message_id, error_message) = match outcome {
        DeliveryOutcome::Delivered { external_id } => (RecipientLogStatus::Sent, external_id, None),
        DeliveryOutcome::Failed { external_id, error } => {
            (RecipientLogStatus::Failed, external_id, Some(error))
        }
    };
    NewRecipientLog {
        contact_id: Some(recipient.contact_id),
        address: recipient.address,
        status,
        external_message_id,
        error_message,
    }
}

async fn insert_logs(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    logs: &[NewRecipientLog],
    created_at: &str,
) -> Result<()> {
    for log_row in logs {
        sqlx::query(
            r#"
            INSERT INTO campaign_recipient_logs (
                id, campaign_id, contact_id, address, status,
                external_message_id, error_message, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(campaign_id)
        .bind(&log_row.contact_id)
        .bind(&log_row.address)
        .bind(log_row.status.as_str())
        .bind(&log_row.external_message_id)
        .bind(&log_row.error_message)
        .bind(created_at)
        .execute(&mut *conn)
        .await
        .context("Fallo al insertar log de destinatario")?;
    }
    Ok(())
}
