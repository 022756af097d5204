//! services/quota_service.rs
//! Cupo diario de envíos por canal. Una fila por canal y día en `quota_ledger`.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use sqlx::{Pool, Sqlite, SqliteConnection};

use crate::{
    clock::Clock,
    config::campaign_config::CampaignConfig,
    db::format_ts,
    errors::{CampaignError, CampaignResult},
    models::quota_model::{QuotaChannel, QuotaReservation, QuotaStatus},
};

#[derive(Clone)]
pub struct QuotaService {
    db_pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    email_daily_limit: i64,
    sms_daily_limit: i64,
}

impl QuotaService {
    pub fn new(db_pool: Pool<Sqlite>, clock: Arc<dyn Clock>, config: &CampaignConfig) -> Self {
        QuotaService {
            db_pool,
            clock,
            email_daily_limit: config.email_daily_limit,
            sms_daily_limit: config.sms_daily_limit,
        }
    }

    fn daily_limit(&self, channel: QuotaChannel) -> i64 {
        match channel {
            QuotaChannel::Email => self.email_daily_limit,
            QuotaChannel::Sms => self.sms_daily_limit,
        }
    }

    /// Aparta `n` envíos de hoy. Si no caben todos no se aparta ninguno.
    pub async fn reserve(&self, channel: QuotaChannel, n: i64) -> CampaignResult<QuotaReservation> {
        if n < 0 {
            return Err(CampaignError::InvalidRequest(format!(
                "No se puede reservar un cupo negativo ({})",
                n
            )));
        }
        let date = self.clock.today();
        let mut conn = self
            .db_pool
            .acquire()
            .await
            .context("No se pudo obtener conexión para el cupo")?;
        self.ensure_row(&mut conn, channel, date).await?;

        // chequeo e incremento en la misma sentencia
        let result = sqlx::query(
            r#"
            UPDATE quota_ledger
            SET used_count = used_count + ?1,
                updated_at = ?4
            WHERE channel = ?2 AND date = ?3
              AND used_count + ?1 <= daily_limit
            "#,
        )
        .bind(n)
        .bind(channel.as_str())
        .bind(date.to_string())
        .bind(format_ts(self.clock.now_utc()))
        .execute(&mut *conn)
        .await
        .context("Fallo al reservar cupo")?;

        if result.rows_affected() == 0 {
            let (used, limit) = self.read_row(&mut conn, channel, date).await?;
            log::warn!(
                "(reserve) Cupo {} agotado: usados={}, límite={}, pedidos={}",
                channel,
                used,
                limit,
                n
            );
            return Err(CampaignError::QuotaExceeded {
                channel,
                requested: n,
                used,
                limit,
            });
        }

        log::info!("(reserve) Reservados {} envíos de {} para {}", n, channel, date);
        Ok(QuotaReservation {
            channel,
            date,
            count: n,
        })
    }

    /// Aparta lo que quepa hoy de `wanted` (al menos uno). Sin cupo libre
    /// falla con `QuotaExceeded`.
    pub async fn reserve_up_to(
        &self,
        channel: QuotaChannel,
        wanted: i64,
    ) -> CampaignResult<QuotaReservation> {
        let status = self.current_status(channel).await?;
        if status.available <= 0 {
            return Err(CampaignError::QuotaExceeded {
                channel,
                requested: wanted,
                used: status.used,
                limit: status.limit,
            });
        }
        let batch_size = wanted.min(status.available);
        if batch_size < wanted {
            log::info!(
                "(reserve_up_to) Cupo {} disponible {} < {} pendientes; lote parcial",
                channel,
                status.available,
                wanted
            );
        }
        self.reserve(channel, batch_size).await
    }

    /// Devuelve `n` envíos al cupo de hoy (nunca baja de cero).
    pub async fn release(&self, channel: QuotaChannel, n: i64) -> Result<()> {
        let mut conn = self.db_pool.acquire().await?;
        let date = self.clock.today();
        self.release_on(&mut conn, channel, date, n).await
    }

    /// Devuelve una reserva completa (compensación cuando el lote no llega a salir)
    pub async fn cancel_reservation(&self, reservation: &QuotaReservation) -> Result<()> {
        let mut conn = self.db_pool.acquire().await?;
        self.release_reserved(&mut conn, reservation, reservation.count)
            .await
    }

    /// Devuelve parte (o todo) de una reserva, dentro de la conexión o
    /// transacción que recibe.
    pub async fn release_reserved(
        &self,
        conn: &mut SqliteConnection,
        reservation: &QuotaReservation,
        n: i64,
    ) -> Result<()> {
        if n > reservation.count {
            return Err(anyhow!(
                "Se intentó liberar {} de una reserva de {}",
                n,
                reservation.count
            ));
        }
        self.release_on(conn, reservation.channel, reservation.date, n)
            .await
    }

    async fn release_on(
        &self,
        conn: &mut SqliteConnection,
        channel: QuotaChannel,
        date: NaiveDate,
        n: i64,
    ) -> Result<()> {
        if n <= 0 {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE quota_ledger
            SET used_count = MAX(used_count - ?1, 0),
                updated_at = ?4
            WHERE channel = ?2 AND date = ?3
            "#,
        )
        .bind(n)
        .bind(channel.as_str())
        .bind(date.to_string())
        .bind(format_ts(self.clock.now_utc()))
        .execute(&mut *conn)
        .await
        .context("Fallo al liberar cupo")?;

        log::info!("(release) Liberados {} envíos de {} del {}", n, channel, date);
        Ok(())
    }

    pub async fn current_status(&self, channel: QuotaChannel) -> Result<QuotaStatus> {
        let date = self.clock.today();
        let mut conn = self.db_pool.acquire().await?;
        self.ensure_row(&mut conn, channel, date).await?;
        let (used, limit) = self.read_row(&mut conn, channel, date).await?;

        Ok(QuotaStatus {
            channel,
            date,
            used,
            limit,
            available: (limit - used).max(0),
        })
    }

    /// La fila del día se crea al primer uso con el límite configurado
    async fn ensure_row(
        &self,
        conn: &mut SqliteConnection,
        channel: QuotaChannel,
        date: NaiveDate,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_ledger (channel, date, used_count, daily_limit, updated_at)
            VALUES (?1, ?2, 0, ?3, ?4)
            ON CONFLICT(channel, date) DO NOTHING
            "#,
        )
        .bind(channel.as_str())
        .bind(date.to_string())
        .bind(self.daily_limit(channel))
        .bind(format_ts(self.clock.now_utc()))
        .execute(&mut *conn)
        .await
        .context("Fallo al crear la fila de cupo del día")?;
        Ok(())
    }

    async fn read_row(
        &self,
        conn: &mut SqliteConnection,
        channel: QuotaChannel,
        date: NaiveDate,
    ) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            r#"SELECT used_count, daily_limit FROM quota_ledger WHERE channel = ?1 AND date = ?2"#,
        )
        .bind(channel.as_str())
        .bind(date.to_string())
        .fetch_one(&mut *conn)
        .await
        .context("No se encontró la fila de cupo")?;
        Ok(row)
    }
}
