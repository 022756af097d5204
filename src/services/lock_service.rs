//! services/lock_service.rs
//! Candado global de envío de campañas (email y SMS comparten uno).
//!
//! Es una fila con token de dueño y expiración: solo quien tiene el token
//! puede renovarlo o liberarlo, y si el proceso muere el candado vence solo.
//! Quien envía renueva antes de cada llamada al proveedor y vuelve a
//! comprobar el token dentro de la transacción que cierra el lote.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use sqlx::{Executor, Pool, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{format_ts, parse_ts},
    errors::{CampaignError, CampaignResult},
};

pub const CAMPAIGN_SEND_LOCK: &str = "campaign_send";

/// Prueba de que se tiene el candado
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub token: String,
}

/// Candado en uso: lo que necesita un envío para renovarlo entre llamadas
pub struct Lease<'a> {
    service: &'a CampaignLockService,
    lock: &'a LockToken,
}

impl Lease<'_> {
    pub async fn renew(&self) -> CampaignResult<()> {
        self.service.renew(self.lock).await
    }
}

#[derive(Clone)]
pub struct CampaignLockService {
    db_pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl CampaignLockService {
    pub fn new(db_pool: Pool<Sqlite>, clock: Arc<dyn Clock>, window_minutes: i64) -> Self {
        CampaignLockService {
            db_pool,
            clock,
            window: Duration::minutes(window_minutes),
        }
    }

    pub async fn acquire(&self) -> CampaignResult<LockToken> {
        let now = self.clock.now_utc();
        let token = Uuid::new_v4().to_string();
        let now_str = format_ts(now);
        let expires_str = format_ts(now + self.window);

        // solo pisa una fila vencida
        let result = sqlx::query(
            r#"
            INSERT INTO campaign_locks (name, token, campaign_id, acquired_at, expires_at)
            VALUES (?1, ?2, NULL, ?3, ?4)
            ON CONFLICT(name) DO UPDATE SET
                token = excluded.token,
                campaign_id = NULL,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE campaign_locks.expires_at <= excluded.acquired_at
            "#,
        )
        .bind(CAMPAIGN_SEND_LOCK)
        .bind(&token)
        .bind(&now_str)
        .bind(&expires_str)
        .execute(&self.db_pool)
        .await
        .context("Fallo al tomar el candado de campañas")?;

        if result.rows_affected() == 0 {
            let (expires_at, campaign_id): (String, Option<String>) = sqlx::query_as(
                r#"SELECT expires_at, campaign_id FROM campaign_locks WHERE name = ?1"#,
            )
            .bind(CAMPAIGN_SEND_LOCK)
            .fetch_one(&self.db_pool)
            .await
            .context("Fallo al leer el candado de campañas")?;

            let expires_at = parse_ts(&expires_at)?;
            let seconds_left = (expires_at - now).num_seconds().max(0);
            let wait_minutes = ((seconds_left + 59) / 60).max(1);
            log::warn!(
                "(acquire) Candado ocupado (campaña={:?}), vence en {}s",
                campaign_id,
                seconds_left
            );
            return Err(CampaignError::CampaignLocked { wait_minutes });
        }

        log::info!("(acquire) Candado de campañas tomado hasta {}", expires_str);
        Ok(LockToken { token })
    }

    pub fn lease<'a>(&'a self, lock: &'a LockToken) -> Lease<'a> {
        Lease {
            service: self,
            lock,
        }
    }

    /// Extiende la expiración a ahora + ventana. Falla con `LockLost` si el
    /// token ya no es el dueño.
    pub async fn renew(&self, lock: &LockToken) -> CampaignResult<()> {
        self.renew_with(&self.db_pool, lock).await
    }

    /// Igual que `renew` pero dentro de una transacción ajena: si otro tomó
    /// el candado, la transacción no debe confirmarse.
    pub async fn renew_on(&self, conn: &mut SqliteConnection, lock: &LockToken) -> CampaignResult<()> {
        self.renew_with(conn, lock).await
    }

    async fn renew_with<'e, E>(&self, executor: E, lock: &LockToken) -> CampaignResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let expires_str = format_ts(self.clock.now_utc() + self.window);
        let result = sqlx::query(
            r#"UPDATE campaign_locks SET expires_at = ?1 WHERE name = ?2 AND token = ?3"#,
        )
        .bind(&expires_str)
        .bind(CAMPAIGN_SEND_LOCK)
        .bind(&lock.token)
        .execute(executor)
        .await
        .context("Fallo al renovar el candado de campañas")?;

        if result.rows_affected() == 0 {
            log::error!("(renew) El candado venció y otro proceso lo tomó");
            return Err(CampaignError::LockLost);
        }
        log::debug!("(renew) Candado renovado hasta {}", expires_str);
        Ok(())
    }

    /// Anota qué campaña tiene el candado (informativo)
    pub async fn attach(&self, lock: &LockToken, campaign_id: &str) -> Result<()> {
        sqlx::query(r#"UPDATE campaign_locks SET campaign_id = ?1 WHERE name = ?2 AND token = ?3"#)
            .bind(campaign_id)
            .bind(CAMPAIGN_SEND_LOCK)
            .bind(&lock.token)
            .execute(&self.db_pool)
            .await
            .context("Fallo al asociar campaña al candado")?;
        Ok(())
    }

    /// Libera solo si el token sigue siendo el dueño
    pub async fn release(&self, lock: &LockToken) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM campaign_locks WHERE name = ?1 AND token = ?2"#)
            .bind(CAMPAIGN_SEND_LOCK)
            .bind(&lock.token)
            .execute(&self.db_pool)
            .await
            .context("Fallo al liberar el candado de campañas")?;

        if result.rows_affected() == 0 {
            log::warn!("(release) El candado ya no era nuestro (venció y otro lo tomó)");
        } else {
            log::info!("(release) Candado de campañas liberado");
        }
        Ok(())
    }
}
