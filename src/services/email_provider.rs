//! services/email_provider.rs
//! Proveedores de email para campañas: API batch de Resend o SMTP con lettre.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    config::campaign_config::{CampaignConfig, EmailProviderKind},
    models::delivery_model::{DeliveryOutcome, OutboundEmail},
};

/// Tope de ítems por llamada a `/emails/batch`
pub const RESEND_MAX_BATCH: usize = 100;

/// SMTP manda uno por uno: bloques chicos para renovar el candado seguido
pub const SMTP_CHUNK_SIZE: usize = 10;

#[async_trait]
pub trait EmailProvider: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Cuántos emails acepta en una sola llamada
    fn max_batch_size(&self) -> usize;

    /// Un resultado por email, en el mismo orden. `Err` = el proveedor no
    /// devolvió nada utilizable para ningún ítem.
    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<Vec<DeliveryOutcome>>;
}

pub fn build_email_provider(config: &CampaignConfig) -> Result<Arc<dyn EmailProvider>> {
    match config.email_provider {
        EmailProviderKind::Resend => {
            let api_key = config
                .resend_api_key
                .clone()
                .ok_or_else(|| anyhow!("Falta RESEND_API_KEY"))?;
            Ok(Arc::new(ResendEmailProvider::new(
                config.resend_base_url.clone(),
                api_key,
            )))
        }
        EmailProviderKind::Smtp => Ok(Arc::new(SmtpEmailProvider::from_config(config)?)),
    }
}

// ================================================================
// Resend
// ================================================================

#[derive(Clone)]
pub struct ResendEmailProvider {
    http_client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ResendBatchResponse {
    #[serde(default)]
    data: Vec<ResendItem>,
    #[serde(default)]
    errors: Vec<ResendItemError>,
}

#[derive(Debug, Deserialize)]
struct ResendItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResendItemError {
    index: usize,
    message: String,
}

impl ResendEmailProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        ResendEmailProvider {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl EmailProvider for ResendEmailProvider {
    fn name(&self) -> &'static str {
        "resend"
    }

    fn max_batch_size(&self) -> usize {
        RESEND_MAX_BATCH
    }

    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<Vec<DeliveryOutcome>> {
        if emails.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/emails/batch", self.base_url);
        let payload: Vec<serde_json::Value> = emails
            .iter()
            .map(|e| {
                serde_json::json!({
                    "from": e.from,
                    "to": [e.to],
                    "subject": e.subject,
                    "html": e.html,
                })
            })
            .collect();

        log::info!(
            "(send_batch) POST {} con {} emails",
            url,
            emails.len()
        );
        let resp = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            // en modo permissive Resend reporta errores por índice en vez de
            // rechazar todo el lote
            .header("x-batch-validation", "permissive")
            .json(&payload)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("Fallo al hacer POST a Resend")?;

        let status = resp.status();
        if !status.is_success() {
            let body_txt = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Resend respondió {}: {}", status, body_txt));
        }

        let body: ResendBatchResponse = resp
            .json()
            .await
            .context("Respuesta de Resend ilegible")?;
        map_resend_response(emails.len(), body)
    }
}

/// Reparte los ids y errores de Resend por posición.
fn map_resend_response(len: usize, body: ResendBatchResponse) -> Result<Vec<DeliveryOutcome>> {
    if body.data.is_empty() && body.errors.is_empty() {
        return Err(anyhow!("Resend no devolvió datos para el lote"));
    }

    let errors: HashMap<usize, String> = body
        .errors
        .into_iter()
        .map(|e| (e.index, e.message))
        .collect();
    let mut ids = body.data.into_iter().map(|d| d.id);

    let outcomes = (0..len)
        .map(|i| match errors.get(&i) {
            Some(message) => DeliveryOutcome::Failed {
                external_id: None,
                error: message.clone(),
            },
            None => match ids.next() {
                Some(id) => DeliveryOutcome::Delivered {
                    external_id: Some(id),
                },
                None => DeliveryOutcome::Failed {
                    external_id: None,
                    error: "Sin respuesta del proveedor para este destinatario".to_string(),
                },
            },
        })
        .collect();
    Ok(outcomes)
}

// ================================================================
// SMTP
// ================================================================

#[derive(Clone)]
pub struct SmtpEmailProvider {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    send_delay: Duration,
}

impl SmtpEmailProvider {
    pub fn from_config(config: &CampaignConfig) -> Result<Self> {
        let host = config
            .smtp_host
            .clone()
            .ok_or_else(|| anyhow!("Falta SMTP_HOST"))?;
        let user = config
            .smtp_user
            .clone()
            .ok_or_else(|| anyhow!("Falta SMTP_USER"))?;
        let pass = config
            .smtp_pass
            .clone()
            .ok_or_else(|| anyhow!("Falta SMTP_PASS"))?;

        let tls_params = TlsParameters::new(host.clone())?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(user, pass))
            .tls(Tls::Required(tls_params))
            .build();

        Ok(SmtpEmailProvider {
            mailer,
            send_delay: Duration::from_millis(config.send_delay_ms),
        })
    }

    async fn send_one(&self, email: &OutboundEmail) -> Result<Option<String>> {
        let from: Mailbox = email.from.parse().context("Invalid from address")?;
        let to: Mailbox = email.to.parse().context("Invalid recipient address")?;

        // Construir cuerpo en HTML
        let html_part = SinglePart::builder()
            .header(ContentType::parse("text/html; charset=utf-8")?)
            .body(email.html.clone());

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .singlepart(html_part)?;

        let response =
            tokio::time::timeout(Duration::from_secs(30), self.mailer.send(message)).await??;
        let id = response.message().next().map(|line| line.to_string());
        Ok(id)
    }
}

#[async_trait]
impl EmailProvider for SmtpEmailProvider {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn max_batch_size(&self) -> usize {
        SMTP_CHUNK_SIZE
    }

    async fn send_batch(&self, emails: &[OutboundEmail]) -> Result<Vec<DeliveryOutcome>> {
        let mut outcomes = Vec::with_capacity(emails.len());
        let mut last_error = None;

        // Enviar uno por uno, con pausa entre cada uno
        for (i, email) in emails.iter().enumerate() {
            if i > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            match self.send_one(email).await {
                Ok(external_id) => outcomes.push(DeliveryOutcome::Delivered { external_id }),
                Err(e) => {
                    log::error!("(send_batch) SMTP falló para {}: {:#}", email.to, e);
                    let error = format!("{:#}", e);
                    last_error = Some(e);
                    outcomes.push(DeliveryOutcome::Failed {
                        external_id: None,
                        error,
                    });
                }
            }
        }

        // si no salió ninguno, el servidor SMTP no está disponible
        if !emails.is_empty() && outcomes.iter().all(|o| !o.is_delivered()) {
            if let Some(e) = last_error {
                return Err(e.context("SMTP no entregó ningún email del lote"));
            }
        }
        Ok(outcomes)
    }
}
