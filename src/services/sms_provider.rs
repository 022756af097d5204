//! services/sms_provider.rs
//! Envío de SMS por la API REST de Twilio.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    config::campaign_config::CampaignConfig,
    models::delivery_model::{OutboundSms, SmsDeliveryResult, SmsSender},
};

#[async_trait]
pub trait SmsProvider: Send + Sync + 'static {
    /// `Err` solo para fallas de transporte; un rechazo de Twilio para ese
    /// número llega como `Ok` con estado `failed`.
    async fn send(&self, sms: &OutboundSms) -> Result<SmsDeliveryResult>;
}

pub fn build_sms_provider(config: &CampaignConfig) -> Result<Arc<dyn SmsProvider>> {
    let account_sid = config
        .twilio_account_sid
        .clone()
        .ok_or_else(|| anyhow!("Falta TWILIO_ACCOUNT_SID"))?;
    let auth_token = config
        .twilio_auth_token
        .clone()
        .ok_or_else(|| anyhow!("Falta TWILIO_AUTH_TOKEN"))?;
    Ok(Arc::new(TwilioSmsProvider::new(
        config.twilio_base_url.clone(),
        account_sid,
        auth_token,
    )))
}

#[derive(Clone)]
pub struct TwilioSmsProvider {
    http_client: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

/// Cuerpo de error de Twilio (4xx)
#[derive(Debug, Deserialize)]
struct TwilioError {
    code: Option<i64>,
    message: String,
}

impl TwilioSmsProvider {
    pub fn new(base_url: String, account_sid: String, auth_token: String) -> Self {
        TwilioSmsProvider {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
        }
    }
}

#[async_trait]
impl SmsProvider for TwilioSmsProvider {
    async fn send(&self, sms: &OutboundSms) -> Result<SmsDeliveryResult> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );
        let sender = match &sms.sender {
            SmsSender::From(number) => ("From", number.as_str()),
            SmsSender::MessagingService(sid) => ("MessagingServiceSid", sid.as_str()),
        };
        let form = [("To", sms.to.as_str()), ("Body", sms.body.as_str()), sender];

        let resp = self
            .http_client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("Fallo al hacer POST a Twilio")?;

        let status = resp.status();
        if status.is_success() {
            let result: SmsDeliveryResult = resp
                .json()
                .await
                .context("Respuesta de Twilio ilegible")?;
            log::info!(
                "(send) SMS a {} -> sid={:?}, status={}",
                sms.to,
                result.sid,
                result.status
            );
            return Ok(result);
        }

        let body_txt = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            // número inválido, no suscrito, etc.: falla solo este destinatario
            if let Ok(err) = serde_json::from_str::<TwilioError>(&body_txt) {
                log::warn!("(send) Twilio rechazó SMS a {}: {}", sms.to, err.message);
                return Ok(SmsDeliveryResult {
                    sid: None,
                    status: "failed".to_string(),
                    error_code: err.code,
                    error_message: Some(err.message),
                });
            }
        }
        Err(anyhow!("Twilio respondió {}: {}", status, body_txt))
    }
}
