//! config/campaign_config.rs
//! Configuración de campañas: cupos diarios, candado, proveedores y ventana de SMS.
//! Se lee del entorno (.env cargado con dotenv en main.rs).

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::delivery_model::SmsSender;

/// Proveedor de email a usar para las campañas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProviderKind {
    Resend,
    Smtp,
}

impl FromStr for EmailProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "resend" => Ok(EmailProviderKind::Resend),
            "smtp" => Ok(EmailProviderKind::Smtp),
            other => Err(anyhow!("EMAIL_PROVIDER desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub database_url: String,
    pub bind_addr: String,

    // Email
    pub email_provider: EmailProviderKind,
    pub email_from: String,
    pub resend_api_key: Option<String>,
    pub resend_base_url: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,

    // SMS (Twilio)
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub twilio_messaging_service_sid: Option<String>,
    pub twilio_base_url: String,

    // Cupos y ritmo de envío
    pub email_daily_limit: i64,
    pub sms_daily_limit: i64,
    pub lock_window_minutes: i64,
    pub send_delay_ms: u64,

    // Reglas de SMS
    pub sms_allowed_start_hour: u32, // inclusive
    pub sms_allowed_end_hour: u32,   // exclusiva
    pub sms_cost_per_segment: f64,   // USD
    pub sms_default_country_code: String,
    pub sms_test_numbers: Vec<String>,

    /// Se usa en `{{name}}` cuando el contacto no tiene nombre
    pub default_recipient_name: String,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        CampaignConfig {
            database_url: "sqlite:data/campaigns.db".to_string(),
            bind_addr: "0.0.0.0:5022".to_string(),
            email_provider: EmailProviderKind::Resend,
            email_from: "Newsletter <newsletter@example.com>".to_string(),
            resend_api_key: None,
            resend_base_url: "https://api.resend.com".to_string(),
            smtp_host: None,
            smtp_port: 587,
            smtp_user: None,
            smtp_pass: None,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_from_number: None,
            twilio_messaging_service_sid: None,
            twilio_base_url: "https://api.twilio.com".to_string(),
            email_daily_limit: 100,
            sms_daily_limit: 200,
            lock_window_minutes: 10,
            send_delay_ms: 1000,
            sms_allowed_start_hour: 9,
            sms_allowed_end_hour: 20,
            sms_cost_per_segment: 0.0079,
            sms_default_country_code: "+1".to_string(),
            sms_test_numbers: vec![],
            default_recipient_name: "Cliente".to_string(),
        }
    }
}

impl CampaignConfig {
    /// Lee la configuración del entorno; lo que no esté definido toma el default.
    pub fn from_env() -> Result<Self> {
        let d = CampaignConfig::default();

        let email_provider = match env_string("EMAIL_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => d.email_provider,
        };

        let config = CampaignConfig {
            database_url: env_string("DATABASE_URL").unwrap_or(d.database_url),
            bind_addr: env_string("BIND_ADDR").unwrap_or(d.bind_addr),
            email_provider,
            email_from: env_string("EMAIL_FROM").unwrap_or(d.email_from),
            resend_api_key: env_string("RESEND_API_KEY"),
            resend_base_url: env_string("RESEND_BASE_URL").unwrap_or(d.resend_base_url),
            smtp_host: env_string("SMTP_HOST"),
            smtp_port: env_parse("SMTP_PORT", d.smtp_port)?,
            smtp_user: env_string("SMTP_USER"),
            smtp_pass: env_string("SMTP_PASS"),
            twilio_account_sid: env_string("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_string("TWILIO_AUTH_TOKEN"),
            twilio_from_number: env_string("TWILIO_FROM_NUMBER"),
            twilio_messaging_service_sid: env_string("TWILIO_MESSAGING_SERVICE_SID"),
            twilio_base_url: env_string("TWILIO_BASE_URL").unwrap_or(d.twilio_base_url),
            email_daily_limit: env_parse("EMAIL_DAILY_LIMIT", d.email_daily_limit)?,
            sms_daily_limit: env_parse("SMS_DAILY_LIMIT", d.sms_daily_limit)?,
            lock_window_minutes: env_parse("CAMPAIGN_LOCK_MINUTES", d.lock_window_minutes)?,
            send_delay_ms: env_parse("SEND_DELAY_MS", d.send_delay_ms)?,
            sms_allowed_start_hour: env_parse("SMS_ALLOWED_START_HOUR", d.sms_allowed_start_hour)?,
            sms_allowed_end_hour: env_parse("SMS_ALLOWED_END_HOUR", d.sms_allowed_end_hour)?,
            sms_cost_per_segment: env_parse("SMS_COST_PER_SEGMENT", d.sms_cost_per_segment)?,
            sms_default_country_code: env_string("SMS_DEFAULT_COUNTRY_CODE")
                .unwrap_or(d.sms_default_country_code),
            sms_test_numbers: env_string("SMS_TEST_NUMBERS")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            default_recipient_name: env_string("DEFAULT_RECIPIENT_NAME")
                .unwrap_or(d.default_recipient_name),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.email_daily_limit < 0 || self.sms_daily_limit < 0 {
            return Err(anyhow!("Los límites diarios no pueden ser negativos"));
        }
        if self.lock_window_minutes <= 0 {
            return Err(anyhow!("CAMPAIGN_LOCK_MINUTES debe ser mayor que 0"));
        }
        if self.sms_allowed_start_hour >= self.sms_allowed_end_hour
            || self.sms_allowed_end_hour > 24
        {
            return Err(anyhow!(
                "Ventana de SMS inválida: {}-{}",
                self.sms_allowed_start_hour,
                self.sms_allowed_end_hour
            ));
        }

        // un día completo de pausas tiene que caber en la ventana del candado
        let window_ms = self.lock_window_minutes as u64 * 60_000;
        let mut paced = vec![("SMS_DAILY_LIMIT", self.sms_daily_limit)];
        if self.email_provider == EmailProviderKind::Smtp {
            paced.push(("EMAIL_DAILY_LIMIT", self.email_daily_limit));
        }
        for (key, limit) in paced {
            let pauses_ms = (limit as u64).saturating_mul(self.send_delay_ms);
            if pauses_ms >= window_ms {
                return Err(anyhow!(
                    "{} x SEND_DELAY_MS ({} ms) no cabe en CAMPAIGN_LOCK_MINUTES ({} ms)",
                    key,
                    pauses_ms,
                    window_ms
                ));
            }
        }
        Ok(())
    }

    /// Remitente de SMS: el Messaging Service tiene prioridad sobre el número fijo.
    pub fn sms_sender(&self) -> Result<SmsSender> {
        if let Some(sid) = &self.twilio_messaging_service_sid {
            return Ok(SmsSender::MessagingService(sid.clone()));
        }
        self.twilio_from_number
            .clone()
            .map(SmsSender::From)
            .ok_or_else(|| {
                anyhow!("Falta TWILIO_FROM_NUMBER o TWILIO_MESSAGING_SERVICE_SID para enviar SMS")
            })
    }
}

/// Variable de entorno no vacía
fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("Valor inválido para {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

/// "a, b,,c" -> ["a", "b", "c"]
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
