//! models/delivery_model.rs
//! Lo que se le entrega a los proveedores (Resend/SMTP/Twilio) y lo que devuelven.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Twilio acepta `From` o `MessagingServiceSid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsSender {
    From(String),
    MessagingService(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSms {
    pub to: String,
    pub body: String,
    pub sender: SmsSender,
}

/// Resultado por destinatario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        external_id: Option<String>,
    },
    Failed {
        external_id: Option<String>,
        error: String,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Respuesta de la API de SMS para un mensaje
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SmsDeliveryResult {
    pub sid: Option<String>,
    pub status: String,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
}

impl SmsDeliveryResult {
    pub fn into_outcome(self) -> DeliveryOutcome {
        let failed_status = matches!(self.status.as_str(), "failed" | "undelivered");
        if failed_status || self.error_code.is_some() {
            let error = match (self.error_code, self.error_message) {
                (Some(code), Some(msg)) => format!("{} ({})", msg, code),
                (Some(code), None) => format!("Twilio error {}", code),
                (None, Some(msg)) => msg,
                (None, None) => format!("Estado '{}'", self.status),
            };
            DeliveryOutcome::Failed {
                external_id: self.sid,
                error,
            }
        } else {
            DeliveryOutcome::Delivered {
                external_id: self.sid,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SmsEncoding {
    Gsm7,
    Ucs2,
}

/// Estimación informativa; no se usa como presupuesto
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmsEstimate {
    /// UCS-2 si al menos un mensaje lo necesita
    pub encoding: SmsEncoding,
    /// Septetos (GSM-7) o unidades UTF-16 (UCS-2) del mensaje más largo
    pub units: usize,
    /// Máximo entre los mensajes personalizados
    pub segments_per_message: usize,
    pub recipients: usize,
    pub total_segments: usize,
    pub cost_per_segment: f64,
    pub estimated_cost: f64,
}
