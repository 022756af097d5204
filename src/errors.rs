//! errors.rs
//! Errores visibles para quien dispara una campaña. Todos terminan como
//! `{success: false, message}` en el handler.

use actix_web::http::StatusCode;
use thiserror::Error;

use crate::models::quota_model::QuotaChannel;

pub type CampaignResult<T> = std::result::Result<T, CampaignError>;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error(
        "Límite diario de {channel} alcanzado: {used}/{limit} usados hoy, se necesitan {requested}. Intenta mañana"
    )]
    QuotaExceeded {
        channel: QuotaChannel,
        requested: i64,
        used: i64,
        limit: i64,
    },

    #[error("Hay otra campaña enviándose. Espera {wait_minutes} minuto(s) e intenta de nuevo")]
    CampaignLocked { wait_minutes: i64 },

    #[error("Se perdió el candado de envío a mitad del lote; revisa la campaña antes de continuar")]
    LockLost,

    #[error("No hay destinatarios con consentimiento de marketing para este canal")]
    NoEligibleRecipients,

    /// El proveedor no devolvió nada por ítem: lote completo perdido
    #[error("El proveedor rechazó el envío completo: {reason}")]
    ProviderSendFailure {
        campaign_id: Option<String>,
        reason: String,
    },

    #[error("Campaña {0} no encontrada")]
    CampaignNotFound(String),

    #[error("La campaña {0} ya está completada")]
    AlreadyCompleted(String),

    #[error("La campaña {0} falló y no se puede reanudar; crea una campaña nueva")]
    CampaignFailed(String),

    #[error("La campaña {0} ya envió un lote hoy; podrá continuar mañana")]
    AlreadySentToday(String),

    #[error(
        "Los SMS solo se envían entre las {start}:00 y las {end}:00 (ahora son las {hour}:{minute:02})"
    )]
    SmsOutsideAllowedHours {
        hour: u32,
        minute: u32,
        start: u32,
        end: u32,
    },

    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CampaignError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CampaignError::CampaignLocked { .. } | CampaignError::LockLost => StatusCode::CONFLICT,
            CampaignError::NoEligibleRecipients => StatusCode::UNPROCESSABLE_ENTITY,
            CampaignError::ProviderSendFailure { .. } => StatusCode::BAD_GATEWAY,
            CampaignError::CampaignNotFound(_) => StatusCode::NOT_FOUND,
            CampaignError::AlreadyCompleted(_)
            | CampaignError::CampaignFailed(_)
            | CampaignError::AlreadySentToday(_) => StatusCode::CONFLICT,
            CampaignError::SmsOutsideAllowedHours { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CampaignError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CampaignError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Mensaje para el operador; los errores internos no exponen detalles.
    pub fn user_message(&self) -> String {
        match self {
            CampaignError::Internal(_) => "Error interno procesando la solicitud".to_string(),
            other => other.to_string(),
        }
    }
}
