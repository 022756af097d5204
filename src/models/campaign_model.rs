use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CampaignError;
use crate::models::delivery_model::SmsEstimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignKind {
    Email,
    Sms,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignKind::Email => "email",
            CampaignKind::Sms => "sms",
        }
    }
}

impl FromStr for CampaignKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(CampaignKind::Email),
            "sms" => Ok(CampaignKind::Sms),
            other => Err(anyhow!("Tipo de campaña desconocido: {}", other)),
        }
    }
}

/// Estados de una campaña.
///
/// `sending -> {in_progress, completed, failed}` y `in_progress -> sending`
/// al reanudar. `completed` y `failed` son terminales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Sending,
    InProgress,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Sending => "sending",
            CampaignStatus::InProgress => "in_progress",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        match (self, next) {
            (Sending, InProgress) | (Sending, Completed) | (Sending, Failed) => true,
            (InProgress, Sending) => true,
            // reanudar sin pendientes cierra la campaña sin enviar
            (InProgress, Completed) => true,
            (Sending, Sending)
            | (InProgress, InProgress)
            | (InProgress, Failed)
            | (Completed, _)
            | (Failed, _) => false,
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sending" => Ok(CampaignStatus::Sending),
            "in_progress" => Ok(CampaignStatus::InProgress),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(anyhow!("Estado de campaña desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignRecord {
    pub id: String,
    pub kind: CampaignKind,
    pub name: String,
    pub subject: Option<String>,
    pub content: String,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub status: CampaignStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_batch_sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CampaignRecord {
    pub fn remaining(&self) -> i64 {
        (self.total_recipients - self.sent_count).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientLogStatus {
    Sent,
    Failed,
}

impl RecipientLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientLogStatus::Sent => "sent",
            RecipientLogStatus::Failed => "failed",
        }
    }
}

impl FromStr for RecipientLogStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(RecipientLogStatus::Sent),
            "failed" => Ok(RecipientLogStatus::Failed),
            other => Err(anyhow!("Estado de log desconocido: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignRecipientLog {
    pub id: String,
    pub campaign_id: String,
    pub contact_id: Option<String>,
    pub address: String,
    pub status: RecipientLogStatus,
    pub external_message_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fila a insertar después de un lote
#[derive(Debug, Clone)]
pub struct NewRecipientLog {
    pub contact_id: Option<String>,
    pub address: String,
    pub status: RecipientLogStatus,
    pub external_message_id: Option<String>,
    pub error_message: Option<String>,
}

// ----------------------------------------------------------------
// Requests
// ----------------------------------------------------------------

/// POST /api/campaigns/email
#[derive(Debug, Clone, Deserialize)]
pub struct SendNewsletterRequest {
    pub subject: String,
    /// HTML; admite `{{name}}`
    pub content: String,
    pub name: Option<String>,
}

/// POST /api/campaigns/sms
#[derive(Debug, Clone, Deserialize)]
pub struct SendSmsCampaignRequest {
    pub message: String,
    pub name: Option<String>,
    /// Envía solo a SMS_TEST_NUMBERS, sin campaña ni cupo
    #[serde(default)]
    pub test_mode: bool,
    /// Ignora la ventana horaria
    #[serde(default)]
    pub override_hours: bool,
}

/// POST /api/campaigns/sms/{id}/continue
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContinueSmsCampaignRequest {
    #[serde(default)]
    pub override_hours: bool,
}

/// POST /api/campaigns/sms/estimate
#[derive(Debug, Clone, Deserialize)]
pub struct SmsEstimateRequest {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// Para listar campañas con paginación
#[derive(Debug, Clone, Serialize)]
pub struct ListCampaignsResponse {
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub items: Vec<CampaignRecord>,
}

// ----------------------------------------------------------------
// Respuesta uniforme de las acciones de campaña
// ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CampaignActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_recipients: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CampaignStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<SmsEstimate>,
}

impl CampaignActionResponse {
    pub fn message(success: bool, message: impl Into<String>) -> Self {
        CampaignActionResponse {
            success,
            message: message.into(),
            campaign_id: None,
            sent_count: None,
            failed_count: None,
            total_recipients: None,
            remaining: None,
            status: None,
            estimate: None,
        }
    }

    /// `sent_count`/`failed_count` son los del lote, no los acumulados
    pub fn for_batch(
        message: impl Into<String>,
        campaign: &CampaignRecord,
        batch_sent: i64,
        batch_failed: i64,
    ) -> Self {
        CampaignActionResponse {
            campaign_id: Some(campaign.id.clone()),
            sent_count: Some(batch_sent),
            failed_count: Some(batch_failed),
            total_recipients: Some(campaign.total_recipients),
            remaining: Some(campaign.remaining()),
            status: Some(campaign.status),
            ..CampaignActionResponse::message(true, message)
        }
    }

    pub fn from_error(err: &CampaignError) -> Self {
        let mut resp = CampaignActionResponse::message(false, err.user_message());
        if let CampaignError::ProviderSendFailure {
            campaign_id: Some(id),
            ..
        } = err
        {
            resp.campaign_id = Some(id.clone());
            resp.status = Some(CampaignStatus::Failed);
        }
        resp
    }

    pub fn with_estimate(mut self, estimate: SmsEstimate) -> Self {
        self.estimate = Some(estimate);
        self
    }
}
