//! handlers/quota_handler.rs
use actix_web::{web, HttpResponse};

use crate::models::quota_model::QuotaChannel;
use crate::services::quota_service::QuotaService;

async fn quota_status(quota_service: &QuotaService, channel: QuotaChannel) -> HttpResponse {
    match quota_service.current_status(channel).await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => {
            log::error!("Error consultando cupo {}: {:?}", channel, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "success": false,
                "message": "No se pudo consultar el cupo"
            }))
        }
    }
}

/// GET /api/quota/email
pub async fn email_quota_endpoint(quota_service: web::Data<QuotaService>) -> HttpResponse {
    quota_status(&quota_service, QuotaChannel::Email).await
}

/// GET /api/quota/sms
pub async fn sms_quota_endpoint(quota_service: web::Data<QuotaService>) -> HttpResponse {
    quota_status(&quota_service, QuotaChannel::Sms).await
}
