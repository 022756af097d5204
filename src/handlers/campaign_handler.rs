//! handlers/campaign_handler.rs
//! Endpoints de campañas. Todo error termina en `{success: false, message}`.

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{
    errors::{CampaignError, CampaignResult},
    models::campaign_model::{
        CampaignActionResponse, ContinueSmsCampaignRequest, PaginationQuery,
        SendNewsletterRequest, SendSmsCampaignRequest, SmsEstimateRequest,
    },
    services::{
        campaign_service::CampaignService, newsletter_service::NewsletterService,
        sms_campaign_service::SmsCampaignService,
    },
};

/// Convierte el resultado de una acción en la respuesta uniforme
fn action_response(result: CampaignResult<CampaignActionResponse>) -> HttpResponse {
    match result {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(e) => error_response(e),
    }
}

fn error_response(e: CampaignError) -> HttpResponse {
    match &e {
        CampaignError::Internal(inner) => log::error!("Error interno en campaña: {:?}", inner),
        other => log::warn!("Acción de campaña rechazada: {}", other),
    }
    HttpResponse::build(e.status_code()).json(CampaignActionResponse::from_error(&e))
}

/// POST /api/campaigns/email
pub async fn send_newsletter_endpoint(
    newsletter_service: web::Data<NewsletterService>,
    body: web::Json<SendNewsletterRequest>,
) -> HttpResponse {
    action_response(
        newsletter_service
            .send_batch_newsletter(body.into_inner())
            .await,
    )
}

/// POST /api/campaigns/email/{id}/continue
pub async fn continue_newsletter_endpoint(
    newsletter_service: web::Data<NewsletterService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    action_response(newsletter_service.continue_campaign(&campaign_id).await)
}

/// POST /api/campaigns/sms
pub async fn send_sms_campaign_endpoint(
    sms_service: web::Data<SmsCampaignService>,
    body: web::Json<SendSmsCampaignRequest>,
) -> HttpResponse {
    action_response(sms_service.send_sms_campaign(body.into_inner()).await)
}

/// POST /api/campaigns/sms/{id}/continue
pub async fn continue_sms_campaign_endpoint(
    sms_service: web::Data<SmsCampaignService>,
    path: web::Path<String>,
    body: Option<web::Json<ContinueSmsCampaignRequest>>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    let override_hours = body.map(|b| b.override_hours).unwrap_or(false);
    action_response(
        sms_service
            .continue_sms_campaign(&campaign_id, override_hours)
            .await,
    )
}

/// POST /api/campaigns/sms/estimate
pub async fn estimate_sms_endpoint(
    sms_service: web::Data<SmsCampaignService>,
    body: web::Json<SmsEstimateRequest>,
) -> HttpResponse {
    match sms_service.estimate(&body.message).await {
        Ok(estimate) => HttpResponse::Ok().json(json!({
            "success": true,
            "estimate": estimate
        })),
        Err(e) => error_response(e),
    }
}

/// GET /api/campaigns
pub async fn list_campaigns_endpoint(
    campaign_service: web::Data<CampaignService>,
    query: web::Query<PaginationQuery>,
) -> HttpResponse {
    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(10);

    match campaign_service.list_campaigns(page, page_size).await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(e.into()),
    }
}

/// GET /api/campaigns/{id}
pub async fn get_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    match campaign_service.get_campaign(&campaign_id).await {
        Ok(Some(campaign)) => HttpResponse::Ok().json(campaign),
        Ok(None) => error_response(CampaignError::CampaignNotFound(campaign_id)),
        Err(e) => error_response(e.into()),
    }
}

/// GET /api/campaigns/{id}/logs
pub async fn campaign_logs_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    match campaign_service.get_campaign(&campaign_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(CampaignError::CampaignNotFound(campaign_id)),
        Err(e) => return error_response(e.into()),
    }
    match campaign_service.list_recipient_logs(&campaign_id).await {
        Ok(logs) => HttpResponse::Ok().json(logs),
        Err(e) => error_response(e.into()),
    }
}
