//! handlers/contact_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::errors::CampaignError;
use crate::models::contact_model::CreateContactRequest;
use crate::services::contact_service::ContactService;

/// POST /api/contacts
pub async fn create_contact_endpoint(
    contact_service: web::Data<ContactService>,
    body: web::Json<CreateContactRequest>,
) -> HttpResponse {
    match contact_service.create_contact(body.into_inner()).await {
        Ok(contact) => HttpResponse::Ok().json(contact),
        Err(e) => {
            match &e {
                CampaignError::Internal(inner) => log::error!("Error creando contacto: {:?}", inner),
                other => log::warn!("Contacto rechazado: {}", other),
            }
            HttpResponse::build(e.status_code()).json(json!({
                "success": false,
                "message": e.user_message()
            }))
        }
    }
}

/// GET /api/contacts
pub async fn list_contacts_endpoint(contact_service: web::Data<ContactService>) -> HttpResponse {
    match contact_service.list_contacts().await {
        Ok(contacts) => HttpResponse::Ok().json(contacts),
        Err(e) => {
            log::error!("Error listando contactos: {:?}", e);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "message": "No se pudieron listar los contactos"
            }))
        }
    }
}
