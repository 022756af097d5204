//! app.rs
use crate::handlers::{campaign_handler, contact_handler, quota_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/campaigns")
                    .route(
                        "",
                        web::get().to(campaign_handler::list_campaigns_endpoint),
                    )
                    .route(
                        "/email",
                        web::post().to(campaign_handler::send_newsletter_endpoint),
                    )
                    .route(
                        "/email/{id}/continue",
                        web::post().to(campaign_handler::continue_newsletter_endpoint),
                    )
                    .route(
                        "/sms",
                        web::post().to(campaign_handler::send_sms_campaign_endpoint),
                    )
                    .route(
                        "/sms/estimate",
                        web::post().to(campaign_handler::estimate_sms_endpoint),
                    )
                    .route(
                        "/sms/{id}/continue",
                        web::post().to(campaign_handler::continue_sms_campaign_endpoint),
                    )
                    .route(
                        "/{id}",
                        web::get().to(campaign_handler::get_campaign_endpoint),
                    )
                    .route(
                        "/{id}/logs",
                        web::get().to(campaign_handler::campaign_logs_endpoint),
                    ),
            )
            .service(
                web::scope("/quota")
                    .route("/email", web::get().to(quota_handler::email_quota_endpoint))
                    .route("/sms", web::get().to(quota_handler::sms_quota_endpoint)),
            )
            .service(
                web::scope("/contacts")
                    .route("", web::post().to(contact_handler::create_contact_endpoint))
                    .route("", web::get().to(contact_handler::list_contacts_endpoint)),
            ),
    );
}
