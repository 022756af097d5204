use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;

use crate::clock::{Clock, SystemClock};
use crate::config::campaign_config::CampaignConfig;
use crate::logger::init_logger;
use crate::services::campaign_runner::CampaignRunner;
use crate::services::campaign_service::CampaignService;
use crate::services::contact_service::ContactService;
use crate::services::email_provider::build_email_provider;
use crate::services::lock_service::CampaignLockService;
use crate::services::newsletter_service::NewsletterService;
use crate::services::quota_service::QuotaService;
use crate::services::sms_campaign_service::{SmsCampaignService, SmsRules};
use crate::services::sms_provider::build_sms_provider;

mod app;
mod clock;
mod config;
mod db;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = CampaignConfig::from_env()?;

    // La carpeta de la DB tiene que existir antes de conectar
    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        if let Some(parent) = std::path::Path::new(path.trim_start_matches("//")).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    let db_pool = db::connect(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let quota_service = QuotaService::new(db_pool.clone(), clock.clone(), &config);
    let lock_service =
        CampaignLockService::new(db_pool.clone(), clock.clone(), config.lock_window_minutes);
    let contact_service = ContactService::new(db_pool.clone());
    let campaign_service = CampaignService::new(
        db_pool.clone(),
        quota_service.clone(),
        lock_service.clone(),
        clock.clone(),
    );
    let runner = CampaignRunner::new(
        campaign_service.clone(),
        quota_service.clone(),
        lock_service.clone(),
    );

    let newsletter_service = NewsletterService::new(
        contact_service.clone(),
        runner.clone(),
        build_email_provider(&config)?,
        config.email_from.clone(),
        config.default_recipient_name.clone(),
    );

    let sms_service = SmsCampaignService::new(
        contact_service.clone(),
        runner,
        build_sms_provider(&config)?,
        clock.clone(),
        SmsRules::from_config(&config)?,
    );

    // Levantar servidor
    log::info!("Levantando servidor en {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(quota_service.clone()))
            .app_data(web::Data::new(contact_service.clone()))
            .app_data(web::Data::new(campaign_service.clone()))
            .app_data(web::Data::new(newsletter_service.clone()))
            .app_data(web::Data::new(sms_service.clone()))
            .configure(app::init_app)
    })
    .workers(1)
    .bind(config.bind_addr.as_str())?
    .run()
    .await?;

    Ok(())
}
