//! services/mod.rs
//! Módulo que agrupa distintos "servicios" o "capas de negocio" de la app.

pub mod campaign_runner;
pub mod campaign_service;
pub mod contact_service;
pub mod email_provider;
pub mod lock_service;
pub mod newsletter_service;
pub mod quota_service;
pub mod sms_campaign_service;
pub mod sms_estimate_service;
pub mod sms_provider;
pub mod template_service;
