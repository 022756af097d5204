//! handlers/mod.rs
//! Módulo que agrupa los distintos handlers (campañas, cupo, contactos).
pub mod campaign_handler;
pub mod contact_handler;
pub mod quota_handler;
