//! config/mod.rs
//! Configuración global del servicio.

pub mod campaign_config;
