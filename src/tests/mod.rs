//! tests/mod.rs
//! Pruebas del servicio de campañas. Todas usan SQLite en memoria.

mod api_tests;
mod sms_tests;
mod support;
