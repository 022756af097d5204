use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Cada canal tiene su propio cupo diario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaChannel {
    Email,
    Sms,
}

impl QuotaChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaChannel::Email => "email",
            QuotaChannel::Sms => "sms",
        }
    }
}

impl fmt::Display for QuotaChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub channel: QuotaChannel,
    pub date: NaiveDate,
    pub used: i64,
    pub limit: i64,
    pub available: i64,
}

/// Cupo apartado para un lote. Guarda la fecha para devolverlo al mismo día
/// aunque el lote cruce la medianoche.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaReservation {
    pub channel: QuotaChannel,
    pub date: NaiveDate,
    pub count: i64,
}
