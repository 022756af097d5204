use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ContactRecord {
    pub id: String,
    pub name: String,
    pub marketing_consent: bool,
    pub created_at: DateTime<Utc>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
}

/// Request para crear un contacto
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContactRequest {
    pub name: String,
    #[serde(default)]
    pub marketing_consent: bool,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
}

/// Un par (contacto, dirección) elegible para una campaña.
/// `address` es un email en minúsculas o un teléfono E.164.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub contact_id: String,
    pub name: String,
    pub address: String,
}
