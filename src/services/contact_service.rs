//! services/contact_service.rs
//! Contactos, sus emails/teléfonos y la selección de destinatarios elegibles.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::{
    db::{format_ts, parse_ts},
    errors::{CampaignError, CampaignResult},
    models::contact_model::{ContactRecord, CreateContactRequest, Recipient},
};

#[derive(Clone)]
pub struct ContactService {
    db_pool: Pool<Sqlite>,
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: String,
    name: String,
    marketing_consent: bool,
    created_at: String,
}

#[derive(sqlx::FromRow)]
struct RecipientRow {
    contact_id: String,
    name: String,
    address: String,
}

impl ContactService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        ContactService { db_pool }
    }

    /// Datos inválidos son `InvalidRequest`; una falla de la DB es `Internal`.
    pub async fn create_contact(&self, req: CreateContactRequest) -> CampaignResult<ContactRecord> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(CampaignError::InvalidRequest(
                "El contacto necesita un nombre".to_string(),
            ));
        }

        let mut emails = Vec::new();
        for raw in &req.emails {
            let email = normalize_email(raw)
                .ok_or_else(|| CampaignError::InvalidRequest(format!("Email inválido: '{}'", raw)))?;
            if !emails.contains(&email) {
                emails.push(email);
            }
        }
        // los teléfonos se guardan como vienen; se normalizan al armar la campaña
        let mut phones = Vec::new();
        for raw in &req.phones {
            let phone = raw.trim().to_string();
            if !phone.is_empty() && !phones.contains(&phone) {
                phones.push(phone);
            }
        }

        let contact_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let created_str = format_ts(created_at);

        let mut tx = self
            .db_pool
            .begin()
            .await
            .context("Fallo al abrir transacción de contacto")?;

        sqlx::query(
            r#"
            INSERT INTO contacts (id, name, marketing_consent, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&contact_id)
        .bind(&name)
        .bind(req.marketing_consent)
        .bind(&created_str)
        .execute(&mut *tx)
        .await
        .context("Fallo al insertar contacto")?;

        for email in &emails {
            sqlx::query(
                r#"INSERT INTO contact_emails (id, contact_id, email, created_at) VALUES (?1, ?2, ?3, ?4)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&contact_id)
            .bind(email)
            .bind(&created_str)
            .execute(&mut *tx)
            .await
            .context("Fallo al insertar email de contacto")?;
        }

        for phone in &phones {
            sqlx::query(
                r#"INSERT INTO contact_phones (id, contact_id, phone, created_at) VALUES (?1, ?2, ?3, ?4)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&contact_id)
            .bind(phone)
            .bind(&created_str)
            .execute(&mut *tx)
            .await
            .context("Fallo al insertar teléfono de contacto")?;
        }

        tx.commit().await.context("Fallo al confirmar contacto")?;

        Ok(ContactRecord {
            id: contact_id,
            name,
            marketing_consent: req.marketing_consent,
            created_at,
            emails,
            phones,
        })
    }

    pub async fn list_contacts(&self) -> Result<Vec<ContactRecord>> {
        let rows: Vec<ContactRow> = sqlx::query_as(
            r#"SELECT id, name, marketing_consent, created_at FROM contacts ORDER BY rowid"#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        let emails: Vec<(String, String)> =
            sqlx::query_as(r#"SELECT contact_id, email FROM contact_emails ORDER BY rowid"#)
                .fetch_all(&self.db_pool)
                .await?;
        let phones: Vec<(String, String)> =
            sqlx::query_as(r#"SELECT contact_id, phone FROM contact_phones ORDER BY rowid"#)
                .fetch_all(&self.db_pool)
                .await?;

        let mut emails_by_contact: HashMap<String, Vec<String>> = HashMap::new();
        for (contact_id, email) in emails {
            emails_by_contact.entry(contact_id).or_default().push(email);
        }
        let mut phones_by_contact: HashMap<String, Vec<String>> = HashMap::new();
        for (contact_id, phone) in phones {
            phones_by_contact.entry(contact_id).or_default().push(phone);
        }

        let mut result = Vec::with_capacity(rows.len());
        for r in rows {
            result.push(ContactRecord {
                emails: emails_by_contact.remove(&r.id).unwrap_or_default(),
                phones: phones_by_contact.remove(&r.id).unwrap_or_default(),
                created_at: parse_ts(&r.created_at)?,
                id: r.id,
                name: r.name,
                marketing_consent: r.marketing_consent,
            });
        }
        Ok(result)
    }

    /// Pares (contacto, email) distintos con consentimiento de marketing,
    /// en orden de alta.
    pub async fn eligible_email_recipients(&self) -> Result<Vec<Recipient>> {
        let rows: Vec<RecipientRow> = sqlx::query_as(
            r#"
            SELECT c.id AS contact_id, c.name AS name, lower(e.email) AS address
            FROM contacts c
            JOIN contact_emails e ON e.contact_id = c.id
            WHERE c.marketing_consent = 1
            ORDER BY c.rowid, e.rowid
            "#,
        )
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al consultar destinatarios de email")?;

        Ok(dedup_recipients(rows.into_iter().map(|r| Recipient {
            contact_id: r.contact_id,
            name: r.name,
            address: r.address,
        })))
    }

    /// Igual que los de email, con el teléfono normalizado a E.164.
    /// Los teléfonos que no se pueden normalizar se omiten.
    pub async fn eligible_phone_recipients(&self, default_country_code: &str) -> Result<Vec<Recipient>> {
        let rows: Vec<RecipientRow> = sqlx::query_as(
            r#"
            SELECT c.id AS contact_id, c.name AS name, p.phone AS address
            FROM contacts c
            JOIN contact_phones p ON p.contact_id = c.id
            WHERE c.marketing_consent = 1
            ORDER BY c.rowid, p.rowid
            "#,
        )
        .fetch_all(&self.db_pool)
        .await
        .context("Fallo al consultar destinatarios de SMS")?;

        let mut recipients = Vec::with_capacity(rows.len());
        for r in rows {
            match normalize_phone(&r.address, default_country_code) {
                Some(phone) => recipients.push(Recipient {
                    contact_id: r.contact_id,
                    name: r.name,
                    address: phone,
                }),
                None => log::warn!(
                    "(eligible_phone_recipients) Teléfono inválido '{}' del contacto {}, se omite",
                    r.address,
                    r.contact_id
                ),
            }
        }
        Ok(dedup_recipients(recipients.into_iter()))
    }
}

fn dedup_recipients(iter: impl Iterator<Item = Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::new();
    iter.filter(|r| seen.insert((r.contact_id.clone(), r.address.clone())))
        .collect()
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.')
    {
        return None;
    }
    if email.chars().any(char::is_whitespace) {
        return None;
    }
    Some(email)
}

/// Normaliza a E.164: quita espacios, guiones, puntos y paréntesis; `00` se
/// toma como `+`; sin prefijo se antepone `default_country_code`.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    let cc_digits: String = default_country_code
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    let digits = if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix("00") {
        rest.to_string()
    } else if cleaned.len() > 10 && cleaned.starts_with(&cc_digits) {
        // ya trae el código de país sin '+'
        cleaned
    } else {
        format!("{}{}", cc_digits, cleaned)
    };

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !(8..=15).contains(&digits.len()) || digits.starts_with('0') {
        return None;
    }
    Some(format!("+{}", digits))
}
