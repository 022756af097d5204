//! services/sms_estimate_service.rs
//! Cálculo de segmentos y costo aproximado de un SMS.

use crate::models::delivery_model::{SmsEncoding, SmsEstimate};

/// Alfabeto básico GSM 03.38 (1 septeto por carácter)
const GSM7_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";

/// Tabla de extensión: escape + carácter, 2 septetos
const GSM7_EXTENDED: &str = "^{}\\[~]|€\u{000C}";

const GSM7_SINGLE: usize = 160;
const GSM7_MULTI: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_MULTI: usize = 67;

/// Unidades según la codificación que usaría el operador
fn encoding_units(message: &str) -> (SmsEncoding, usize) {
    let mut septets = 0;
    for c in message.chars() {
        if GSM7_BASIC.contains(c) {
            septets += 1;
        } else if GSM7_EXTENDED.contains(c) {
            septets += 2;
        } else {
            // un solo carácter fuera de GSM-7 pasa todo el mensaje a UCS-2
            return (SmsEncoding::Ucs2, message.encode_utf16().count());
        }
    }
    (SmsEncoding::Gsm7, septets)
}

pub fn segments_for(message: &str) -> (SmsEncoding, usize, usize) {
    let (encoding, units) = encoding_units(message);
    let (single, multi) = match encoding {
        SmsEncoding::Gsm7 => (GSM7_SINGLE, GSM7_MULTI),
        SmsEncoding::Ucs2 => (UCS2_SINGLE, UCS2_MULTI),
    };
    let segments = if units == 0 {
        0
    } else if units <= single {
        1
    } else {
        units.div_ceil(multi)
    };
    (encoding, units, segments)
}

/// Estimación sobre los textos ya personalizados: el nombre de cada contacto
/// puede cambiar la codificación o sumar un segmento.
pub fn estimate_sms<S: AsRef<str>>(bodies: &[S], cost_per_segment: f64) -> SmsEstimate {
    let mut encoding = SmsEncoding::Gsm7;
    let mut units = 0;
    let mut segments_per_message = 0;
    let mut total_segments = 0;

    for body in bodies {
        let (body_encoding, body_units, segments) = segments_for(body.as_ref());
        if body_encoding == SmsEncoding::Ucs2 {
            encoding = SmsEncoding::Ucs2;
        }
        units = units.max(body_units);
        segments_per_message = segments_per_message.max(segments);
        total_segments += segments;
    }
    let estimated_cost = round_cents(total_segments as f64 * cost_per_segment);

    SmsEstimate {
        encoding,
        units,
        segments_per_message,
        recipients: bodies.len(),
        total_segments,
        cost_per_segment,
        estimated_cost,
    }
}

/// 4 decimales, como factura Twilio
fn round_cents(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
