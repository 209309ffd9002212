//! Heyflow intake payloads: flattening and normalization into an
//! `IntakeSubmission`.

pub mod normalize;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::IntakeSubmission;
use normalize::*;

/// Keys that hold form metadata rather than patient answers.
const IGNORED_KEYS: &[&str] = &["flow_id", "created_at", "webhook_secret", "secret"];

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
        Value::Array(items) => {
            let joined: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            (!joined.is_empty()).then(|| joined.join(", "))
        }
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn insert_field(fields: &mut BTreeMap<String, String>, raw_key: &str, value: &Value) {
    let key = canonical_key(raw_key);
    if key.is_empty() {
        return;
    }
    match value {
        Value::Object(inner) => {
            // Nested address blocks and the like: `address.city` -> `city`
            for (child_key, child) in inner {
                let nested = canonical_key(&format!("{}_{}", raw_key, child_key));
                let direct = canonical_key(child_key);
                let target = if is_known_key(&nested) { nested } else { direct };
                if let Some(v) = scalar_to_string(child) {
                    fields.entry(target).or_insert(v);
                }
            }
        }
        other => {
            if let Some(v) = scalar_to_string(other) {
                fields.entry(key).or_insert(v);
            }
        }
    }
}

fn is_known_key(key: &str) -> bool {
    matches!(
        key,
        "first_name" | "last_name" | "full_name" | "email" | "phone" | "dob" | "address"
            | "line1" | "line2" | "city" | "state" | "zip" | "medication" | "language"
            | "submission_id"
    )
}

/// Label/value pairs as sent in `values`/`answers` arrays.
fn insert_pairs(fields: &mut BTreeMap<String, String>, items: &[Value]) {
    for item in items {
        let Some(obj) = item.as_object() else { continue };
        let label = ["variable", "label", "question", "name", "id"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str));
        let value = ["value", "answer"].iter().find_map(|k| obj.get(*k));
        if let (Some(label), Some(value)) = (label, value) {
            insert_field(fields, label, value);
        }
    }
}

/// Flatten any of the payload shapes Heyflow can send into canonical
/// `field -> value` pairs. Earlier (more specific) values win.
pub fn flatten_payload(payload: &Value) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let Some(root) = payload.as_object() else {
        return fields;
    };

    for container in ["fields", "data"] {
        match root.get(container) {
            Some(Value::Object(inner)) => {
                for (k, v) in inner {
                    insert_field(&mut fields, k, v);
                }
            }
            Some(Value::Array(items)) => insert_pairs(&mut fields, items),
            _ => {}
        }
    }
    for container in ["values", "answers"] {
        if let Some(Value::Array(items)) = root.get(container) {
            insert_pairs(&mut fields, items);
        }
    }
    for (k, v) in root {
        if matches!(k.as_str(), "fields" | "data" | "values" | "answers") {
            continue;
        }
        insert_field(&mut fields, k, v);
    }

    for ignored in IGNORED_KEYS {
        fields.remove(*ignored);
    }
    fields
}

/// Build a normalized submission. The only hard requirement is a usable email.
pub fn build_submission(
    mut fields: BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> Result<IntakeSubmission> {
    let email = fields
        .remove("email")
        .and_then(|e| normalize_email(&e))
        .ok_or_else(|| AppError::BadRequest("A valid email is required".into()))?;

    let mut first_name = fields.remove("first_name").map(|n| normalize_name(&n));
    let mut last_name = fields.remove("last_name").map(|n| normalize_name(&n));
    if let Some(full) = fields.remove("full_name") {
        let full = normalize_name(&full);
        let (first, last) = full.split_once(' ').unwrap_or((full.as_str(), ""));
        if first_name.is_none() {
            first_name = Some(first.to_string());
        }
        if last_name.is_none() && !last.is_empty() {
            last_name = Some(last.to_string());
        }
    }

    let today = now.date_naive();
    let phone = fields.remove("phone").and_then(|p| normalize_phone(&p));
    let dob = fields.remove("dob").and_then(|d| normalize_dob(&d, today));

    let mut address = fields
        .remove("address")
        .map(|a| parse_single_line_address(&a))
        .unwrap_or_default();
    if let Some(line1) = fields.remove("line1") {
        address.line1 = line1;
    }
    if let Some(line2) = fields.remove("line2") {
        address.line2 = Some(line2);
    }
    if let Some(city) = fields.remove("city") {
        address.city = normalize_name(&city);
    }
    if let Some(state) = fields.remove("state") {
        address.state = normalize_state(&state).unwrap_or(state);
    }
    if let Some(zip) = fields.remove("zip") {
        address.zip = normalize_zip(&zip).unwrap_or(zip);
    }
    if address.country.is_empty() {
        address.country = "US".to_string();
    }

    let medication = fields.remove("medication").and_then(|m| {
        let m = m.to_lowercase();
        if m.contains("tirzepatide") || m.contains("mounjaro") || m.contains("zepbound") {
            Some(crate::models::Medication::Tirzepatide)
        } else if m.contains("semaglutide") || m.contains("ozempic") || m.contains("wegovy") {
            Some(crate::models::Medication::Semaglutide)
        } else {
            None
        }
    });

    let language = fields
        .remove("language")
        .map(|l| l.to_lowercase().chars().take(2).collect::<String>())
        .filter(|l| l.len() == 2);

    let submission_id = fields
        .remove("submission_id")
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok(IntakeSubmission {
        submission_id,
        first_name: first_name.unwrap_or_default(),
        last_name: last_name.unwrap_or_default(),
        email,
        phone,
        dob,
        address,
        medication,
        language,
        answers: fields,
        submitted_at: now.timestamp(),
    })
}

/// Flatten and normalize a raw webhook payload.
pub fn parse_submission(payload: &Value, now: DateTime<Utc>) -> Result<IntakeSubmission> {
    build_submission(flatten_payload(payload), now)
}
