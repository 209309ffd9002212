use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;

/// Checkout sessions idle longer than this are purged.
pub const CHECKOUT_SESSION_IDLE_SECS: i64 = 86_400;
/// Processed-event ids are kept long enough to cover Stripe's retry window.
pub const PROCESSED_EVENT_RETENTION_SECS: i64 = 7 * 86_400;

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Intake submissions ============

pub struct NewIntakeRecord<'a> {
    pub token_id: &'a str,
    pub token: &'a str,
    pub submission_id: &'a str,
    pub ciphertext: &'a [u8],
    pub medication: Option<&'a str>,
    pub language: Option<&'a str>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Non-PHI view of a stored submission, safe to use for redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeRecordMeta {
    pub token_id: String,
    pub token: String,
    pub submission_id: String,
    pub medication: Option<String>,
    pub language: Option<String>,
    pub expires_at: i64,
}

pub fn store_intake(conn: &Connection, record: &NewIntakeRecord<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO intake_submissions
            (token_id, token, submission_id, ciphertext, medication, language, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.token_id,
            record.token,
            record.submission_id,
            record.ciphertext,
            record.medication,
            record.language,
            record.created_at,
            record.expires_at,
        ],
    )?;
    Ok(())
}

const INTAKE_META_COLS: &str = "token_id, token, submission_id, medication, language, expires_at";

fn intake_meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IntakeRecordMeta> {
    Ok(IntakeRecordMeta {
        token_id: row.get(0)?,
        token: row.get(1)?,
        submission_id: row.get(2)?,
        medication: row.get(3)?,
        language: row.get(4)?,
        expires_at: row.get(5)?,
    })
}

/// Most recent unexpired submission for a form submission id.
pub fn get_intake_by_submission(
    conn: &Connection,
    submission_id: &str,
    now: i64,
) -> Result<Option<IntakeRecordMeta>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM intake_submissions
                 WHERE submission_id = ?1 AND expires_at > ?2
                 ORDER BY created_at DESC LIMIT 1",
                INTAKE_META_COLS
            ),
            params![submission_id, now],
            intake_meta_from_row,
        )
        .optional()?)
}

pub fn get_intake_by_token_id(
    conn: &Connection,
    token_id: &str,
    now: i64,
) -> Result<Option<IntakeRecordMeta>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM intake_submissions WHERE token_id = ?1 AND expires_at > ?2",
                INTAKE_META_COLS
            ),
            params![token_id, now],
            intake_meta_from_row,
        )
        .optional()?)
}

/// Atomically read and delete a submission (one-time use).
///
/// Returns `None` if the record never existed, was already consumed, or has
/// outlived its TTL. An expired record is still deleted.
pub fn take_intake(conn: &Connection, token_id: &str, now: i64) -> Result<Option<Vec<u8>>> {
    let row: Option<(Vec<u8>, i64)> = conn
        .query_row(
            "DELETE FROM intake_submissions WHERE token_id = ?1 RETURNING ciphertext, expires_at",
            params![token_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(ciphertext, expires_at)| (expires_at > now).then_some(ciphertext)))
}

// ============ Checkout sessions ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRecord {
    pub id: String,
    pub fingerprint: String,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount_cents: i64,
    pub updated_at: i64,
}

pub fn get_checkout_session(conn: &Connection, id: &str) -> Result<Option<CheckoutSessionRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, fingerprint, payment_intent_id, client_secret, amount_cents, updated_at
             FROM checkout_sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok(CheckoutSessionRecord {
                    id: row.get(0)?,
                    fingerprint: row.get(1)?,
                    payment_intent_id: row.get(2)?,
                    client_secret: row.get(3)?,
                    amount_cents: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .optional()?)
}

/// Point a checkout session at a (new) payment intent.
pub fn upsert_checkout_session(conn: &Connection, record: &CheckoutSessionRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO checkout_sessions
            (id, fingerprint, payment_intent_id, client_secret, amount_cents, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(id) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            payment_intent_id = excluded.payment_intent_id,
            client_secret = excluded.client_secret,
            amount_cents = excluded.amount_cents,
            updated_at = excluded.updated_at",
        params![
            record.id,
            record.fingerprint,
            record.payment_intent_id,
            record.client_secret,
            record.amount_cents,
            record.updated_at,
        ],
    )?;
    Ok(())
}

/// Refresh the idle timer of a session whose intent is being reused.
pub fn touch_checkout_session(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE checkout_sessions SET updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    Ok(())
}

// ============ Processed webhook events ============

/// Record a Stripe event id. Returns `false` if it was already recorded,
/// i.e. this delivery is a retry/replay.
pub fn try_record_event(conn: &Connection, event_id: &str, event_type: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO processed_events (event_id, event_type, processed_at)
         VALUES (?1, ?2, ?3)",
        params![event_id, event_type, now],
    )?;
    Ok(affected > 0)
}

// ============ Maintenance ============

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    pub intake_submissions: usize,
    pub checkout_sessions: usize,
    pub processed_events: usize,
}

pub fn purge_expired(conn: &Connection, now: i64) -> Result<PurgeStats> {
    let intake_submissions = conn.execute(
        "DELETE FROM intake_submissions WHERE expires_at <= ?1",
        params![now],
    )?;
    let checkout_sessions = conn.execute(
        "DELETE FROM checkout_sessions WHERE updated_at <= ?1",
        params![now - CHECKOUT_SESSION_IDLE_SECS],
    )?;
    let processed_events = conn.execute(
        "DELETE FROM processed_events WHERE processed_at <= ?1",
        params![now - PROCESSED_EVENT_RETENTION_SECS],
    )?;

    Ok(PurgeStats {
        intake_submissions,
        checkout_sessions,
        processed_events,
    })
}
