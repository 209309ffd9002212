pub mod queries;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::Config;
use crate::crypto::MasterKey;
use crate::fanout::FulfillmentSink;
use crate::middleware::RateLimiter;
use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    /// Encrypts intake PHI at rest
    pub master_key: MasterKey,
    pub stripe: StripeClient,
    /// Downstream systems notified on successful payment, in call order
    pub sinks: Arc<Vec<Arc<dyn FulfillmentSink>>>,
    pub limiter: Arc<RateLimiter>,
}

pub fn create_pool(path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;"));
    Pool::builder().max_size(8).build(manager)
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS intake_submissions (
            token_id TEXT PRIMARY KEY,
            token TEXT NOT NULL,
            submission_id TEXT NOT NULL,
            ciphertext BLOB NOT NULL,
            medication TEXT,
            language TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_intake_submission_id
            ON intake_submissions(submission_id);
        CREATE INDEX IF NOT EXISTS idx_intake_expires_at
            ON intake_submissions(expires_at);

        CREATE TABLE IF NOT EXISTS checkout_sessions (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            payment_intent_id TEXT NOT NULL,
            client_secret TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_events (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            processed_at INTEGER NOT NULL
        );",
    )
}
