use std::collections::HashMap;
use std::env;

use anyhow::{Context, bail};

use crate::util::mask_secret;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub publishable_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    /// `medication:plan` -> recurring Stripe price id, used for subscriptions
    pub price_ids: HashMap<String, String>,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &mask_secret(&self.secret_key))
            .field("publishable_key", &self.publishable_key)
            .field("webhook_secret", &mask_secret(&self.webhook_secret))
            .field("api_base", &self.api_base)
            .field("price_ids", &self.price_ids.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
    pub table: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct IntakeqConfig {
    pub api_key: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct GhlConfig {
    pub api_key: String,
    pub location_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct MetaConfig {
    pub pixel_id: String,
    pub access_token: String,
    /// Routes events to the Events Manager "Test events" tab when set
    pub test_event_code: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    /// Where the browser is sent after intake (the checkout app)
    pub checkout_app_url: String,
    pub allowed_origins: Vec<String>,
    pub prefill_token_secret: String,
    /// Raw 32-byte key for PHI at rest; derived from the token secret when unset
    pub phi_encryption_key: Option<Vec<u8>>,
    /// How long an intake submission is kept before it is purged
    pub prefill_ttl_secs: i64,
    /// Maximum age of a prefill token before it is rejected
    pub prefill_token_max_age_secs: i64,
    pub intake_webhook_secret: Option<String>,
    pub rate_limit_per_minute: u32,
    /// Key the limiter on proxy headers; only safe behind a proxy that sets them
    pub trust_proxy_headers: bool,
    pub stripe: StripeConfig,
    pub airtable: Option<AirtableConfig>,
    pub intakeq: Option<IntakeqConfig>,
    pub ghl: Option<GhlConfig>,
    pub meta: Option<MetaConfig>,
}

/// Read an env var, treating empty values as unset.
fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parse `semaglutide:monthly=price_123,tirzepatide:monthly=price_456`.
pub fn parse_price_ids(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_lowercase(), value.to_string()))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("RXCHECKOUT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 3000);

        let prefill_token_secret = match env_opt("PREFILL_TOKEN_SECRET") {
            Some(secret) => secret,
            None if dev_mode => {
                tracing::warn!("PREFILL_TOKEN_SECRET not set, using an insecure dev secret");
                "dev-only-prefill-secret".to_string()
            }
            None => bail!("PREFILL_TOKEN_SECRET must be set"),
        };
        if prefill_token_secret.len() < 16 && !dev_mode {
            bail!("PREFILL_TOKEN_SECRET must be at least 16 characters");
        }

        let phi_encryption_key = match env_opt("PHI_ENCRYPTION_KEY") {
            Some(encoded) => {
                use base64::Engine;
                let key = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .context("PHI_ENCRYPTION_KEY must be base64")?;
                if key.len() != 32 {
                    bail!("PHI_ENCRYPTION_KEY must decode to 32 bytes");
                }
                Some(key)
            }
            None => None,
        };

        let stripe_secret = match env_opt("STRIPE_SECRET_KEY") {
            Some(key) => key,
            None if dev_mode => String::new(),
            None => bail!("STRIPE_SECRET_KEY must be set"),
        };

        let stripe = StripeConfig {
            secret_key: stripe_secret,
            publishable_key: env_opt("STRIPE_PUBLISHABLE_KEY").unwrap_or_default(),
            webhook_secret: env_opt("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            api_base: env_opt("STRIPE_API_BASE").unwrap_or_else(|| STRIPE_API_BASE.to_string()),
            price_ids: env_opt("STRIPE_PRICE_IDS")
                .map(|raw| parse_price_ids(&raw))
                .unwrap_or_default(),
        };
        if stripe.webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, every Stripe webhook will be rejected");
        }

        let airtable = match (
            env_opt("AIRTABLE_API_KEY"),
            env_opt("AIRTABLE_BASE_ID"),
        ) {
            (Some(api_key), Some(base_id)) => Some(AirtableConfig {
                api_key,
                base_id,
                table: env_opt("AIRTABLE_TABLE").unwrap_or_else(|| "Patients".to_string()),
                api_base: env_opt("AIRTABLE_API_BASE")
                    .unwrap_or_else(|| "https://api.airtable.com/v0".to_string()),
            }),
            _ => None,
        };

        let intakeq = env_opt("INTAKEQ_API_KEY").map(|api_key| IntakeqConfig {
            api_key,
            api_base: env_opt("INTAKEQ_API_BASE")
                .unwrap_or_else(|| "https://intakeq.com/api/v1".to_string()),
        });

        let ghl = match (env_opt("GHL_API_KEY"), env_opt("GHL_LOCATION_ID")) {
            (Some(api_key), Some(location_id)) => Some(GhlConfig {
                api_key,
                location_id,
                api_base: env_opt("GHL_API_BASE")
                    .unwrap_or_else(|| "https://services.leadconnectorhq.com".to_string()),
            }),
            _ => None,
        };

        let meta = match (env_opt("META_PIXEL_ID"), env_opt("META_ACCESS_TOKEN")) {
            (Some(pixel_id), Some(access_token)) => Some(MetaConfig {
                pixel_id,
                access_token,
                test_event_code: env_opt("META_TEST_EVENT_CODE"),
                api_base: env_opt("META_API_BASE")
                    .unwrap_or_else(|| "https://graph.facebook.com/v18.0".to_string()),
            }),
            _ => None,
        };

        let checkout_app_url = env_opt("CHECKOUT_APP_URL")
            .unwrap_or_else(|| format!("http://{}:5173/checkout", host));

        let allowed_origins = env_opt("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "rxcheckout.db".to_string()),
            dev_mode,
            checkout_app_url,
            allowed_origins,
            prefill_token_secret,
            phi_encryption_key,
            prefill_ttl_secs: env_parse("PREFILL_TTL_SECS", 86_400),
            prefill_token_max_age_secs: env_parse("PREFILL_TOKEN_MAX_AGE_SECS", 4 * 3600),
            intake_webhook_secret: env_opt("INTAKE_WEBHOOK_SECRET"),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 60),
            trust_proxy_headers: env_parse("TRUST_PROXY_HEADERS", false),
            stripe,
            airtable,
            intakeq,
            ghl,
            meta,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
