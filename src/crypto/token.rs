//! Signed, time-limited prefill tokens.
//!
//! A token is `{random}.{timestamp}.{signature}` where the signature is the
//! first 16 hex chars of HMAC-SHA256(secret, "{random}:{timestamp}"). The
//! random part doubles as the storage key for the intake submission.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const RANDOM_BYTES: usize = 16;
const SIGNATURE_HEX_LEN: usize = 16;
/// Clock skew tolerated for tokens stamped slightly in the future.
const MAX_FUTURE_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefillToken {
    pub id: String,
    pub issued_at: i64,
    signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,
    #[error("Invalid token signature")]
    BadSignature,
    #[error("Token expired")]
    Expired,
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Malformed => AppError::BadRequest(e.to_string()),
            TokenError::BadSignature => AppError::Forbidden(e.to_string()),
            TokenError::Expired => AppError::Unauthorized(e.to_string()),
        }
    }
}

fn sign(secret: &str, id: &str, issued_at: i64) -> Result<String, TokenError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TokenError::BadSignature)?;
    mac.update(format!("{}:{}", id, issued_at).as_bytes());
    let mut sig = hex::encode(mac.finalize().into_bytes());
    sig.truncate(SIGNATURE_HEX_LEN);
    Ok(sig)
}

impl PrefillToken {
    /// Issue a fresh token stamped with `now`.
    pub fn issue(secret: &str, now: i64) -> Result<Self, TokenError> {
        let mut random = [0u8; RANDOM_BYTES];
        rand::thread_rng().fill_bytes(&mut random);
        let id = hex::encode(random);
        let signature = sign(secret, &id, now)?;
        Ok(Self {
            id,
            issued_at: now,
            signature,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let mut parts = raw.trim().split('.');
        let (Some(id), Some(ts), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        if id.len() != RANDOM_BYTES * 2 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TokenError::Malformed);
        }
        if sig.len() != SIGNATURE_HEX_LEN {
            return Err(TokenError::Malformed);
        }
        let issued_at: i64 = ts.parse().map_err(|_| TokenError::Malformed)?;

        Ok(Self {
            id: id.to_ascii_lowercase(),
            issued_at,
            signature: sig.to_ascii_lowercase(),
        })
    }

    /// Check signature and age. Signature is checked first so that an
    /// attacker cannot learn anything about expiry from a forged token.
    pub fn verify(&self, secret: &str, now: i64, max_age_secs: i64) -> Result<(), TokenError> {
        let expected = sign(secret, &self.id, self.issued_at)?;
        if !bool::from(expected.as_bytes().ct_eq(self.signature.as_bytes())) {
            return Err(TokenError::BadSignature);
        }
        if self.issued_at - now > MAX_FUTURE_SKEW_SECS {
            return Err(TokenError::BadSignature);
        }
        if now - self.issued_at > max_age_secs {
            return Err(TokenError::Expired);
        }
        Ok(())
    }

    /// Parse and verify in one step.
    pub fn open(raw: &str, secret: &str, now: i64, max_age_secs: i64) -> Result<Self, TokenError> {
        let token = Self::parse(raw)?;
        token.verify(secret, now, max_age_secs)?;
        Ok(token)
    }

    pub fn encode(&self) -> String {
        format!("{}.{}.{}", self.id, self.issued_at, self.signature)
    }
}

impl std::fmt::Display for PrefillToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}
