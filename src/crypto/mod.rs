mod master_key;
mod token;

pub use master_key::*;
pub use token::*;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
