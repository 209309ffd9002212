mod fingerprint;
mod stripe;

pub use fingerprint::*;
pub use stripe::*;
