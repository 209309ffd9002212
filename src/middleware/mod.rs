mod cors;
mod rate_limit;

pub use cors::*;
pub use rate_limit::*;
