mod intake;
mod order;
mod payment;

pub use intake::*;
pub use order::*;
pub use payment::*;
