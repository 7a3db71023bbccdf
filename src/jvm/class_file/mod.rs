mod attribute;
mod constants;
mod method;

pub use attribute::*;
pub use constants::*;
pub use method::*;
