pub mod models;
pub mod traits;
pub mod venue;

pub use models::*;
pub use traits::*;
pub use venue::*;

pub use ethereal_rounding::{MarketRules, OrderPurpose, Precision, Side};
