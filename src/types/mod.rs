pub mod af;
pub mod errors;
pub mod ids;
pub mod prefix;
pub mod stats;

pub use af::Address;
pub use ids::{FibIndex, IfAddr, Si};
pub use prefix::Prefix;
