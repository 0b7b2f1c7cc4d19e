pub mod registry;
pub mod wallet;

pub use registry::*;
pub use wallet::*;
