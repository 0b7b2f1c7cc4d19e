pub mod clearing;
pub mod collector;
pub mod curve;
pub mod orders;
pub mod pricing;
pub mod rules;
pub mod settlement;

pub use clearing::*;
pub use collector::*;
pub use curve::*;
pub use orders::*;
pub use pricing::*;
pub use rules::*;
pub use settlement::*;
