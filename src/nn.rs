mod traits;
pub use traits::*;
pub mod utils;

mod sage;
pub use sage::{Sage, SageConv, SageParams};

mod hinsage;
pub use hinsage::{HinSage, HinSageConv};

mod link;
pub use link::{LinkClassifier, LinkRegressor};
