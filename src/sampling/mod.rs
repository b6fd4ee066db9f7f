mod links;
pub use links::*;

mod neighbors;
pub use neighbors::*;

mod walks;
pub use walks::*;
