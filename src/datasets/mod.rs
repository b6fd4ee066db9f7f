mod cora;
pub use cora::*;

mod movielens;
pub use movielens::*;

mod preprocess;
pub use preprocess::*;

mod table;
pub use table::*;

mod traits;
pub use traits::*;

mod utils;
pub use utils::*;
