pub mod filter;
pub mod models;
pub mod traits;

pub use filter::*;
pub use models::*;
pub use traits::*;
