pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
