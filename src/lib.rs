pub mod backup;
pub mod command;
pub mod error;
pub mod utils;

pub use error::{MirrorError, Result};
