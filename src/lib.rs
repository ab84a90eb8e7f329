pub mod cli;
pub mod engine;
pub mod error;
pub mod stats;
pub mod utils;

pub use error::{Error, Result};
