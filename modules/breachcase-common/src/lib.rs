pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, ResolutionPolicy};
pub use error::BreachCaseError;
pub use types::*;
