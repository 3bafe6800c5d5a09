pub mod config;
pub mod error;
pub mod types;
pub mod validation;

pub use config::TaskConfig;
pub use error::ValidationError;
pub use types::*;
pub use validation::validate;
