pub mod config;
pub mod error;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{PipewrightError, Result};
pub use state::{Document, RunState};
pub use types::*;
