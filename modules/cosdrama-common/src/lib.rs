pub mod config;
pub mod error;
pub mod types;
pub mod window;

pub use config::IngestConfig;
pub use error::IngestError;
pub use types::*;
pub use window::DateWindow;
