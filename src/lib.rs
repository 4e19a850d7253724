pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hash;
pub mod http;
pub mod provider;
pub mod session;
pub mod subtitle_id;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use provider::SubtitleProvider;
