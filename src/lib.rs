pub mod camera;
pub mod cli;
pub mod config;
pub mod protocol;
pub mod server;

pub use cli::{Command, describe, prompt};
pub use config::{ConfigError, ServerConfig};
pub use server::{App, ServerError};
