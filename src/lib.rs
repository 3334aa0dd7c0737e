pub mod config;
pub mod connection;
pub mod controller;
pub mod protocol;
pub mod session;

pub use config::{AppConfig, ConfigError};
pub use session::{SessionError, ShipSession};
