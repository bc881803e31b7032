pub mod browser;
pub mod config;
pub mod connection;

pub use browser::{BrowserConnector, BrowserHandle, SuppliedHandle};
pub use config::{ConfigOverrides, SessionConfig};
pub use connection::{ConnectionResolver, ConnectionSpec, ResolvedConnection};
