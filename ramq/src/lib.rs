#![deny(unsafe_code)] // Enforce memory safety across the entire crate

//! # Overall Example
//! ```rust,no_run
//!
//! use ramq::conf::Settings;
//! use ramq::context::ServerContext;
//! use ramq::logger::config_logger;
//! use ramq::net::{Builder, Result};
//! use ramq::server::BrokerServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::init(Default::default())?.clone();
//!     let logger = config_logger(settings.log.filename(), settings.log.to, settings.log.level);
//!
//!     let scx = ServerContext::new(settings, logger).build().await?;
//!
//!     BrokerServer::new(scx)
//!         .listener(Builder::new().name("external/tcp").laddr(([0, 0, 0, 0], 15672).into()).bind()?)
//!         .build()
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//!
//! ```

/// Core Broker Components
pub mod context; // Shared execution context
pub mod dispatcher; // Queue delivery loop
pub mod vhost; // Virtual host orchestration

/// Essential Services
pub mod index; // In-memory topology and message index
pub mod key; // Routing and binding key grammar
pub mod logger; // Logging pipeline
pub mod metastore; // Durable topology snapshot
pub mod msglog; // Per-queue durable message log
pub mod router; // Exchange routing core
pub mod server; // Server lifecycle management
pub mod session; // Client session handling

/// Common Types
pub mod types; // Common data types

/// External Crate Re-exports
pub use net::{Error, Result}; // Network error types

pub use ramq_codec as codec; // Wire protocol codec
pub use ramq_conf as conf; // Configuration layer
pub use ramq_net as net; // Network abstractions
pub use ramq_utils as utils; // Common utilities
