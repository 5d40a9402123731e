//! pipebridge Core Library
//!
//! Shared functionality for the pipebridge binaries:
//! - Transport endpoints over sockets, named pipes and carrier stdio
//! - Carrier subprocess supervision
//! - Duplex byte relay between two endpoints
//! - Session lifecycle, client/server controllers and shutdown coordination
//! - Configuration, PID files, access policies and tracing setup

pub mod access;
pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod parent_watch;
pub mod pidfile;
pub mod relay;
pub mod session;
pub mod shutdown;
pub mod subprocess;
pub mod tracing_init;
pub mod transport;

pub use config::BridgeSettings;
pub use endpoint::{Endpoint, EndpointError, EndpointKind, ReadOutcome};
pub use error::{Error, Result};
pub use relay::{DuplexRelay, RelayPolicy, RelayReport};
pub use session::{Session, SessionRegistry, SessionState};
pub use shutdown::{ShutdownCoordinator, ShutdownTrigger};
pub use subprocess::{Carrier, CarrierCommand, ProcessRecord};
