//! Connection lifecycle controllers.
//!
//! Both shapes are built from the same primitives: a local endpoint, a
//! [`Session`](crate::session::Session) per connection and the process-wide
//! cancellation token.

mod client;
mod server;

pub use client::{ClientController, ClientOutcome};
pub use server::{ServerController, ServerSummary};
