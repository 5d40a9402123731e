//! Carrier subprocess management.

pub mod carrier;
pub mod command;

pub use carrier::{Carrier, ExitCause, ExitRecord, ProcessRecord, SpawnError};
pub use command::{ArgTemplate, CarrierCommand, TemplateError, TemplateVars, ensure_program_exists};
