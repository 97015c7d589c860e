//! Hopbox: a self-hostable remote-development runtime client. `core`
//! implements the tunnel data plane, SSH bootstrap, and workflow
//! orchestration; `app` wires that surface to the `hop` CLI.

pub mod core;
pub mod error;

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;

pub use error::{Error, Result};
