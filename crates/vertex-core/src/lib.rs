//! # vertex-core
//!
//! The orchestration core of Vertex:
//!
//! - [`Supervisor`] binds the container store, the runner backends, the log
//!   pipeline, and the event bus behind a uniform command interface and owns
//!   the lifecycle state machine.
//! - [`Context`] is the composition root: it owns the event bus and the
//!   shutdown token, sequences the startup phases, and tears everything down
//!   again.
//! - [`Config`] carries the process-wide configuration, built once at
//!   startup and passed down explicitly.

pub mod config;
pub mod context;
pub mod error;
pub mod supervisor;

pub use config::Config;
pub use context::{wait_for_network, Context};
pub use error::{CoreError, Result};
pub use supervisor::{SettingsPatch, Supervisor};
