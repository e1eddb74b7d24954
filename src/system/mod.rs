// file: src/system/mod.rs
// version: 1.0.0
// guid: s9t0u1v2-w3x4-5678-9012-345678stuvwx

//! External command plumbing and host probes

pub mod dry_run;
pub mod executor;
pub mod local;
pub mod recording;
pub mod utils;

pub use dry_run::DryRunExecutor;
pub use executor::{shell_quote, CommandExecutor};
pub use local::LocalClient;
pub use recording::RecordingExecutor;
pub use utils::SystemUtils;
