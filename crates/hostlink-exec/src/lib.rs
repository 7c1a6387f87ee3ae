//! Command whitelist gate and bounded shell execution.

pub mod shell;
pub mod whitelist;

pub use shell::{ExecOutput, ShellRunner};
pub use whitelist::{AllowedCommand, authorize};
