//! The restricted, FS-native shell: parser, safety analyzer, command
//! handlers, and the pipeline executor.

mod exec;
mod handlers;
mod parser;
mod safety;

pub use exec::{ExecConfig, ExecOutcome, ShellExecutor};
pub use parser::{ParsedCommand, parse};
pub use safety::{
    FS_NATIVE_COMMANDS, SafetyAnalyzer, SafetyVerdict, default_policy, is_fs_native,
};
