//! CLI argument model and configuration resolution for the `azsh` binary.
//!
//! [`Cli`] is the raw clap surface (flags plus environment fallbacks);
//! [`ShellConfig`] is the validated form the shell consumes. Slash-command
//! parsing and help rendering live in [`command_text`].

pub mod cli_args;
pub mod command_text;
pub mod shell_config;

pub use cli_args::Cli;
pub use command_text::*;
pub use shell_config::*;
