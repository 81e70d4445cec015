pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BuildArgs, CliArgs, Commands, OutputFormatArg, ValidateArgs};
pub use handlers::{handle_build, handle_validate};
pub use output::{OutputFormat, OutputFormatter};
