use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Builds custom Power Virtual Server images
#[derive(Parser, Debug)]
#[command(
    name = "powervs-builder",
    about = "Builds custom IBM Power Virtual Server images",
    version,
    author,
    long_about = "powervs-builder provisions a temporary instance from a base image, \
                  optionally customises it over the network, and captures it into the \
                  image catalog and/or Cloud Object Storage. Resources created for the \
                  build are removed when the build fails."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build and capture an image",
        long_about = "Runs the full build pipeline described by a configuration file: \
                      image import, network, instance creation, provisioning, shutdown \
                      and capture.\n\n\
                      Examples:\n  \
                      powervs-builder build --config build.toml\n  \
                      powervs-builder build --config build.toml --format json\n  \
                      powervs-builder build --config build.toml --teardown-on-success"
    )]
    Build(BuildArgs),

    #[command(
        about = "Validate a configuration file",
        long_about = "Loads a configuration file, applies POWERVS_* environment overrides \
                      and checks it without contacting the cloud.\n\n\
                      Examples:\n  \
                      powervs-builder validate --config build.toml"
    )]
    Validate(ValidateArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(short = 'c', long, value_name = "FILE", help = "Build configuration (TOML)")]
    pub config: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format for the artifact"
    )]
    pub format: OutputFormatArg,

    #[arg(
        long,
        help = "Remove every created resource even when the build succeeds"
    )]
    pub teardown_on_success: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(short = 'c', long, value_name = "FILE", help = "Build configuration (TOML)")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormatArg {
    Human,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build() {
        let args = CliArgs::parse_from([
            "powervs-builder",
            "build",
            "--config",
            "build.toml",
            "--format",
            "json",
            "--teardown-on-success",
        ]);
        match args.command {
            Commands::Build(build) => {
                assert_eq!(build.config, PathBuf::from("build.toml"));
                assert_eq!(build.format, OutputFormatArg::Json);
                assert!(build.teardown_on_success);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::parse_from(["powervs-builder", "validate", "-c", "b.toml", "-v"]);
        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Validate(_)));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result =
            CliArgs::try_parse_from(["powervs-builder", "validate", "-c", "b.toml", "-v", "-q"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_is_required() {
        assert!(CliArgs::try_parse_from(["powervs-builder", "build"]).is_err());
    }
}
