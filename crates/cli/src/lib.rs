pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use adviser_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use clap::{Args, Parser, Subcommand};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "adviser",
    about = "Course adviser dialogue CLI",
    long_about = "Chat with the course adviser, inspect effective configuration, and validate the course and template catalogs.",
    after_help = "Examples:\n  adviser chat\n  adviser --courses courses.json catalog --json\n  adviser config"
)]
pub struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    #[arg(long, global = true, help = "Path to an adviser.toml config file")]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, help = "Log level filter (trace|debug|info|warn|error)")]
    pub log_level: Option<String>,
    #[arg(long, global = true, help = "Log format (compact|pretty|json)")]
    pub log_format: Option<String>,
    #[arg(long, global = true, help = "Course catalog JSON file")]
    pub courses: Option<PathBuf>,
    #[arg(long, global = true, help = "TOML file overriding utterance templates")]
    pub templates: Option<PathBuf>,
    #[arg(long, global = true, help = "Seed for the plan search")]
    pub seed: Option<u64>,
    #[arg(long, global = true, help = "Restart after this many consecutive unusable answers")]
    pub max_retries: Option<u32>,
}

impl GlobalArgs {
    /// Flags become the highest-precedence config layer.
    pub fn load_options(&self) -> Result<LoadOptions, String> {
        let log_format = self
            .log_format
            .as_deref()
            .map(str::parse::<LogFormat>)
            .transpose()
            .map_err(|error| error.to_string())?;

        Ok(LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                log_level: self.log_level.clone(),
                log_format,
                courses_path: self.courses.clone(),
                templates_path: self.templates.clone(),
                max_consecutive_failures: self.max_retries,
                seed: self.seed,
            },
        })
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive course-planning conversation on stdin/stdout")]
    Chat,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, the course catalog, and the template catalog")]
    Catalog {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let options = match cli.global.load_options() {
        Ok(options) => options,
        Err(message) => {
            let result = commands::CommandResult::failure(
                "adviser",
                "invalid_arguments",
                message,
                2,
            );
            println!("{}", result.output);
            return ExitCode::from(result.exit_code);
        }
    };

    let result = match cli.command {
        Command::Chat => commands::chat::run(options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Catalog { json } => commands::catalog::run(options, json),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so they never interleave with the conversation on stdout.
pub fn init_logging(config: &AppConfig) {
    let level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);

    // A second init in the same process (tests) is not an error worth surfacing.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
