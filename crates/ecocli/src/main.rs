//! ecocli - Command-line control for ecobee thermostats.

mod commands;
mod output;
mod prompt;
mod thermostat;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ecocli_core::{init_logging, Config, Paths};
use tracing::debug;

use commands::AppContext;
use thermostat::HvacMode;

/// ecocli - Read and control an ecobee thermostat.
#[derive(Parser)]
#[command(name = "ecocli")]
#[command(about = "Control ecobee thermostats from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, credentials and logs. Defaults to ~/.config/ecocli
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Application key registered in the ecobee developer portal
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Thermostat identifier. All registered thermostats when unset
    #[arg(long, global = true)]
    thermostat: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize this application with a PIN
    Login {
        /// Discard the current session and authorize again
        #[arg(long)]
        force: bool,
    },

    /// Forget the stored token
    Logout,

    /// Show the stored session
    AuthStatus,

    /// Refresh the access token now
    Refresh,

    /// Show mode and temperatures
    Status,

    /// Set the HVAC mode
    SetMode {
        #[arg(value_enum)]
        mode: HvacMode,
    },

    /// Hold a temperature (°F) until the next transition, or for a number of hours
    SetTemp {
        #[arg(value_parser = parse_temperature, allow_negative_numbers = true)]
        temperature: f64,
        duration_hours: Option<u32>,
    },

    /// Cancel the hold and resume the schedule
    Resume,
}

fn parse_temperature(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("{} is not a temperature", raw))
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, Some(paths.log_file()));
    debug!(base_dir = %paths.base_dir().display(), "Configuration loaded");

    let ctx = AppContext {
        paths,
        config,
        format: cli.format,
        client_id: cli.client_id,
        thermostat_id: cli.thermostat,
    };

    match cli.command {
        Commands::Login { force } => commands::login(&ctx, force).await,
        Commands::Logout => commands::logout(&ctx).await,
        Commands::AuthStatus => commands::auth_status(&ctx).await,
        Commands::Refresh => commands::refresh(&ctx).await,
        Commands::Status => commands::status(&ctx).await,
        Commands::SetMode { mode } => commands::set_mode(&ctx, mode).await,
        Commands::SetTemp {
            temperature,
            duration_hours,
        } => commands::set_temp(&ctx, temperature, duration_hours).await,
        Commands::Resume => commands::resume(&ctx).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            output::print_error(&format!("{:#}", e), commands::guidance(&e), &format);
            1
        }
    };

    // A timed-out PIN prompt leaves a blocking stdin read behind; exit
    // without waiting for it.
    std::process::exit(code);
}
