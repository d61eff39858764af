//! Cryptic triangle
//!
//! Opens a 1280x720 window and draws a hard-coded triangle with Vulkan,
//! keeping two frames in flight.

use anyhow::{bail, Context};
use cryptic_app::{run_app, AppConfig, PresentPolicy};

#[derive(Debug)]
enum Command {
    Run(AppConfig),
    Help,
}

fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    let config = match parse_args(std::env::args().skip(1), config)? {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Run(config) => config,
    };

    cryptic_core::init_logging(&config.log)?;
    tracing::debug!("{config:?}");

    run_app(config)
}

/// Apply command-line flags on top of `config`. Flags win over the
/// environment.
fn parse_args<I>(args: I, mut config: AppConfig) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--validation" => config.validation = true,
            "--no-validation" => config.validation = false,
            "--vsync" => config.vsync = true,
            "--present-policy" => {
                let value = args
                    .next()
                    .context("--present-policy needs a value (skip or propagate)")?;
                config.present_policy = value
                    .parse::<PresentPolicy>()
                    .map_err(anyhow::Error::msg)?;
            }
            other => bail!("unknown argument '{other}' (try --help)"),
        }
    }

    Ok(Command::Run(config))
}

fn print_help() {
    eprintln!(
        "Cryptic triangle

USAGE:
    cargo run -p cryptic-triangle -- [OPTIONS]

OPTIONS:
    --validation                 Enable Vulkan validation layers
    --no-validation              Disable Vulkan validation layers
                                 Default: on in debug builds, off in release
    --vsync                      Present with FIFO instead of MAILBOX/IMMEDIATE
    --present-policy <POLICY>    What to do when presenting fails
                                 skip (default): warn and keep going
                                 propagate: stop with an error
    -h, --help                   Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                     Set log level (e.g., info, debug, cryptic::vulkan=trace)
    CRYPTIC_VALIDATION           0 or 1; overridden by --validation/--no-validation"
    );
}
