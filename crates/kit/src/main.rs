//! Command line entry point for dvm.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use color_eyre::Result;

use dvm::class::ClassCatalog;
use dvm::config::PlatformConfig;
use dvm::registry::PlatformState;
use dvm::{create, list};

/// Create and inspect domains of a compartmentalized virtualization platform.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Configuration file (default: $DVM_CONFIG, then /etc/dvm/config.toml)
    #[clap(long, global = true, value_name = "PATH")]
    config: Option<Utf8PathBuf>,

    /// Directory holding the platform state; overrides the configuration
    #[clap(long, global = true, value_name = "PATH")]
    state_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new domain
    Create(create::CreateOpts),

    /// List the labels domains can be assigned
    ListLabels(list::ListLabelsOpts),

    /// List the available domain classes
    ListClasses(list::ListClassesOpts),
}

/// Install and configure the tracing/logging system.
///
/// Log level comes from `RUST_LOG` and defaults to `info`. Output goes to
/// stderr so stdout stays usable for `--json`.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn run(cli: Cli) -> Result<()> {
    color_eyre::install()?;

    let config = PlatformConfig::load(cli.config.as_deref())?;
    let state_dir = cli.state_dir.unwrap_or(config.state_dir);
    tracing::debug!("Using state directory {state_dir}");

    match cli.command {
        Commands::Create(opts) => {
            create::run(opts, &state_dir, &config.default_class)?;
        }
        Commands::ListLabels(opts) => {
            let state = PlatformState::load_readonly(&state_dir)?;
            list::run_labels(&state.labels, opts)?;
        }
        Commands::ListClasses(opts) => {
            list::run_classes(&ClassCatalog::builtin(), opts)?;
        }
    }
    Ok(())
}

/// Entry point for the dvm CLI.
///
/// Any failure is printed as a single line and exits with status 2.
fn main() {
    install_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(2);
    }
}
