//! oidc-device-login: log in from an input-constrained device
//!
//! Runs the OAuth 2.0 Device Authorization Grant against an OIDC issuer and
//! prints the resulting tokens, ID token claims and userinfo.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use oidc_device_flow::{DeviceFlow, FlowError, FlowOutcome, FlowSettings};
use oidc_device_login::config::{CliConfig, CliOverrides, EnvDefaults, FileConfig};
use oidc_device_login::ui::{DisplayOptions, StdinPrompter, TerminalDisplay};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Grace period between Ctrl-C and a forced exit while blocked on stdin.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "oidc-device-login")]
#[command(about = "Log in with the OAuth 2.0 Device Authorization Grant")]
#[command(version)]
struct Cli {
    /// Issuer domain or URL (defaults to AUTH0_DOMAIN)
    #[arg(long)]
    domain: Option<String>,

    /// Device flow client ID (defaults to AUTH0_CLIENT_ID)
    #[arg(long)]
    client_id: Option<String>,

    /// Access token API audience; pass an empty value to omit it
    #[arg(long)]
    audience: Option<String>,

    /// Requested scope; repeat or space-separate for several
    #[arg(long = "scope", value_name = "SCOPE")]
    scope: Vec<String>,

    /// Config file (defaults to <config dir>/oidc-device-login/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the verification URL instead of opening a browser
    #[arg(long)]
    no_browser: bool,

    /// Skip confirmations and use defaults for unset optional values
    #[arg(long, short = 'y')]
    yes: bool,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Error: failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run_login(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so the token dump on stdout stays clean.
fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let login: Directive = format!("oidc_device_login={}", level).parse()?;
    let flow: Directive = format!("oidc_device_flow={}", level).parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(login)
                .add_directive(flow),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Resolve configuration and run the device flow. Returns whether tokens were obtained.
async fn run_login(cli: Cli) -> anyhow::Result<bool> {
    let overrides = CliOverrides {
        domain: cli.domain,
        client_id: cli.client_id,
        audience: cli.audience,
        scope: cli.scope,
    };
    let file = FileConfig::load(cli.config.as_deref())?;
    let config = CliConfig::resolve(
        overrides,
        file,
        EnvDefaults::from_env(),
        &StdinPrompter,
        cli.yes,
    )?;

    let authority = config.authority();
    let request = config.request();
    info!(
        authority = %authority,
        client_id = %request.client_id,
        scope = ?request.scope_param(),
        audience = ?request.audience,
        "Starting device authorization flow"
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_watcher(cancel.clone());

    let flow = DeviceFlow::new(FlowSettings::default())?.with_cancellation(cancel);
    let display = TerminalDisplay::new(DisplayOptions {
        assume_yes: cli.yes,
        no_browser: cli.no_browser,
    });

    match flow.run(&authority, &request, &display).await {
        Ok(FlowOutcome::Success(_)) => Ok(true),
        Ok(FlowOutcome::Failed(failure)) => {
            debug!(?failure, "Device flow ended without tokens");
            Ok(false)
        }
        Err(FlowError::Cancelled) => {
            eprintln!("\n\nAborted.");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Cancel the run on Ctrl-C. A blocking stdin read cannot observe the
/// token, so the process exits after a grace period if still running.
fn spawn_interrupt_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling device flow");
            cancel.cancel();
            tokio::time::sleep(CANCEL_GRACE).await;
            std::process::exit(130);
        }
    });
}
