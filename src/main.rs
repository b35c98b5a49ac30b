//! agent-probe CLI
//!
//! Resolve, verify, and probe ERC-8004 agent identities. Results are printed
//! to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use agent_probe::identity::AgentRef;
use agent_probe::{CapabilityProbe, IdentityVerifier, MultichainScanner, RpcChainReader, Settings};

#[derive(Parser)]
#[command(name = "agent-probe", version, about = "Resolve, verify, and probe ERC-8004 agent identities")]
struct Cli {
    /// Settings file (default: ~/.agent-probe/settings.json)
    #[arg(long, global = true, env = "AGENT_PROBE_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a global identifier without touching the network
    Parse { global_id: String },

    /// Verify an identity against its registry and registration file
    Verify {
        global_id: String,
        /// Accept registration files that do not list this identity
        #[arg(long)]
        lenient: bool,
    },

    /// Verify an identity and report its declared capabilities and x402 price
    Probe {
        global_id: String,
        /// Bound on the payment request, in milliseconds
        #[arg(long)]
        payment_timeout_ms: Option<u64>,
    },

    /// Find every identity a wallet owns across the configured chains
    Scan {
        wallet: String,
        /// Restrict to these chain ids (repeatable)
        #[arg(long = "chain")]
        chains: Vec<u64>,
        /// Fetch registration files for discovered identities
        #[arg(long)]
        fetch_registration: bool,
        /// Budget for each chain's first call, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Bound on the whole scan, in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Read or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every setting as path = value
    List,
    /// Print one setting by dotted path
    Get { path: String },
    /// Change one setting by dotted path
    Set { path: String, value: String },
    /// Restore one setting to its default
    Reset { path: String },
    /// Print the settings file location
    Path,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParsedId {
    global_id: String,
    namespace: String,
    chain_id: u64,
    registry: String,
    registry_id: String,
    agent_id: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agent_probe=info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings_path = cli.settings.clone().unwrap_or_else(Settings::default_path);
    let mut settings = load_settings(&cli);

    match cli.command {
        Command::Parse { global_id } => {
            let agent = AgentRef::parse(&global_id)?;
            print_json(&ParsedId {
                global_id: agent.to_string(),
                namespace: agent.namespace.clone(),
                chain_id: agent.chain_id,
                registry: agent.registry().to_string(),
                registry_id: agent.registry_id(),
                agent_id: agent.agent_id,
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { global_id, lenient } => {
            if lenient {
                settings.identity.strict_back_reference = false;
            }
            let result = verifier(&settings)?.verify(&global_id).await;
            print_json(&result)?;
            Ok(verdict(result.valid))
        }
        Command::Probe {
            global_id,
            payment_timeout_ms,
        } => {
            if let Some(ms) = payment_timeout_ms {
                settings.probe.payment_timeout_ms = ms;
            }
            let transport = Arc::new(settings.http_transport());
            let probe = CapabilityProbe::new(verifier(&settings)?, transport)
                .with_options(settings.probe_options());
            let result = probe.probe(&global_id).await;
            print_json(&result)?;
            Ok(verdict(result.verified))
        }
        Command::Scan {
            wallet,
            chains,
            fetch_registration,
            timeout_ms,
            deadline_ms,
        } => {
            let wallet: Address = wallet
                .parse()
                .with_context(|| format!("invalid wallet address '{}'", wallet))?;
            if fetch_registration {
                settings.scan.fetch_registration = true;
            }
            if let Some(ms) = timeout_ms {
                settings.scan.timeout_per_chain_ms = ms;
            }
            if deadline_ms.is_some() {
                settings.scan.deadline_ms = deadline_ms;
            }

            let targets = settings.chain_targets(&chains);
            if targets.is_empty() {
                bail!("no enabled chains match {:?}", chains);
            }
            let scanner = MultichainScanner::new(
                Arc::new(chain_reader(&settings)?),
                Arc::new(settings.http_transport()),
            );
            let found = scanner
                .scan(wallet, &targets, &settings.scan_options())
                .await;
            print_json(&found)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => {
            config(action, &settings, &settings_path)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_settings(cli: &Cli) -> Settings {
    match &cli.settings {
        Some(path) => {
            let _ = dotenvy::dotenv();
            let mut settings = Settings::load_from(path);
            settings.apply_env();
            settings
        }
        None => Settings::load(),
    }
}

fn config(action: ConfigAction, settings: &Settings, path: &Path) -> Result<()> {
    match action {
        ConfigAction::List => {
            for (key, value) in settings.list() {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Get { path: key } => match settings.get(&key) {
            Some(value) => println!("{}", value),
            None => bail!("unknown setting: {}", key),
        },
        ConfigAction::Set { path: key, value } => {
            // Persist only file contents, not env overrides.
            let mut stored = Settings::load_from(path);
            stored.set(&key, &value).map_err(anyhow::Error::msg)?;
            stored.save_to(path).map_err(anyhow::Error::msg)?;
            tracing::info!("Set {} = {} in {}", key, value, path.display());
        }
        ConfigAction::Reset { path: key } => {
            let mut stored = Settings::load_from(path);
            stored.reset(&key).map_err(anyhow::Error::msg)?;
            stored.save_to(path).map_err(anyhow::Error::msg)?;
            if let Some(value) = stored.get(&key) {
                tracing::info!("Reset {} to {}", key, value);
            }
        }
        ConfigAction::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn chain_reader(settings: &Settings) -> Result<RpcChainReader> {
    RpcChainReader::new(settings.rpc_endpoints(), settings.rpc_timeout())
        .context("failed to configure RPC endpoints")
}

fn verifier(settings: &Settings) -> Result<IdentityVerifier> {
    Ok(IdentityVerifier::new(
        Arc::new(chain_reader(settings)?),
        Arc::new(settings.http_transport()),
    )
    .with_options(settings.verify_options()))
}

fn verdict(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::from(1) }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
