#![deny(unsafe_code)]

//! panctl: command-line control plane for the pantalaimon bridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use panbridge_config::AppConfig;
use panbridge_core::ipc::{IpcClient, IpcState, server};
use panbridge_core::pipe::JsonLinesWorker;
use panbridge_core::store::{MemoryStore, PanStore, SnapshotFileStore};
use panbridge_core::{Bridge, MessageId, ShutdownSignal, queue};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// panctl: drive a pantalaimon bridge over its control socket.
#[derive(Parser)]
#[command(name = "panctl", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "panbridge.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Control socket path (overrides `[ipc] socket_path`).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Wait for the worker's answer instead of printing only the id.
#[derive(Args, Debug, Clone, Copy)]
struct WaitArgs {
    /// Block until the matching Response signal arrives.
    #[arg(long)]
    wait: bool,

    /// Seconds to wait with `--wait`.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[derive(Args, Debug)]
struct KeysArgs {
    /// Proxy account the keys belong to.
    pan_user: String,
    /// Key file to write or read.
    file: PathBuf,
    /// Passphrase protecting the key file.
    passphrase: String,
    #[command(flatten)]
    wait: WaitArgs,
}

#[derive(Args, Debug)]
struct RoomArgs {
    pan_user: String,
    room_id: String,
    #[command(flatten)]
    wait: WaitArgs,
}

#[derive(Args, Debug)]
struct DeviceArgs {
    pan_user: String,
    /// Owner of the device.
    user_id: String,
    device_id: String,
    #[command(flatten)]
    wait: WaitArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge, talking to a worker over stdin/stdout.
    Serve {
        /// JSON snapshot file the worker keeps current.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Stop a running bridge.
    Stop,

    /// Show bridge health.
    Health,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,

        /// Ask the running bridge instead of reading the file.
        #[arg(long)]
        remote: bool,
    },

    /// List accounts per configured server.
    Servers,

    /// List devices known to an account.
    Devices {
        pan_user: String,

        /// Only devices of this user.
        #[arg(long)]
        user: Option<String>,
    },

    /// Print signals emitted after a sequence number.
    Signals {
        #[arg(long, default_value_t = 0)]
        after: u64,
    },

    /// Export the account's room keys to a file.
    ExportKeys(KeysArgs),
    /// Import room keys from a file.
    ImportKeys(KeysArgs),

    /// Send to a room despite unverified devices.
    SendAnyways(RoomArgs),
    /// Cancel a message held back by unverified devices.
    CancelSending(RoomArgs),

    Verify(DeviceArgs),
    Unverify(DeviceArgs),
    Blacklist(DeviceArgs),
    Unblacklist(DeviceArgs),

    /// Start interactive (emoji) verification.
    StartVerification(DeviceArgs),
    CancelVerification(DeviceArgs),
    AcceptVerification(DeviceArgs),
    /// Confirm that the emoji match.
    ConfirmVerification(DeviceArgs),
}

impl Commands {
    fn wait_args(&self) -> Option<WaitArgs> {
        match self {
            Commands::ExportKeys(a) | Commands::ImportKeys(a) => Some(a.wait),
            Commands::SendAnyways(a) | Commands::CancelSending(a) => Some(a.wait),
            Commands::Verify(a)
            | Commands::Unverify(a)
            | Commands::Blacklist(a)
            | Commands::Unblacklist(a)
            | Commands::StartVerification(a)
            | Commands::CancelVerification(a)
            | Commands::AcceptVerification(a)
            | Commands::ConfirmVerification(a) => Some(a.wait),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    // stdout carries the worker pipe under `serve`
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .init();

    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(|| server::socket_path_from_config(&config));

    match cli.command {
        Commands::Serve { snapshot } => cmd_serve(config, socket, snapshot).await?,
        Commands::Config { show, remote } => {
            cmd_config(&cli.config, &config, show, remote, &socket).await?
        }
        command => {
            let client = IpcClient::new(&socket);
            println!("{}", run_client(&client, command).await?);
        }
    }

    Ok(())
}

/// `-v` beats `[logging] level`; `RUST_LOG` beats both.
fn log_filter(verbose: u8, config: &AppConfig) -> &str {
    match verbose {
        0 => &config.logging.level,
        1 => "debug",
        _ => "trace",
    }
}

async fn cmd_serve(config: AppConfig, socket: PathBuf, snapshot: Option<PathBuf>) -> Result<()> {
    let store: Arc<dyn PanStore> = match snapshot {
        Some(path) => {
            info!(path = %path.display(), "Reading account state from snapshot file");
            Arc::new(SnapshotFileStore::new(path))
        }
        None => Arc::new(MemoryStore::new()),
    };

    let (queues, endpoint) = queue::channel();
    let mut bridge = Bridge::new(config, store, queues);
    let shutdown = bridge.shutdown_sender();

    let state = Arc::new(IpcState::from_bridge(&bridge));
    let ipc_shutdown = shutdown.subscribe();
    let ipc = tokio::spawn(async move { server::serve(&socket, state, ipc_shutdown).await });

    let worker = JsonLinesWorker::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    let pipe_shutdown = shutdown.subscribe();
    let worker_gone = shutdown.clone();
    let pipe = tokio::spawn(async move {
        let result = worker.run(endpoint, pipe_shutdown).await;
        let _ = worker_gone.send(ShutdownSignal);
        result
    });

    bridge.run().await;

    match pipe.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "Worker pipe failed"),
        Err(e) => warn!(error = %e, "Worker pipe task panicked"),
    }
    ipc.await??;
    Ok(())
}

async fn cmd_config(
    config_path: &Path,
    config: &AppConfig,
    show: bool,
    remote: bool,
    socket: &Path,
) -> Result<()> {
    if remote {
        let remote = IpcClient::new(socket).config().await?;
        println!("{}", remote.toml);
    } else if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Run one control-socket command and render its result.
///
/// Command operations print the correlation id, or with `--wait` the
/// Response signal carrying it.
async fn run_client(client: &IpcClient, command: Commands) -> Result<String> {
    let wait = command.wait_args().filter(|w| w.wait);
    let after = match wait {
        Some(_) => client.health().await?.last_signal,
        None => 0,
    };

    let id: MessageId = match command {
        Commands::Stop => return Ok(client.stop().await?.message),
        Commands::Health => return to_json(&client.health().await?),
        Commands::Servers => return to_json(&client.servers().await?.servers),
        Commands::Devices { pan_user, user } => {
            return to_json(&client.devices(&pan_user, user.as_deref()).await?.devices);
        }
        Commands::Signals { after } => return to_json(&client.signals(after).await?),
        Commands::ExportKeys(k) => client.export_keys(&k.pan_user, k.file, k.passphrase).await?,
        Commands::ImportKeys(k) => client.import_keys(&k.pan_user, k.file, k.passphrase).await?,
        Commands::SendAnyways(r) => client.send_anyways(&r.pan_user, &r.room_id).await?,
        Commands::CancelSending(r) => client.cancel_sending(&r.pan_user, &r.room_id).await?,
        Commands::Verify(d) => client.verify(&d.pan_user, &d.user_id, &d.device_id).await?,
        Commands::Unverify(d) => client.unverify(&d.pan_user, &d.user_id, &d.device_id).await?,
        Commands::Blacklist(d) => client.blacklist(&d.pan_user, &d.user_id, &d.device_id).await?,
        Commands::Unblacklist(d) => {
            client
                .unblacklist(&d.pan_user, &d.user_id, &d.device_id)
                .await?
        }
        Commands::StartVerification(d) => {
            client
                .start_verification(&d.pan_user, &d.user_id, &d.device_id)
                .await?
        }
        Commands::CancelVerification(d) => {
            client
                .cancel_verification(&d.pan_user, &d.user_id, &d.device_id)
                .await?
        }
        Commands::AcceptVerification(d) => {
            client
                .accept_verification(&d.pan_user, &d.user_id, &d.device_id)
                .await?
        }
        Commands::ConfirmVerification(d) => {
            client
                .confirm_verification(&d.pan_user, &d.user_id, &d.device_id)
                .await?
        }
        Commands::Serve { .. } | Commands::Config { .. } => {
            anyhow::bail!("not a control socket command")
        }
    };

    match wait {
        Some(w) => {
            let record = client
                .wait_for_response(id, after, Duration::from_secs(w.timeout))
                .await?;
            to_json(&record)
        }
        None => Ok(id.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))
    } else {
        Ok(AppConfig::default())
    }
}
