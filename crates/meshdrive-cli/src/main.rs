//! meshdrive CLI: a thin process-embedder over `meshdrive_core::Node`.
//!
//! `meshdrive` brings up a single node backed by the in-memory swarm and log
//! store reference implementations (the same ones the core crates ship for
//! their own integration tests), then drives it from an interactive
//! command loop. A real deployment would build the node over a networked
//! swarm/log-store pair instead of the loopback ones constructed here; the
//! `Node` API this binary calls does not change either way.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meshdrive_core::{Event, LoggingConfig, Node, NodeConfig, SaveData, TransferConfig};
use meshdrive_crypto::PeerId;
use meshdrive_discovery::{LocalSwarm, Rendezvous};
use meshdrive_transport::memory::{MemoryLogStore, MemoryNetwork};

use meshdrive_cli::config::{default_corestore_path, default_save_data_path, default_watch_path};
use meshdrive_cli::progress::TransferProgress;

#[derive(Parser)]
#[command(name = "meshdrive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the boot save-data file.
    #[arg(long)]
    save_data: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate fresh node identity and network-key material and write a new
    /// save-data file.
    Keygen {
        /// Directory this node will watch and sync.
        #[arg(long)]
        watch_path: Option<PathBuf>,
        /// Directory the log store will use for its on-disk state.
        #[arg(long)]
        corestore_path: Option<PathBuf>,
    },
    /// Bring up a node and enter an interactive command loop.
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let save_data_path = match cli.save_data {
        Some(path) => path,
        None => default_save_data_path()?,
    };

    match cli.command {
        Commands::Keygen { watch_path, corestore_path } => keygen(&save_data_path, watch_path, corestore_path),
        Commands::Daemon => daemon(&save_data_path).await,
    }
}

fn keygen(save_data_path: &std::path::Path, watch_path: Option<PathBuf>, corestore_path: Option<PathBuf>) -> Result<()> {
    if save_data_path.exists() {
        bail!("save-data already exists at {}; remove it first if you want to generate a new identity", save_data_path.display());
    }

    let watch_path = watch_path.map(Ok).unwrap_or_else(default_watch_path)?;
    let corestore_path = corestore_path.map(Ok).unwrap_or_else(default_corestore_path)?;
    std::fs::create_dir_all(&watch_path).with_context(|| format!("creating {}", watch_path.display()))?;
    std::fs::create_dir_all(&corestore_path).with_context(|| format!("creating {}", corestore_path.display()))?;
    if let Some(parent) = save_data_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let save_data = SaveData::generate(watch_path, corestore_path)?;
    save_data.save_to(save_data_path)?;

    let peer_id = meshdrive_crypto::Keypair::from_seed(save_data.seed).peer_id();
    println!("peer id:     {peer_id}");
    println!("network key: {}", hex::encode(save_data.network_key));
    println!("save data:   {}", save_data_path.display());
    Ok(())
}

async fn daemon(save_data_path: &std::path::Path) -> Result<()> {
    let save_data = SaveData::load_from(save_data_path)
        .with_context(|| format!("loading {} (run `meshdrive keygen` first)", save_data_path.display()))?;

    let node_config = NodeConfig {
        watch_path: save_data.watch_path.clone(),
        corestore_path: save_data.corestore_path.clone(),
        index: save_data.index.clone(),
        transfer: TransferConfig::default(),
        logging: LoggingConfig::default(),
    };

    let network = MemoryNetwork::new();
    let rendezvous = Rendezvous::new();
    let log_store = MemoryLogStore::new(network, save_data.seed);

    let node = Node::open(
        save_data.seed,
        save_data.network_key,
        save_data.queued_downloads.clone(),
        node_config,
        log_store,
        move |peer_id, dispatcher| LocalSwarm::new(rendezvous, peer_id, dispatcher),
    )
    .await?;

    println!("peer id: {}", node.peer_id());
    spawn_event_logger(node.clone());

    node.join(None).await?;
    println!("joined network key {}", hex::encode(save_data.network_key));

    run_command_loop(&node).await;

    node.close().await;
    let final_save_data = node.save_data().await;
    final_save_data.save_to(save_data_path)?;
    Ok(())
}

/// Prints every public event to stdout, including the progress bars for
/// in-flight downloads (§A.6's CLI-nicety supplement).
fn spawn_event_logger(node: Arc<Node>) {
    let mut events = node.events();
    tokio::spawn(async move {
        let mut bars: std::collections::HashMap<(PeerId, String), TransferProgress> = std::collections::HashMap::new();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            match event {
                Event::DownloadStarted { peer, path } => {
                    println!("download started: {path} from {peer}");
                }
                Event::DownloadProgress { peer, path, bytes_done, bytes_total } => {
                    let key = (peer, path.clone());
                    let bar = bars.entry(key).or_insert_with(|| TransferProgress::new(bytes_total, &path));
                    bar.update(bytes_done);
                }
                Event::DownloadCompleted { peer, path } => {
                    if let Some(bar) = bars.remove(&(peer, path.clone())) {
                        bar.finish_with_message(format!("{path} complete"));
                    }
                    println!("downloaded {path} from {peer}");
                }
                Event::DownloadFailed { peer, path, reason } => {
                    if let Some(bar) = bars.remove(&(peer, path.clone())) {
                        bar.abandon();
                    }
                    println!("download of {path} from {peer} failed: {reason}");
                }
                Event::PeerConnected { peer } => println!("peer connected: {peer}"),
                Event::PeerDisconnected { peer } => println!("peer disconnected: {peer}"),
                Event::PeerFileAdded { peer, path, .. } => println!("{peer} now has {path}"),
                Event::PeerFileRemoved { peer, path } => println!("{peer} removed {path}"),
                Event::PeerFileChanged { peer, path, .. } => println!("{peer} changed {path}"),
                Event::LocalFileAdded { path, .. } => println!("local file added: {path}"),
                Event::LocalFileRemoved { path } => println!("local file removed: {path}"),
                Event::LocalFileChanged { path, .. } => println!("local file changed: {path}"),
                Event::Error { message } => eprintln!("error: {message}"),
                Event::SaveDataUpdate { .. } => {}
            }
        }
    });
}

/// Reads lines from stdin, one command per line, until `quit`/`exit` or EOF.
/// Supported verbs: `peers`, `ls local|network|nonlocal`, `get <peer> <path>`,
/// `archive on|off`, `send <peer> <type> <json>`, `queue <path>`, `join [network-key-hex]`.
async fn run_command_loop(node: &Arc<Node>) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    println!("meshdrive daemon ready. type `help` for commands, `quit` to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        if std::io::Write::flush(&mut std::io::stdout()).is_err() {
            break;
        }
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }
        if let Err(err) = run_command(node, line).await {
            println!("error: {err}");
        }
    }
}

async fn run_command(node: &Arc<Node>, line: &str) -> Result<()> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["help"] => {
            println!("peers | ls local|network|nonlocal | get <peer> <path> | archive on|off | send <peer> <type> <json> | queue <path> | join [network-key-hex]");
        }
        ["peers"] => {
            for peer in node.list_peers() {
                println!(
                    "{} connected {:?} ago, remote log version {}",
                    peer.peer,
                    peer.connected_since.elapsed(),
                    peer.remote_log_version.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string())
                );
            }
        }
        ["ls", "local"] => {
            for file in node.list_local_files().await {
                println!("{}\t{}\t{}", file.path, file.size, file.hash);
            }
        }
        ["ls", "network"] => {
            let files = node.list_network_files().await?;
            for (peer, records) in files.peers {
                for record in records {
                    println!("{peer}\t{}\t{}\t{}", record.path, record.size, record.hash);
                }
            }
        }
        ["ls", "nonlocal"] => {
            for entry in node.list_non_local_files().await? {
                println!("{}\t{}\t{}", entry.peer, entry.path, entry.hash);
            }
        }
        ["get", peer, path] => {
            let peer: PeerId = peer.parse().context("invalid peer id")?;
            node.download_file_from_peer(peer, path).await?;
        }
        ["archive", "on"] => node.activate_archive().await,
        ["archive", "off"] => node.deactivate_archive().await,
        ["queue", path] => node.queue_download(path).await,
        ["join"] => {
            let key = node.join(None).await?;
            println!("joined {}", hex::encode(key));
        }
        ["join", key_hex] => {
            let bytes = hex::decode(key_hex).context("invalid network key hex")?;
            let key: [u8; 32] = bytes.try_into().map_err(|_| anyhow::anyhow!("network key must be 32 bytes"))?;
            let key = node.join(Some(key)).await?;
            println!("joined {}", hex::encode(key));
        }
        ["send", peer, message_type, json_rest @ ..] => {
            let peer: PeerId = peer.parse().context("invalid peer id")?;
            let payload_str = json_rest.join(" ");
            let payload: serde_json::Value = if payload_str.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(&payload_str).context("payload must be valid JSON")?
            };
            let response = node.send_message(peer, message_type, payload).await?;
            println!("{response}");
        }
        _ => println!("unrecognized command; type `help`"),
    }
    Ok(())
}
