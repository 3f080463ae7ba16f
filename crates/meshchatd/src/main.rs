//! meshchatd — decentralized chat node.
//!
//! Usage: `meshchatd [listen_port] [name]`

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use meshchat_core::config::MeshConfig;
use meshchat_core::{PeerId, PeerInfo};
use meshchat_services::{bind_host, event_channel, Node, NodeSettings, PeerEntry};

mod console;

use console::{Command, ParseError};

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load config
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshConfig::default()
    });

    // Positional args win over config
    let mut args = std::env::args().skip(1);
    if let Some(port) = args.next() {
        config.network.listen_port = port
            .parse()
            .with_context(|| format!("invalid listen port '{port}'"))?;
    }
    if let Some(name) = args.next() {
        config.identity.name = name;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let name = match config.identity.name.trim() {
        "" => prompt_name(&mut stdin).await?,
        name => name.to_string(),
    };

    // Listener
    let host = config.network.listen_host.clone();
    let listener = bind_host(&host, config.network.listen_port)
        .await
        .with_context(|| format!("failed to listen on {host}:{}", config.network.listen_port))?;
    let port = listener.local_addr()?.port();

    let local = PeerInfo::new(
        PeerId::generate(),
        config.network.advertised_host(),
        port,
        name.clone(),
    );
    tracing::info!(id = %local.id, name = %name, port, "meshchatd starting");

    // Node + status printer
    let (events_tx, mut events_rx) = event_channel();
    let node = Node::new(local, NodeSettings::from_config(&config), events_tx);
    node.serve(listener);

    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            println!("{event}");
        }
    });

    // Console: runs until `exit`, EOF or Ctrl-C
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupt received");
                break;
            }

            line = stdin.next_line() => match line {
                Ok(Some(line)) => {
                    if !run_command(&node, &name, &line).await {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    break;
                }
            }
        }
    }

    node.exit().await;
    drop(node);
    let _ = tokio::time::timeout(std::time::Duration::from_millis(500), printer).await;
    Ok(())
}

/// Ask for a display name until a non-blank one arrives.
async fn prompt_name(stdin: &mut StdinLines) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"Enter your name: ").await?;
        stdout.flush().await?;
        match stdin.next_line().await.context("failed to read name")? {
            Some(line) if !line.trim().is_empty() => return Ok(line.trim().to_string()),
            Some(_) => continue,
            None => anyhow::bail!("stdin closed before a name was entered"),
        }
    }
}

/// Run one console line. Returns false when the console should stop.
async fn run_command(node: &Node, me: &str, line: &str) -> bool {
    match Command::parse(line) {
        Ok(Command::Connect(addr)) => match node.connect(&addr).await {
            Ok(_) => println!("[INFO] Connected to {addr}"),
            Err(e) => println!("[ERROR] {e}"),
        },
        Ok(Command::Say(text)) => {
            println!("[CHAT] {me} says: {text}");
            if node.say(&text).await == 0 {
                println!("[INFO] No peers connected");
            }
        }
        Ok(Command::Peers) => {
            for entry in node.peers().await {
                println!("{}", peer_line(&entry, node.local_id()));
            }
        }
        Ok(Command::Exit) => return false,
        Err(ParseError::Empty) => {}
        Err(e) => println!("{e}"),
    }
    true
}

fn peer_line(entry: &PeerEntry, local: &PeerId) -> String {
    let status = if entry.info.id == *local {
        "self"
    } else if entry.is_connected() {
        "connected"
    } else {
        "gossip-only"
    };
    format!(
        "  {} ({}) at {} [{}]",
        entry.info.name,
        entry.info.id.short(),
        entry.info.dial_addr(),
        status
    )
}
