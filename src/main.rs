//! Aurum node binary.

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use aurum::crypto::{CryptoError, Keypair};
use aurum::genesis::{self, GenesisConfig, FOUNDER_KEY_BITS};
use aurum::net::{NetConfig, DEFAULT_FANOUT};
use aurum::node::{Node, NodeConfig, NodeHandle};
use aurum::types::SignedTransaction;

#[derive(Parser)]
#[command(name = "aurum", version, about = "Aurum proof-of-stake node")]
struct Args {
    /// Listen port (0 picks an ephemeral port)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Address other peers should use to dial this node
    #[arg(long, default_value = "127.0.0.1")]
    advertise_ip: String,

    /// host:port of a known peer; omit to found a new network
    #[arg(short, long)]
    bootstrap: Option<String>,

    /// Lottery slot length in milliseconds
    #[arg(long, default_value_t = 1000)]
    slot_ms: u64,

    /// Connections a founding node waits for before publishing genesis
    #[arg(long, default_value_t = 0)]
    threshold: usize,

    /// Act as founding account 1..=10 (derives the demo founder keypair)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    founder: Option<u8>,

    /// Modulus size for a freshly generated keypair
    #[arg(long, default_value_t = FOUNDER_KEY_BITS)]
    key_bits: u64,

    /// Import an existing keypair: public modulus in decimal
    #[arg(long, requires = "key_d")]
    key_n: Option<String>,

    /// Import an existing keypair: secret exponent in decimal
    #[arg(long, requires = "key_n")]
    key_d: Option<String>,

    /// Genesis lottery seed (founding node only; random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Genesis hardness threshold in decimal (founding node only)
    #[arg(long)]
    hardness: Option<String>,

    /// Read send/balance/status commands from stdin
    #[arg(short, long)]
    interactive: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aurum=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let keypair = match build_keypair(&args) {
        Ok(keypair) => keypair,
        Err(e) => {
            error!("account setup failed: {e}");
            return;
        }
    };
    info!(account = %keypair.public_key(), "account ready");

    let config = NodeConfig {
        net: NetConfig {
            listen_port: args.port,
            advertise_ip: args.advertise_ip,
            bootstrap: args.bootstrap,
            fanout: DEFAULT_FANOUT,
        },
        slot_interval: Duration::from_millis(args.slot_ms),
        connection_threshold: args.threshold,
        genesis: GenesisConfig {
            seed: args.seed,
            hardness: args.hardness,
            ..GenesisConfig::default()
        },
    };

    let (node, handle) = Node::new(keypair.clone(), config);

    if args.interactive {
        tokio::spawn(interactive_loop(handle.clone(), keypair));
    }

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down");
            ctrl_c_handle.shutdown();
        }
    });

    if let Err(e) = node.run().await {
        error!("node failed: {e}");
    }
}

/// Resolve the node's keypair: imported, derived founding demo key, or
/// freshly generated, in that order of precedence.
fn build_keypair(args: &Args) -> Result<Keypair, CryptoError> {
    if let (Some(n), Some(d)) = (&args.key_n, &args.key_d) {
        info!("importing keypair");
        return Keypair::from_decimal(n, d);
    }
    match args.founder {
        Some(index) => {
            info!(index, "deriving founding account keypair");
            genesis::founder_keypair(index as usize)
        }
        None => {
            info!(bits = args.key_bits, "generating keypair");
            Keypair::generate(args.key_bits, &mut rand::thread_rng())
        }
    }
}

/// Stdin command loop:
///   send <account> <amount>
///   balance [account]
///   status
///   quit
async fn interactive_loop(handle: NodeHandle, keypair: Keypair) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["send", to, amount] => match amount.parse::<i64>() {
                Ok(amount) => {
                    let tx = SignedTransaction::create(&keypair, to.to_string(), amount);
                    info!(id = %tx.id, amount, "submitting transaction");
                    if !handle.submit(tx).await {
                        break;
                    }
                }
                Err(_) => warn!("amount must be an integer"),
            },
            ["balance"] => {
                let own = keypair.public_key();
                match handle.balance(&own).await {
                    Some(balance) => println!("balance: {balance}"),
                    None => break,
                }
            }
            ["balance", account] => match handle.balance(account).await {
                Some(balance) => println!("balance of {account}: {balance}"),
                None => break,
            },
            ["status"] => match handle.status().await {
                Some(status) => println!(
                    "active: {} slot: {} depth: {} connections: {} pending: {} balance: {}",
                    status.active,
                    status.slot,
                    status.chain_depth,
                    status.connections,
                    status.pending,
                    status.own_balance
                ),
                None => break,
            },
            ["quit"] | ["exit"] => {
                handle.shutdown();
                break;
            }
            [] => {}
            _ => error!("unknown command: {line}"),
        }
    }
}
