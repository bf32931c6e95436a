//! End-to-end node tests: full nodes over loopback TCP, from genesis
//! publication through transfers landing in both ledgers.
//!
//! Hardness is pinned to zero so every staked slot wins, and the slot
//! interval is short; the tests assert convergence, not timing.

use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::time::{sleep, timeout};

use aurum::crypto::Keypair;
use aurum::genesis::{founder_keypair_sized, GenesisConfig};
use aurum::ledger::{GENESIS_ALLOCATION, TRANSFER_FEE};
use aurum::net::NetConfig;
use aurum::node::{Node, NodeConfig, NodeHandle};
use aurum::types::SignedTransaction;

const WAIT: Duration = Duration::from_secs(20);
const KEY_BITS: u64 = 512;

fn node_config(bootstrap: Option<String>, threshold: usize) -> NodeConfig {
    NodeConfig {
        net: NetConfig {
            listen_port: 0,
            advertise_ip: "127.0.0.1".into(),
            bootstrap,
            ..NetConfig::default()
        },
        slot_interval: Duration::from_millis(50),
        connection_threshold: threshold,
        genesis: GenesisConfig {
            seed: Some(7),
            hardness: Some("0".into()),
            founder_key_bits: KEY_BITS,
        },
    }
}

fn start_node(keypair: Keypair, config: NodeConfig) -> NodeHandle {
    let (node, handle) = Node::new(keypair, config);
    tokio::spawn(node.run());
    handle
}

/// Poll the handle until the condition holds or the deadline passes.
async fn converge<F, Fut>(what: &str, probe: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(WAIT, async {
        while !probe().await {
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_until_active(handle: &NodeHandle) {
    converge("consensus to activate", || async {
        handle.status().await.map(|s| s.active).unwrap_or(false)
    })
    .await;
}

async fn bound_uri(handle: &NodeHandle) -> String {
    let mut uri = String::new();
    converge("listener to bind", || async {
        match handle.status().await {
            Some(status) => !status.uri.is_empty(),
            None => false,
        }
    })
    .await;
    if let Some(status) = handle.status().await {
        uri = status.uri;
    }
    uri
}

#[tokio::test]
async fn single_founder_mints_blocks_and_applies_transfers() {
    let founder = founder_keypair_sized(1, KEY_BITS).unwrap();
    let handle = start_node(founder.clone(), node_config(None, 0));

    wait_until_active(&handle).await;

    // zero hardness: the staked founder wins slots and collects rewards
    converge("rewards to accrue", || async {
        handle
            .status()
            .await
            .map(|s| s.own_balance > GENESIS_ALLOCATION)
            .unwrap_or(false)
    })
    .await;

    let recipient = founder_keypair_sized(2, KEY_BITS).unwrap().public_key();
    let tx = SignedTransaction::create(&founder, recipient.clone(), 100);
    assert!(handle.submit(tx).await);

    converge("transfer to land in a block", || async {
        handle.balance(&recipient).await == Some(GENESIS_ALLOCATION + 100 - TRANSFER_FEE)
    })
    .await;

    handle.shutdown();
}

#[tokio::test]
async fn transfer_reaches_both_ledgers() {
    // the founder waits for one connection before publishing genesis, so
    // the joiner is guaranteed to receive it
    let founder = founder_keypair_sized(1, KEY_BITS).unwrap();
    let founder_handle = start_node(founder.clone(), node_config(None, 1));
    let founder_uri = bound_uri(&founder_handle).await;

    // the joiner holds no stake: it validates and follows but never wins
    let mut rng = ChaCha20Rng::seed_from_u64(99);
    let observer = Keypair::generate(KEY_BITS, &mut rng).unwrap();
    let observer_account = observer.public_key();
    let observer_handle = start_node(observer, node_config(Some(founder_uri), 0));

    wait_until_active(&founder_handle).await;
    wait_until_active(&observer_handle).await;

    let tx = SignedTransaction::create(&founder, observer_account.clone(), 500);
    assert!(founder_handle.submit(tx).await);

    let expected = 500 - TRANSFER_FEE;
    converge("transfer to reach the proposer's ledger", || async {
        founder_handle.balance(&observer_account).await == Some(expected)
    })
    .await;
    converge("transfer to reach the observer's ledger", || async {
        observer_handle.balance(&observer_account).await == Some(expected)
    })
    .await;

    // the observer tracks the founder's growing chain
    converge("observer chain to grow", || async {
        observer_handle
            .status()
            .await
            .map(|s| s.chain_depth >= 3)
            .unwrap_or(false)
    })
    .await;

    observer_handle.shutdown();
    founder_handle.shutdown();
}
