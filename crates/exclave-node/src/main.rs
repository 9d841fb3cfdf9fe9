//! Exclave node binary.
//!
//! Runs one process of the distributed mutual-exclusion protocol plus a
//! demo workload that cycles through the critical section and
//! periodically triggers snapshot rounds for offline auditing.
//!
//! ```text
//! exclave-node --id 0 --peers 127.0.0.1:7000,127.0.0.1:7001,127.0.0.1:7002 \
//!     --snapshot-dir ./snapshots
//! ```

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use exclave_node::{Node, NodeConfig, NodeError, NodeHandle, RecordLog, TcpLink};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How many inbound lines may queue before the transport backpressures.
const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "exclave-node", about = "Distributed mutual-exclusion node")]
struct Args {
    /// Local process id: index into the peer list.
    #[arg(long)]
    id: usize,

    /// Addresses of all processes, own address included, in the same
    /// order on every process.
    #[arg(long, value_delimiter = ',', required = true)]
    peers: Vec<String>,

    /// Directory for snapshot record files (`snapshot<id>`). Records
    /// are only logged when absent.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Number of critical sections to run before exiting; 0 runs
    /// forever.
    #[arg(long, default_value_t = 0)]
    sections: u64,

    /// Trigger a snapshot round after every this many sections; 0
    /// disables local triggers.
    #[arg(long, default_value_t = 3)]
    snapshot_every: u64,

    /// Milliseconds to hold the critical section.
    #[arg(long, default_value_t = 150)]
    hold_ms: u64,

    /// Milliseconds to idle between sections.
    #[arg(long, default_value_t = 350)]
    idle_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "node failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<(), NodeError> {
    let Some(local) = args.peers.get(args.id).cloned() else {
        return Err(NodeError::Engine(exclave_core::EngineError::InvalidMembership {
            id: args.id,
            n: args.peers.len(),
        }));
    };

    let (link, inbound) = TcpLink::bind(&local, INBOUND_CAPACITY).await?;
    info!(id = args.id, %local, "listening");

    let mut config = NodeConfig::new(args.id, args.peers.clone());
    if let Some(dir) = &args.snapshot_dir {
        tokio::fs::create_dir_all(dir).await?;
        config.snapshot_path = Some(RecordLog::in_dir(dir, args.id).path().to_path_buf());
    }

    let (node, handle) = Node::new(config, link, inbound)?;
    tokio::spawn(node.run());

    workload(handle, &args).await
}

/// Demo application: enter, hold, exit, occasionally snapshot.
async fn workload(mut handle: NodeHandle, args: &Args) -> Result<(), NodeError> {
    let mut section: u64 = 0;
    loop {
        if args.sections > 0 && section == args.sections {
            info!(sections = section, "workload finished");
            return Ok(());
        }

        handle.enter().await?;
        info!(section, "in critical section");
        tokio::time::sleep(Duration::from_millis(args.hold_ms)).await;
        handle.exit().await?;
        section += 1;

        if args.snapshot_every > 0 && section % args.snapshot_every == 0 {
            handle.snapshot().await?;
        }

        tokio::time::sleep(Duration::from_millis(args.idle_ms)).await;
    }
}
