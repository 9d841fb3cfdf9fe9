//! The node event loop.
//!
//! One task owns the engine and is its only mutator: the loop waits on
//! the application command channel and the inbound link stream, handles
//! exactly one event to completion, executes the resulting actions, and
//! only then considers the next event. This strict serialization is the
//! concurrency contract that makes every engine transition atomic.
//!
//! Outbound sends are spawned fire-and-forget so one slow peer cannot
//! stall the loop. The grant channel has capacity 1, which is always
//! enough because grants and ENTER commands alternate one-for-one.

use std::{path::PathBuf, sync::Arc};

use exclave_core::{Action, Engine, EngineError};
use exclave_proto::{Message, ProcessId};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{link::Link, record_log::RecordLog};

/// Commands the application may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Request the critical section; a grant arrives asynchronously.
    Enter,
    /// Release the critical section.
    Exit,
    /// Begin (or join) a snapshot round.
    Snapshot,
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Local process id: the index into `peers`.
    pub id: ProcessId,
    /// Addresses of all processes, own address included, in the same
    /// order on every process. Fixed for the node's lifetime.
    pub peers: Vec<String>,
    /// Where to append completed snapshot records; `None` logs the
    /// round completion instead of persisting it.
    pub snapshot_path: Option<PathBuf>,
    /// Capacity of the application command channel.
    pub command_capacity: usize,
}

impl NodeConfig {
    /// Configuration with the default channel capacity and no snapshot
    /// persistence.
    pub fn new(id: ProcessId, peers: Vec<String>) -> Self {
        Self { id, peers, snapshot_path: None, command_capacity: 1 }
    }
}

/// Errors surfaced by the node runtime.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The engine rejected the configuration.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Transport setup failed.
    #[error("transport error")]
    Io(#[from] std::io::Error),

    /// The node event loop is no longer running.
    #[error("node stopped")]
    Stopped,
}

/// Application-side handle: command intake plus grant outlet.
#[derive(Debug)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    grants: mpsc::Receiver<()>,
}

impl NodeHandle {
    /// Request the critical section and wait for the grant.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node has shut down.
    pub async fn enter(&mut self) -> Result<(), NodeError> {
        self.command(Command::Enter).await?;
        self.grants.recv().await.ok_or(NodeError::Stopped)
    }

    /// Release the critical section.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node has shut down.
    pub async fn exit(&self) -> Result<(), NodeError> {
        self.command(Command::Exit).await
    }

    /// Begin (or join) a snapshot round.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node has shut down.
    pub async fn snapshot(&self) -> Result<(), NodeError> {
        self.command(Command::Snapshot).await
    }

    async fn command(&self, command: Command) -> Result<(), NodeError> {
        self.commands.send(command).await.map_err(|_| NodeError::Stopped)
    }
}

/// The engine actor: owns the engine, serializes all events.
pub struct Node<L: Link> {
    engine: Engine,
    link: Arc<L>,
    peers: Arc<Vec<String>>,
    inbound: mpsc::Receiver<String>,
    commands: mpsc::Receiver<Command>,
    grants: mpsc::Sender<()>,
    log: Option<RecordLog>,
}

impl<L: Link> Node<L> {
    /// Build a node over an already-bound link.
    ///
    /// `inbound` is the payload stream produced by the link's accept
    /// side.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration names an id outside the
    /// membership or a membership too small for the protocol.
    pub fn new(
        config: NodeConfig,
        link: L,
        inbound: mpsc::Receiver<String>,
    ) -> Result<(Self, NodeHandle), NodeError> {
        let engine = Engine::new(config.id, config.peers.len())?;
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (grant_tx, grant_rx) = mpsc::channel(1);
        let node = Self {
            engine,
            link: Arc::new(link),
            peers: Arc::new(config.peers),
            inbound,
            commands: command_rx,
            grants: grant_tx,
            log: config.snapshot_path.map(RecordLog::new),
        };
        Ok((node, NodeHandle { commands: command_tx, grants: grant_rx }))
    }

    /// Run the event loop until both event sources close.
    pub async fn run(mut self) {
        info!(id = self.engine.id(), n = self.engine.membership_size(), "node running");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                payload = self.inbound.recv() => match payload {
                    Some(payload) => self.handle_inbound(payload).await,
                    None => break,
                },
            }
        }
        debug!(id = self.engine.id(), "node stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Enter => self.engine.request_entry(),
            Command::Exit => self.engine.release(),
            Command::Snapshot => Ok(self.engine.begin_snapshot()),
        };
        match result {
            Ok(actions) => self.execute(actions).await,
            Err(error) => {
                warn!(?command, %error, "command rejected");
            },
        }
    }

    async fn handle_inbound(&mut self, payload: String) {
        let message = match Message::parse(&payload) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, payload, "dropping malformed message");
                return;
            },
        };
        match self.engine.deliver(message) {
            Ok(actions) => self.execute(actions).await,
            Err(error) => {
                warn!(%error, payload, "dropping message");
            },
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => self.spawn_send(to, message),
                Action::Grant => {
                    if self.grants.send(()).await.is_err() {
                        warn!("application dropped the grant channel");
                    }
                },
                Action::Record(record) => {
                    if let Some(log) = &self.log {
                        match log.append(&record).await {
                            Ok(()) => {
                                info!(round = record.round, path = %log.path().display(),
                                    "snapshot record persisted");
                            },
                            Err(error) => {
                                warn!(round = record.round, %error,
                                    "failed to persist snapshot record");
                            },
                        }
                    } else {
                        info!(round = record.round, line = record.to_line(),
                            "snapshot round complete");
                    }
                },
            }
        }
    }

    /// Fire-and-forget send; a failure is the transport's concern and
    /// only logged.
    fn spawn_send(&self, to: ProcessId, message: Message) {
        let Some(address) = self.peers.get(to).cloned() else {
            // Engine validates peer ids; an unknown id here is a bug.
            warn!(to, "send to unknown peer dropped");
            return;
        };
        let link = Arc::clone(&self.link);
        let payload = message.encode();
        tokio::spawn(async move {
            if let Err(error) = link.send(&address, payload).await {
                warn!(%address, %error, "send failed");
            }
        });
    }
}
