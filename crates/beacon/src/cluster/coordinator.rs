//! Discovery/election coordinator.
//!
//! ```text
//!                    announcement before deadline
//! AWAITING_ANNOUNCEMENT ───────────────────────────▶ FOLLOWER
//!          │                                         (worker + redirect responder)
//!          │ deadline elapsed
//!          ▼
//!        LEADER (worker + periodic announcements)
//! ```
//!
//! The deadline is drawn uniformly from a fixed window so nodes that start
//! together are unlikely to time out together. This lowers, but does not remove,
//! the chance of two leaders; there is no re-election and no failover once a
//! role has been taken.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, broadcast};
use tokio::task::JoinHandle;

use beacon_common::{BeaconError, DiscoveryResult, Envelope, LeaderAddress, Payload};

use super::gate::{Gate, GateOutcome};
use super::transport::Transport;
use crate::routes::start_redirect_responder;
use crate::worker::{ResolvedWorkers, Supervisor, WorkerExit};

/// Discovery timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub window_min: Duration,
    pub window_max: Duration,
    pub announce_interval: Duration,
}

impl DiscoverySettings {
    /// A deadline drawn uniformly from the window
    pub fn random_deadline(&self) -> Duration {
        use rand::Rng;

        let min = self.window_min.as_millis() as u64;
        let max = (self.window_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// Why [`Coordinator::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The worker exited on its own
    WorkerExited(WorkerExit),
    /// A shutdown was requested
    ShutdownRequested,
}

pub struct Coordinator<T: Transport> {
    transport: T,
    self_address: LeaderAddress,
    settings: DiscoverySettings,
    gate: Arc<Gate<LeaderAddress>>,
    result: OnceCell<DiscoveryResult>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(transport: T, self_address: LeaderAddress, settings: DiscoverySettings) -> Self {
        Self {
            transport,
            self_address,
            settings,
            gate: Arc::new(Gate::new()),
            result: OnceCell::new(),
        }
    }

    /// The decided role, once discovery has finished
    #[cfg(test)]
    pub fn result(&self) -> Option<&DiscoveryResult> {
        self.result.get()
    }

    /// Decide between leader and follower. Runs once; later calls return the same result.
    pub async fn discover(&self) -> DiscoveryResult {
        self.result
            .get_or_init(|| self.await_announcement())
            .await
            .clone()
    }

    async fn await_announcement(&self) -> DiscoveryResult {
        let gate = self.gate.clone();
        self.transport.add_listener(Arc::new(move |envelope: &Envelope| {
            let Some(leader) = envelope.payload.as_leader_address() else {
                return;
            };
            if gate.signal(leader.clone()) {
                tracing::info!(sender = %envelope.sender, leader = %leader, "📣 Leader announcement received");
            } else {
                tracing::trace!(sender = %envelope.sender, leader = %leader, "Ignoring announcement, role already decided");
            }
        }));

        let deadline = self.settings.random_deadline();
        tracing::info!(
            node = %self.transport.identity(),
            token = %self.transport.token(),
            deadline = ?deadline,
            "🔎 Listening for leader announcements"
        );

        match self.gate.wait(deadline).await {
            GateOutcome::Signalled(leader) => {
                tracing::info!(leader = %leader, "Becoming follower");
                DiscoveryResult::Follower { leader }
            }
            GateOutcome::TimedOut => {
                tracing::info!(address = %self.self_address, "No leader announced, becoming leader");
                DiscoveryResult::Leader {
                    self_address: self.self_address.clone(),
                }
            }
        }
    }

    /// Announce `address` every interval until shutdown
    pub fn spawn_announcer(
        &self,
        address: LeaderAddress,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let interval = self.settings.announce_interval;
        let payload = Payload::leader_info(&address);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            tracing::info!(address = %address, interval = ?interval, "🗣️ Leader announcer started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let envelope = transport.envelope(payload.clone());
                        if let Err(e) = transport.send(&envelope).await {
                            tracing::warn!(error = %e, "Failed to send leader announcement");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("🗣️ Leader announcer shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Discover, take the role, and supervise it until the worker exits or shutdown.
    ///
    /// Only launch failures are errors; all workers are terminated before returning.
    pub async fn run(
        &self,
        workers: &ResolvedWorkers,
        supervisor: &Supervisor,
        redirect_bind: SocketAddr,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<RunOutcome, BeaconError> {
        let mut shutdown_rx = shutdown.subscribe();

        let result = tokio::select! {
            result = self.discover() => result,
            _ = shutdown_rx.recv() => {
                tracing::info!("Shutdown requested during discovery");
                return Ok(RunOutcome::ShutdownRequested);
            }
        };

        let role = result.role();
        let command = workers.for_role(role).render(result.leader_address());
        let worker = supervisor.start(role, &command)?;
        tracing::debug!(role = %role, pid = ?worker.pid(), "Supervising worker");

        let mut announcer = None;
        let mut responder = None;
        match &result {
            DiscoveryResult::Leader { self_address } => {
                announcer = Some(self.spawn_announcer(self_address.clone(), shutdown.subscribe()));
            }
            DiscoveryResult::Follower { leader } => {
                responder = start_redirect_responder(redirect_bind, &self.self_address, leader).await;
            }
        }

        let outcome = tokio::select! {
            exit = worker.join() => RunOutcome::WorkerExited(exit),
            _ = shutdown_rx.recv() => RunOutcome::ShutdownRequested,
        };

        // Stops the announcer; harmless if shutdown was already sent
        let _ = shutdown.send(());
        if let Some(responder) = responder {
            responder.stop();
        }
        supervisor.shutdown().await;
        if let Some(announcer) = announcer {
            let _ = announcer.await;
        }

        tracing::info!(role = %role, outcome = ?outcome, "Node stopped");
        Ok(outcome)
    }
}
