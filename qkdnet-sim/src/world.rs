//! Networks and the world scheduler.
//!
//! Time advances in ticks. [`World::step`] runs one tick over every network
//! in registration order and is what deterministic tests drive. The paced
//! schedulers run the same `forward` sweeps on tokio tasks:
//!
//! - [`World::start`]: one driver per network, each on its own interval.
//!   Drivers may drift relative to each other.
//! - [`World::start_sequential`]: one coordinator sweeping all networks in
//!   order, then waiting one period.
//!
//! Both stop through a shared cancellation token. A driver checks the token
//! before every tick, so no sweep begins more than one period after
//! [`World::stop`]. A network counts as running while any driver, old or
//! new, still ticks it, so restarting before the old drivers exit is safe.
//! [`World::step`] refuses to tick while paced drivers are active.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use qkdnet_core::{NetworkError, NetworkId, NetworkResult, NodeId, PacketId};

use crate::node;
use crate::topology::{NetworkInfo, Topology};

/// Monotonic tick counter shared by the whole world.
#[derive(Debug, Default)]
pub struct SimClock {
    ticks: AtomicU64,
}

impl SimClock {
    /// Current tick.
    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Advance by one tick and return the new value.
    pub fn advance(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Move forward to `tick` if it is ahead of the clock.
    pub fn observe(&self, tick: u64) {
        self.ticks.fetch_max(tick, Ordering::AcqRel);
    }
}

/// Handle to one network of a world.
#[derive(Clone)]
pub struct Network {
    topology: Arc<Topology>,
    id: NetworkId,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.id)
            .field("name", &self.info().name)
            .finish()
    }
}

impl Network {
    fn info(&self) -> &NetworkInfo {
        &self.topology.networks[self.id.index()]
    }

    /// Network handle.
    pub fn id(&self) -> NetworkId {
        self.id
    }

    /// Network name.
    pub fn name(&self) -> &str {
        &self.info().name
    }

    /// Nodes in tick order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.info().nodes
    }

    /// Whether a paced driver is currently ticking this network.
    pub fn is_running(&self) -> bool {
        self.info().drivers.load(Ordering::Acquire) > 0
    }

    /// Ticks this network has completed.
    pub fn ticks(&self) -> u64 {
        self.info().ticks.load(Ordering::Acquire)
    }

    /// Run one tick: every node drains its buffers and acts, in
    /// registration order. Returns the network's tick count.
    pub fn forward(&self) -> u64 {
        for &id in self.nodes() {
            node::forward(&self.topology, id);
        }
        self.info().ticks.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn driver_started(&self) {
        self.info().drivers.fetch_add(1, Ordering::AcqRel);
    }

    fn driver_stopped(&self) {
        self.info().drivers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct Scheduler {
    token: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

/// Top-level container and scheduler.
pub struct World {
    topology: Arc<Topology>,
    scheduler: Mutex<Scheduler>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("topology", &self.topology)
            .field("running", &self.is_running())
            .finish()
    }
}

impl World {
    /// Freeze `topology` and wire the quantum collaborators.
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: topology.into_shared(),
            scheduler: Mutex::new(Scheduler::default()),
        }
    }

    /// The shared arena.
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// All networks in registration order.
    pub fn networks(&self) -> Vec<Network> {
        (0..self.topology.networks().len())
            .map(|index| Network {
                topology: self.topology.clone(),
                id: NetworkId::new(index as u32),
            })
            .collect()
    }

    /// Handle to one network.
    pub fn network(&self, id: NetworkId) -> Option<Network> {
        (id.index() < self.topology.networks().len()).then(|| Network {
            topology: self.topology.clone(),
            id,
        })
    }

    /// Current world tick.
    pub fn now(&self) -> u64 {
        self.topology.clock().now()
    }

    /// Run one tick over every network, in registration order.
    ///
    /// Returns the new world tick. While paced drivers are active the call
    /// is refused with a warning and the clock is returned unchanged.
    #[instrument(skip(self))]
    pub fn step(&self) -> u64 {
        if self.is_paced() {
            tracing::warn!(error = %NetworkError::AlreadyRunning, "step refused while paced drivers are active");
            return self.now();
        }
        for network in self.networks() {
            network.forward();
        }
        self.topology.clock().advance()
    }

    /// Run `ticks` steps.
    pub fn run_ticks(&self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Step until `done` holds or `max_ticks` steps have run.
    ///
    /// Returns whether `done` was satisfied.
    pub fn run_until(&self, max_ticks: u64, mut done: impl FnMut(&Topology) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(&self.topology) {
                return true;
            }
            self.step();
        }
        done(&self.topology)
    }

    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a paced run has been started and not stopped.
    fn is_paced(&self) -> bool {
        self.scheduler()
            .token
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn prepare(&self, fps: f64) -> NetworkResult<(Duration, CancellationToken, tokio::runtime::Handle)> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(NetworkError::InvalidTickRate { fps });
        }
        let period = Duration::try_from_secs_f64(1.0 / fps)
            .map_err(|_| NetworkError::InvalidTickRate { fps })?
            .max(Duration::from_nanos(1));
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| NetworkError::Config {
            message: format!("paced scheduling needs a tokio runtime: {err}"),
        })?;
        let mut scheduler = self.scheduler();
        if scheduler.token.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return Err(NetworkError::AlreadyRunning);
        }
        scheduler.tasks.retain(|task| !task.is_finished());
        let token = CancellationToken::new();
        scheduler.token = Some(token.clone());
        Ok((period, token, runtime))
    }

    /// Tick every network on its own driver, `fps` times per second.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, fps: f64) -> NetworkResult<()> {
        let (period, token, runtime) = self.prepare(fps)?;
        tracing::info!(fps, networks = self.topology.networks().len(), "starting independent drivers");

        let tasks: Vec<JoinHandle<()>> = self
            .networks()
            .into_iter()
            .map(|network| {
                let token = token.clone();
                let topology = self.topology.clone();
                network.driver_started();
                runtime.spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = interval.tick() => {
                                let ticks = network.forward();
                                topology.clock().observe(ticks);
                            }
                        }
                    }
                    network.driver_stopped();
                    tracing::debug!(network = %network.name(), "driver stopped");
                })
            })
            .collect();

        self.scheduler().tasks.extend(tasks);
        Ok(())
    }

    /// Tick all networks from one coordinator, in registration order,
    /// `fps` sweeps per second.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sequential(&self, fps: f64) -> NetworkResult<()> {
        let (period, token, runtime) = self.prepare(fps)?;
        tracing::info!(fps, "starting sequential coordinator");

        let networks = self.networks();
        for network in &networks {
            network.driver_started();
        }
        let topology = self.topology.clone();
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        for network in &networks {
                            network.forward();
                        }
                        topology.clock().advance();
                    }
                }
            }
            for network in &networks {
                network.driver_stopped();
            }
            tracing::debug!("coordinator stopped");
        });

        self.scheduler().tasks.push(task);
        Ok(())
    }

    /// Request a cooperative halt of every paced driver.
    ///
    /// Returns immediately. Await [`World::join`] to wait for the drivers.
    pub fn stop(&self) {
        if let Some(token) = &self.scheduler().token {
            tracing::info!("stopping scheduler");
            token.cancel();
        }
    }

    /// Wait for every paced driver to exit.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut self.scheduler().tasks);
        for task in tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "tick driver failed");
            }
        }
    }

    /// [`World::stop`] followed by [`World::join`].
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    /// Whether any network is being ticked by a paced driver.
    pub fn is_running(&self) -> bool {
        self.topology
            .networks()
            .iter()
            .any(|network| network.drivers.load(Ordering::Acquire) > 0)
    }

    /// Send application data from host `from` to `destination`.
    pub fn send(
        &self,
        from: NodeId,
        data: impl Into<Vec<u8>>,
        destination: NodeId,
    ) -> NetworkResult<PacketId> {
        self.topology.send(from, data, destination)
    }

    /// [`World::send`] with nodes looked up by name.
    pub fn send_by_name(
        &self,
        from: &str,
        to: &str,
        data: impl Into<Vec<u8>>,
    ) -> NetworkResult<PacketId> {
        let from = self.topology.node_by_name(from)?;
        let to = self.topology.node_by_name(to)?;
        self.send(from, data, to)
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if let Some(token) = &self.scheduler().token {
            token.cancel();
        }
    }
}
