//! Async driver for a [`BeaconManager`].
//!
//! One task per manager is the single actor for its façade: inbound radio
//! events, façade calls made through [`EngineHandle::call`] and the periodic
//! tick are all applied by that task, in arrival order. The radio stack
//! pushes [`EngineCommand`]s into a bounded channel; the task stops when that
//! channel closes or shutdown is requested.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{ProximaError, Result};
use crate::events::RadioEvent;
use crate::manager::BeaconManager;

/// Default capacity of the inbound command channel.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

type BoxedCall = Box<dyn FnOnce(&BeaconManager) + Send>;

/// Work item for the dispatch loop.
pub enum EngineCommand {
    /// An inbound radio event.
    Radio(RadioEvent),
    /// A façade call to run on the loop, after everything queued before it.
    Call(BoxedCall),
}

impl fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio(event) => f.debug_tuple("Radio").field(event).finish(),
            Self::Call(_) => f.write_str("Call(..)"),
        }
    }
}

impl From<RadioEvent> for EngineCommand {
    fn from(event: RadioEvent) -> Self {
        Self::Radio(event)
    }
}

/// Run the dispatch loop until `inbound` closes or `shutdown` resolves.
///
/// The first tick fires one interval after start; missed ticks are delayed
/// rather than replayed in a burst.
pub async fn run<F>(
    manager: Arc<BeaconManager>,
    mut inbound: mpsc::Receiver<EngineCommand>,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let period = manager
        .config()
        .ranging
        .tick_interval()
        .max(std::time::Duration::from_millis(1));
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(tick_ms = period.as_millis(), "beacon engine running");
    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                debug!("shutdown requested");
                break;
            }
            command = inbound.recv() => match command {
                Some(EngineCommand::Radio(event)) => manager.handle(event),
                Some(EngineCommand::Call(call)) => call(&manager),
                None => {
                    debug!("inbound channel closed");
                    break;
                }
            },
            _ = ticker.tick() => manager.tick(Utc::now()),
        }
    }
    info!("beacon engine stopped");
}

/// Handle to a spawned dispatch task.
#[derive(Debug)]
pub struct EngineHandle {
    inbound: mpsc::Sender<EngineCommand>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Spawn the dispatch loop for `manager` on the current tokio runtime.
    #[must_use]
    pub fn spawn(manager: Arc<BeaconManager>, capacity: usize) -> Self {
        let (inbound, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, stop) = oneshot::channel::<()>();
        let task = tokio::spawn(run(manager, rx, async move {
            // A dropped handle also stops the loop.
            let _ = stop.await;
        }));
        Self {
            inbound,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Sender the radio stack pushes commands into.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<EngineCommand> {
        self.inbound.clone()
    }

    /// Queue an inbound radio event.
    ///
    /// # Errors
    ///
    /// Returns [`ProximaError::EngineStopped`] if the loop has exited.
    pub async fn send(&self, event: RadioEvent) -> Result<()> {
        self.inbound
            .send(EngineCommand::Radio(event))
            .await
            .map_err(|_| ProximaError::EngineStopped)
    }

    /// Run `call` on the dispatch loop once every command queued before it
    /// has been applied, and return its result.
    ///
    /// # Errors
    ///
    /// Returns [`ProximaError::EngineStopped`] if the loop exits before
    /// running the call.
    pub async fn call<R, F>(&self, call: F) -> Result<R>
    where
        F: FnOnce(&BeaconManager) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let command = EngineCommand::Call(Box::new(move |manager: &BeaconManager| {
            let _ = reply.send(call(manager));
        }));
        self.inbound
            .send(command)
            .await
            .map_err(|_| ProximaError::EngineStopped)?;
        result.await.map_err(|_| ProximaError::EngineStopped)
    }

    /// Stop the loop and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns the join error if the task panicked.
    pub async fn shutdown(mut self) -> std::result::Result<(), tokio::task::JoinError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await
    }
}
