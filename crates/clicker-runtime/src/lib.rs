#![deny(warnings)]

//! Session runtime for Tap Tycoon.
//!
//! A [`Session`] is the single writer of the economy state. User intents and
//! ticker events are applied one at a time under one lock; after each change
//! the new state is pushed to observers and a snapshot is queued for an
//! ordered background writer.

pub mod config;
pub mod ticker;

pub use config::{ConfigError, RuntimeConfig};
pub use ticker::Ticker;

use chrono::{DateTime, Utc};
use clicker_core::EconomyState;
use clicker_econ::{BulkReceipt, Command, Engine, Outcome, PurchaseOutcome};
use persistence::{PersistedSnapshot, SnapshotStore};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    /// Sessions spawn their save writer and must start inside a Tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error("save writer failed: {0}")]
    Writer(String),
}

struct Inner {
    engine: Engine,
    saves: Option<mpsc::UnboundedSender<PersistedSnapshot>>,
}

/// Live game session over a snapshot store.
pub struct Session {
    inner: Mutex<Inner>,
    updates: watch::Sender<EconomyState>,
    writer: Mutex<Option<JoinHandle<()>>>,
    config: RuntimeConfig,
}

impl Session {
    /// Resume from `store` (or start fresh) and spawn the save writer.
    pub fn start(
        store: Arc<dyn SnapshotStore>,
        config: RuntimeConfig,
    ) -> Result<Arc<Self>, SessionError> {
        Self::start_at(store, config, Utc::now())
    }

    /// Like [`Session::start`], with an explicit wall-clock time for offline catch-up.
    pub fn start_at(
        store: Arc<dyn SnapshotStore>,
        config: RuntimeConfig,
        now: DateTime<Utc>,
    ) -> Result<Arc<Self>, SessionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let snapshot = store.load();
        let state = match &snapshot {
            Some(s) => s.restore(),
            None => EconomyState::new(),
        };
        let mut engine = Engine::from_state(state).with_policy(config.accrual_policy());

        let mut caught_up = 0;
        if config.offline_catch_up {
            if let Some(saved_at) = snapshot.as_ref().and_then(|s| s.saved_at) {
                let away = (now - saved_at).to_std().unwrap_or(Duration::ZERO);
                let credited_for = away.min(config.max_offline());
                caught_up = engine.tick_duration(credited_for);
                info!(
                    away_secs = away.as_secs(),
                    credited_secs = credited_for.as_secs(),
                    credited = caught_up,
                    "offline catch-up"
                );
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = runtime.spawn(run_writer(store, rx));
        let (updates, _) = watch::channel(engine.state().clone());
        info!(
            resumed = snapshot.is_some(),
            balance = engine.state().balance(),
            rate = %engine.state().aggregate_production_rate(),
            "session started"
        );
        let session = Arc::new(Self {
            inner: Mutex::new(Inner {
                engine,
                saves: Some(tx),
            }),
            updates,
            writer: Mutex::new(Some(writer)),
            config,
        });
        if caught_up > 0 {
            session.publish(&mut session.lock());
        }
        Ok(session)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Copy of the current state.
    pub fn state(&self) -> EconomyState {
        self.lock().engine.state().clone()
    }

    /// Receiver that observes the state after every change.
    pub fn subscribe(&self) -> watch::Receiver<EconomyState> {
        self.updates.subscribe()
    }

    pub fn tap(&self) -> u64 {
        self.mutate(|e| (e.tap(), true))
    }

    pub fn purchase(&self, id: &str) -> PurchaseOutcome {
        self.mutate(|e| {
            let outcome = e.purchase(id);
            let changed = outcome.is_ok();
            (outcome, changed)
        })
    }

    pub fn purchase_many(&self, id: &str, n: u32) -> BulkReceipt {
        self.mutate(|e| {
            let receipt = e.purchase_many(id, n);
            let changed = receipt.bought > 0;
            (receipt, changed)
        })
    }

    /// Accrue passive income for `elapsed`. Returns the amount credited.
    pub fn tick(&self, elapsed: Duration) -> u64 {
        self.mutate(|e| {
            let credited = e.tick_duration(elapsed);
            (credited, credited > 0)
        })
    }

    pub fn grant_bonus(&self, amount: u64) -> u64 {
        self.mutate(|e| {
            let credited = e.grant_bonus(amount);
            (credited, credited > 0)
        })
    }

    /// Grant the configured reward for a completed promotional interaction.
    pub fn grant_reward(&self) -> u64 {
        self.grant_bonus(self.config.bonus_amount)
    }

    pub fn apply(&self, command: Command) -> Outcome {
        self.mutate(|e| {
            let outcome = e.apply(command);
            let changed = outcome.changed();
            (outcome, changed)
        })
    }

    /// Queue a final snapshot, close the save queue and wait for the writer.
    ///
    /// The session keeps working in memory afterwards but no longer saves.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            let snapshot = PersistedSnapshot::capture(inner.engine.state(), Utc::now());
            if let Some(tx) = inner.saves.take() {
                let _ = tx.send(snapshot);
            }
        }
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = writer {
            handle
                .await
                .map_err(|e| SessionError::Writer(e.to_string()))?;
        }
        info!(balance = self.state().balance(), "session stopped");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is a single always-valid record, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut Engine) -> (T, bool)) -> T {
        let mut inner = self.lock();
        let (out, changed) = op(&mut inner.engine);
        if changed {
            self.publish(&mut inner);
        }
        out
    }

    /// Notify observers and queue a save. Called with the lock held so both
    /// happen in operation order.
    fn publish(&self, inner: &mut Inner) {
        let state = inner.engine.state().clone();
        match &inner.saves {
            Some(tx) => {
                if tx.send(PersistedSnapshot::capture(&state, Utc::now())).is_err() {
                    warn!("save writer gone, continuing in memory");
                    inner.saves = None;
                }
            }
            None => trace!("saves closed, change kept in memory"),
        }
        self.updates.send_replace(state);
    }
}

/// Save snapshots in arrival order. A backlog collapses to its newest entry.
async fn run_writer(
    store: Arc<dyn SnapshotStore>,
    mut rx: mpsc::UnboundedReceiver<PersistedSnapshot>,
) {
    while let Some(mut snapshot) = rx.recv().await {
        let mut skipped = 0usize;
        while let Ok(newer) = rx.try_recv() {
            snapshot = newer;
            skipped += 1;
        }
        let store = Arc::clone(&store);
        let balance = snapshot.balance;
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => trace!(balance, skipped, "snapshot saved"),
            Ok(Err(e)) => warn!(error = %e, "save failed, state kept in memory"),
            Err(e) => warn!(error = %e, "save task aborted"),
        }
    }
    debug!("save writer stopped");
}
