//! Self-disposing model handle
//!
//! A [`SelfDisposingModel`] owns one lazily loaded model instance. Callers
//! obtain a [`ModelLease`] through [`SelfDisposingModel::acquire`]; the first
//! acquire runs the load function on the blocking pool while later callers
//! wait for the same load. Dropping the last lease applies the [`Ttl`]
//! policy: keep the model, unload it on the spot, or schedule an idle timer
//! that is cancelled by any new acquire.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LifecycleError;
use crate::ttl::Ttl;

/// Produces a model instance. May fail; runs on the blocking pool.
pub type LoadFn<T> = Arc<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

/// Invoked with the model id after the handle unloads its instance, or after
/// a load fails and leaves it unloaded.
pub type UnloadedCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Observable lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Loaded,
}

type LoadSignal = Option<Result<(), LifecycleError>>;

enum Slot<T> {
    Unloaded,
    Loading {
        /// Callers waiting on this load; each becomes a lease on success
        pending: usize,
        done: watch::Receiver<LoadSignal>,
    },
    Loaded {
        instance: Arc<T>,
        in_use: usize,
    },
}

struct IdleTimer {
    epoch: u64,
    token: CancellationToken,
}

struct Shared<T> {
    slot: Slot<T>,
    /// Bumped on every load attempt
    generation: u64,
    timer_epoch: u64,
    idle_timer: Option<IdleTimer>,
    /// Set once the owning manager dropped this handle from its map
    retired: bool,
    runtime: Option<RuntimeHandle>,
}

impl<T> Shared<T> {
    fn cancel_idle_timer(&mut self, model_id: &str) {
        if let Some(timer) = self.idle_timer.take() {
            debug!("Model {} was scheduled to expire, cancelling", model_id);
            timer.token.cancel();
        }
    }

    /// Move a loaded instance out of the slot, leaving it unloaded
    fn take_instance(&mut self, model_id: &str) -> Option<Arc<T>> {
        self.cancel_idle_timer(model_id);
        match std::mem::replace(&mut self.slot, Slot::Unloaded) {
            Slot::Loaded { instance, .. } => Some(instance),
            other => {
                self.slot = other;
                None
            }
        }
    }
}

struct Inner<T> {
    model_id: String,
    ttl: Ttl,
    load_fn: LoadFn<T>,
    on_unloaded: Option<UnloadedCallback>,
    shared: Mutex<Shared<T>>,
}

/// Lazily loaded, reference counted model instance with idle eviction
pub struct SelfDisposingModel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SelfDisposingModel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SelfDisposingModel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfDisposingModel")
            .field("model_id", &self.inner.model_id)
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> SelfDisposingModel<T> {
    /// Create an unloaded handle
    pub fn new(
        model_id: impl Into<String>,
        load_fn: LoadFn<T>,
        ttl: Ttl,
        on_unloaded: Option<UnloadedCallback>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                model_id: model_id.into(),
                ttl,
                load_fn,
                on_unloaded,
                shared: Mutex::new(Shared {
                    slot: Slot::Unloaded,
                    generation: 0,
                    timer_epoch: 0,
                    idle_timer: None,
                    retired: false,
                    runtime: None,
                }),
            }),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.inner.model_id
    }

    pub fn ttl(&self) -> Ttl {
        self.inner.ttl
    }

    pub fn state(&self) -> ModelState {
        match self.inner.shared.lock().slot {
            Slot::Unloaded => ModelState::Unloaded,
            Slot::Loading { .. } => ModelState::Loading,
            Slot::Loaded { .. } => ModelState::Loaded,
        }
    }

    /// Number of outstanding leases
    pub fn use_count(&self) -> usize {
        match self.inner.shared.lock().slot {
            Slot::Loaded { in_use, .. } => in_use,
            _ => 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == ModelState::Loaded
    }

    /// Lease the model, loading it first if needed.
    ///
    /// Concurrent callers during a load share its outcome: all receive a
    /// lease, or all receive the same [`LifecycleError::LoadFailed`]. A failed
    /// load leaves the handle unloaded and notifies the unloaded callback; a
    /// handle without an owner retries on the next call.
    pub async fn acquire(&self) -> Result<ModelLease<T>, LifecycleError> {
        let inner = &self.inner;
        let (mut done, generation) = {
            let mut shared = inner.shared.lock();
            if shared.runtime.is_none() {
                shared.runtime = RuntimeHandle::try_current().ok();
            }
            match &mut shared.slot {
                Slot::Loaded { instance, in_use } => {
                    *in_use += 1;
                    let instance = Arc::clone(instance);
                    let count = *in_use;
                    shared.cancel_idle_timer(&inner.model_id);
                    debug!("Incremented ref count for {}, ref_count={}", inner.model_id, count);
                    return Ok(ModelLease::new(Arc::clone(inner), instance));
                }
                Slot::Loading { pending, done } => {
                    *pending += 1;
                    (done.clone(), shared.generation)
                }
                Slot::Unloaded => {
                    if shared.retired {
                        return Err(LifecycleError::Retired(inner.model_id.clone()));
                    }
                    let done = Inner::start_load(inner, &mut shared);
                    (done, shared.generation)
                }
            }
        };

        let mut reservation = Reservation {
            inner: Arc::clone(inner),
            generation,
            settled: false,
        };

        let signal = match done.wait_for(Option::is_some).await {
            Ok(signal) => signal.clone(),
            Err(_) => Some(Err(LifecycleError::LoadFailed {
                model_id: inner.model_id.clone(),
                reason: "load task terminated".to_string(),
            })),
        };
        // Either outcome settles the reservation: on success it was converted
        // into a use by the loader, on failure it no longer exists.
        reservation.settled = true;

        match signal {
            Some(Ok(())) => {
                let shared = inner.shared.lock();
                match &shared.slot {
                    Slot::Loaded { instance, .. } => {
                        Ok(ModelLease::new(Arc::clone(inner), Arc::clone(instance)))
                    }
                    _ => Err(LifecycleError::LoadFailed {
                        model_id: inner.model_id.clone(),
                        reason: "model unloaded before lease was taken".to_string(),
                    }),
                }
            }
            Some(Err(e)) => Err(e),
            None => Err(LifecycleError::LoadFailed {
                model_id: inner.model_id.clone(),
                reason: "load finished without an outcome".to_string(),
            }),
        }
    }

    /// Unload the instance now.
    ///
    /// Fails with [`LifecycleError::Busy`] while leases are outstanding or a
    /// load is in flight. Unloading an unloaded handle is a no-op.
    pub fn explicit_unload(&self) -> Result<(), LifecycleError> {
        let inner = &self.inner;
        let instance = {
            let mut shared = inner.shared.lock();
            let busy = match &shared.slot {
                Slot::Unloaded => return Ok(()),
                Slot::Loading { .. } => true,
                Slot::Loaded { in_use, .. } => {
                    if *in_use > 0 {
                        debug!("Model {} is still in use, ref_count={}", inner.model_id, in_use);
                    }
                    *in_use > 0
                }
            };
            if busy {
                return Err(LifecycleError::Busy(inner.model_id.clone()));
            }
            shared.take_instance(&inner.model_id)
        };
        inner.dispose(instance);
        Ok(())
    }

    /// Mark the handle retired if it holds no instance. Returns whether it did.
    pub(crate) fn retire_if_unloaded(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        if matches!(shared.slot, Slot::Unloaded) {
            shared.retired = true;
            true
        } else {
            false
        }
    }
}

impl<T: Send + Sync + 'static> Inner<T> {
    fn start_load(this: &Arc<Self>, shared: &mut Shared<T>) -> watch::Receiver<LoadSignal> {
        let (tx, rx) = watch::channel(None);
        shared.generation += 1;
        shared.slot = Slot::Loading {
            pending: 1,
            done: rx.clone(),
        };

        let mut guard = LoadGuard {
            inner: Arc::clone(this),
            tx: Some(tx),
            started: Instant::now(),
        };
        debug!("Loading model {}", this.model_id);

        // Detached so a caller giving up does not strand the handle in Loading
        tokio::spawn(async move {
            let load_fn = Arc::clone(&guard.inner.load_fn);
            let outcome = match tokio::task::spawn_blocking(move || load_fn()).await {
                Ok(Ok(model)) => Ok(model),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(e) => Err(format!("load task failed: {e}")),
            };
            guard.complete(outcome);
        });

        rx
    }

    fn finish_load(
        this: &Arc<Self>,
        outcome: Result<T, String>,
        started: Instant,
        tx: watch::Sender<LoadSignal>,
    ) {
        let mut shared = this.shared.lock();
        let pending = match shared.slot {
            Slot::Loading { pending, .. } => pending,
            _ => 0,
        };

        match outcome {
            Ok(model) => {
                info!(
                    "Model {} loaded in {:.2}s",
                    this.model_id,
                    started.elapsed().as_secs_f64()
                );
                shared.slot = Slot::Loaded {
                    instance: Arc::new(model),
                    in_use: pending,
                };
                let _ = tx.send(Some(Ok(())));
                if pending == 0 {
                    Inner::on_idle(this, shared);
                }
            }
            Err(reason) => {
                warn!("Failed to load model {}: {}", this.model_id, reason);
                shared.slot = Slot::Unloaded;
                drop(shared);
                // Owner is notified before waiters see the error
                if let Some(callback) = &this.on_unloaded {
                    callback(&this.model_id);
                }
                let _ = tx.send(Some(Err(LifecycleError::LoadFailed {
                    model_id: this.model_id.clone(),
                    reason,
                })));
            }
        }
    }

    /// Give back one use; applies the TTL policy when the count reaches zero
    fn release_one(this: &Arc<Self>) {
        let mut shared = this.shared.lock();
        let remaining = match &mut shared.slot {
            Slot::Loaded { in_use, .. } => {
                *in_use = in_use.saturating_sub(1);
                *in_use
            }
            _ => {
                warn!("Release on model {} that is not loaded", this.model_id);
                return;
            }
        };
        debug!("Decremented ref count for {}, ref_count={}", this.model_id, remaining);
        if remaining == 0 {
            Inner::on_idle(this, shared);
        }
    }

    fn on_idle(this: &Arc<Self>, mut shared: MutexGuard<'_, Shared<T>>) {
        match this.ttl {
            Ttl::Never => {
                info!("Model {} is idle, not unloading", this.model_id);
            }
            Ttl::Immediate => {
                info!("Model {} is idle, unloading immediately", this.model_id);
                let instance = shared.take_instance(&this.model_id);
                drop(shared);
                this.dispose(instance);
            }
            Ttl::After(delay) => {
                let Some(runtime) = shared.runtime.clone() else {
                    warn!(
                        "Model {} is idle but no runtime is available to schedule its eviction",
                        this.model_id
                    );
                    return;
                };
                shared.cancel_idle_timer(&this.model_id);
                shared.timer_epoch += 1;
                let epoch = shared.timer_epoch;
                let token = CancellationToken::new();
                shared.idle_timer = Some(IdleTimer {
                    epoch,
                    token: token.clone(),
                });
                drop(shared);

                info!(
                    "Model {} is idle, scheduling offload in {}s",
                    this.model_id,
                    delay.as_secs()
                );
                let weak = Arc::downgrade(this);
                runtime.spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            if let Some(inner) = weak.upgrade() {
                                Inner::expire(&inner, epoch, delay);
                            }
                        }
                    }
                });
            }
        }
    }

    /// Idle timer fired; evict only if nothing re-acquired the model meanwhile
    fn expire(this: &Arc<Self>, epoch: u64, delay: Duration) {
        let instance = {
            let mut shared = this.shared.lock();
            let current = shared.idle_timer.as_ref().is_some_and(|t| t.epoch == epoch);
            let idle = matches!(shared.slot, Slot::Loaded { in_use: 0, .. });
            if !current || !idle {
                debug!("Expiry of model {} superseded, keeping it loaded", this.model_id);
                return;
            }
            shared.take_instance(&this.model_id)
        };
        debug!("Model {} idle for {}s, unloading", this.model_id, delay.as_secs());
        this.dispose(instance);
    }

    /// Drop the instance outside the handle lock and notify the owner
    fn dispose(&self, instance: Option<Arc<T>>) {
        if instance.is_none() {
            return;
        }
        drop(instance);
        info!("Model {} unloaded", self.model_id);
        if let Some(callback) = &self.on_unloaded {
            callback(&self.model_id);
        }
    }
}

/// Completes a load exactly once, even if the load task is torn down
struct LoadGuard<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
    tx: Option<watch::Sender<LoadSignal>>,
    started: Instant,
}

impl<T: Send + Sync + 'static> LoadGuard<T> {
    fn complete(&mut self, outcome: Result<T, String>) {
        if let Some(tx) = self.tx.take() {
            Inner::finish_load(&self.inner, outcome, self.started, tx);
        }
    }
}

impl<T: Send + Sync + 'static> Drop for LoadGuard<T> {
    fn drop(&mut self) {
        self.complete(Err("load task cancelled".to_string()));
    }
}

/// A waiter's claim on the outcome of an in-flight load.
///
/// If the waiting future is dropped before the outcome is observed, the
/// claim is given back: removed from the pending count while loading, or
/// released as a use once the loader has converted it.
struct Reservation<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
    generation: u64,
    settled: bool,
}

impl<T: Send + Sync + 'static> Drop for Reservation<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut shared = self.inner.shared.lock();
        if shared.generation != self.generation {
            return;
        }
        let release = match &mut shared.slot {
            Slot::Loading { pending, .. } => {
                *pending = pending.saturating_sub(1);
                false
            }
            Slot::Loaded { .. } => true,
            Slot::Unloaded => false,
        };
        drop(shared);
        if release {
            Inner::release_one(&self.inner);
        }
    }
}

/// Shared access to a loaded model; releases its use when dropped
pub struct ModelLease<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
    instance: Arc<T>,
}

impl<T: Send + Sync + 'static> ModelLease<T> {
    fn new(inner: Arc<Inner<T>>, instance: Arc<T>) -> Self {
        Self { inner, instance }
    }

    pub fn model_id(&self) -> &str {
        &self.inner.model_id
    }

    /// Release the lease explicitly; equivalent to dropping it
    pub fn release(self) {
        drop(self);
    }
}

impl<T: Send + Sync + 'static> Deref for ModelLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.instance
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for ModelLease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease")
            .field("model_id", &self.inner.model_id)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Drop for ModelLease<T> {
    fn drop(&mut self) {
        Inner::release_one(&self.inner);
    }
}
