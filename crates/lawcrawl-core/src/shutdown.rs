//! Graceful shutdown: cancellation tokens, worker tracking and the
//! RUNNING → SHUTDOWN_REQUESTED → TERMINATED state machine.
//!
//! The signal thread never touches scheduler state directly. It flips the
//! shared [`CancellationToken`], which every pool and retry loop polls, then
//! waits for tracked workers to drain before running terminators and
//! finalizers.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::{Duration, Instant};

/// Exit code used when the process ends because of an interrupt.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Granularity of cancellable sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag.
///
/// Cloning shares the flag. [`child`](CancellationToken::child) creates a
/// token that is cancelled when either it or any ancestor is cancelled,
/// without the reverse being true.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.ancestors.iter().any(|a| a.load(Ordering::SeqCst))
    }

    /// Token scoped to a sub-task (e.g. one collection batch).
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.flag.clone());
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the token was cancelled before the sleep finished.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Coordinator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShutdownRequested,
    Terminated,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::ShutdownRequested,
            _ => Self::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::ShutdownRequested => 1,
            Self::Terminated => 2,
        }
    }
}

/// Result of waiting for in-flight workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    TimedOut { remaining: usize },
}

type Terminator = Box<dyn Fn() + Send + Sync>;
type Finalizer = Box<dyn FnOnce() + Send>;

struct Inner {
    state: AtomicU8,
    token: CancellationToken,
    active: AtomicUsize,
    grace: Duration,
    poll: Duration,
    next_id: AtomicU64,
    terminators: Mutex<Vec<(u64, Terminator)>>,
    finalizers: Mutex<Vec<Finalizer>>,
    finalized: Once,
}

/// Process-wide shutdown coordinator. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .field("active", &self.active_workers())
            .field("grace", &self.inner.grace)
            .finish_non_exhaustive()
    }
}

impl ShutdownCoordinator {
    /// Coordinator with the given grace period and a 1s drain poll.
    pub fn new(grace: Duration) -> Self {
        Self::with_intervals(grace, Duration::from_secs(1))
    }

    pub fn with_intervals(grace: Duration, poll: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ShutdownState::Running.as_u8()),
                token: CancellationToken::new(),
                active: AtomicUsize::new(0),
                grace,
                poll,
                next_id: AtomicU64::new(0),
                terminators: Mutex::new(Vec::new()),
                finalizers: Mutex::new(Vec::new()),
                finalized: Once::new(),
            }),
        }
    }

    /// Root cancellation token shared by every pool.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.state() != ShutdownState::Running
    }

    /// Mark one in-flight worker task; the guard releases it on drop.
    pub fn enter_worker(&self) -> WorkerGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Register a hook that kills an external resource (browser process)
    /// when the grace period runs out.
    pub fn register_terminator(&self, hook: impl Fn() + Send + Sync + 'static) -> TerminatorGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .terminators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Box::new(hook)));
        TerminatorGuard {
            inner: self.inner.clone(),
            id,
        }
    }

    /// Register work to run once at the very end (ledger flush, summary,
    /// terminal restore). Finalizers run in registration order.
    pub fn on_finalize(&self, f: impl FnOnce() + Send + 'static) {
        self.inner
            .finalizers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(f));
    }

    /// Advance the state machine for one interrupt and return the new state.
    ///
    /// First call: RUNNING → SHUTDOWN_REQUESTED and cancels the token.
    /// Any later call: → TERMINATED (escalation).
    pub fn request(&self) -> ShutdownState {
        let running = ShutdownState::Running.as_u8();
        let requested = ShutdownState::ShutdownRequested.as_u8();
        match self.inner.state.compare_exchange(
            running,
            requested,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.inner.token.cancel();
                ShutdownState::ShutdownRequested
            }
            Err(_) => {
                self.inner
                    .state
                    .store(ShutdownState::Terminated.as_u8(), Ordering::SeqCst);
                ShutdownState::Terminated
            }
        }
    }

    /// Poll until every tracked worker finished or the grace period expired.
    pub fn drain(&self) -> DrainOutcome {
        let deadline = Instant::now() + self.inner.grace;
        loop {
            let remaining = self.active_workers();
            if remaining == 0 {
                return DrainOutcome::Drained;
            }
            if Instant::now() >= deadline {
                return DrainOutcome::TimedOut { remaining };
            }
            log::info!("Waiting for {remaining} workers to finish...");
            std::thread::sleep(self.inner.poll);
        }
    }

    /// Run every registered terminator and move to TERMINATED.
    ///
    /// Returns how many hooks ran.
    pub fn force_terminate(&self) -> usize {
        self.inner.token.cancel();
        self.inner
            .state
            .store(ShutdownState::Terminated.as_u8(), Ordering::SeqCst);
        let hooks = self
            .inner
            .terminators
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, hook) in hooks.iter() {
            hook();
        }
        hooks.len()
    }

    /// Run finalizers exactly once, no matter how many threads call this.
    pub fn finalize(&self) {
        self.inner.finalized.call_once(|| {
            let finalizers: Vec<Finalizer> = std::mem::take(
                &mut *self
                    .inner
                    .finalizers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            for f in finalizers {
                f();
            }
        });
    }

    /// Full graceful path used by the signal thread: drain, force the
    /// stragglers, finalize.
    pub fn shutdown_gracefully(&self) -> DrainOutcome {
        let outcome = self.drain();
        if let DrainOutcome::TimedOut { remaining } = outcome {
            log::warn!("Force terminating {remaining} workers after grace period");
            self.force_terminate();
        }
        self.finalize();
        outcome
    }

    /// Listen for SIGINT/SIGTERM on a background thread.
    ///
    /// First signal starts the graceful path on its own thread and exits the
    /// process when done; a second signal skips the grace period.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let coordinator = self.clone();
        std::thread::Builder::new()
            .name("shutdown".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match coordinator.request() {
                        ShutdownState::ShutdownRequested => {
                            log::warn!(
                                "Received signal {signal}, finishing in-flight work (up to {}s)...",
                                coordinator.inner.grace.as_secs()
                            );
                            let c = coordinator.clone();
                            let spawned = std::thread::Builder::new()
                                .name("shutdown-drain".into())
                                .spawn(move || {
                                    c.shutdown_gracefully();
                                    std::process::exit(i32::from(EXIT_INTERRUPTED));
                                });
                            if let Err(e) = spawned {
                                log::error!("Cannot spawn drain thread: {e}");
                                coordinator.force_terminate();
                                coordinator.finalize();
                                std::process::exit(i32::from(EXIT_INTERRUPTED));
                            }
                        }
                        _ => {
                            log::warn!("Force exit requested, terminating immediately...");
                            coordinator.force_terminate();
                            coordinator.finalize();
                            std::process::exit(i32::from(EXIT_INTERRUPTED));
                        }
                    }
                }
            })?;
        Ok(())
    }
}

/// Releases one active-worker slot on drop.
pub struct WorkerGuard {
    inner: Arc<Inner>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Unregisters a terminator on drop.
pub struct TerminatorGuard {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for TerminatorGuard {
    fn drop(&mut self) {
        self.inner
            .terminators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}
