//! Dispatch engine: the single event loop that hands new files to an action.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::Dispatch;

use super::action::{Action, Outcome};
use super::error::EngineError;
use super::source::{NativeSource, NotificationSource};
use super::tree::{EventKind, WatchTree};

/// Longest the loop blocks on the source before looking at the stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const WORKER_THREAD_NAME: &str = "fpe-monitor";

/// Immutable settings for one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Folder to watch.
    pub root: PathBuf,
    /// Passed through to actions; the engine never reads it.
    pub destination: Option<PathBuf>,
    /// Deepest watched level below the root. `None` is unbounded.
    pub max_depth: Option<usize>,
    /// Successful files before stopping. 0 is unbounded.
    pub kill_count: u64,
    /// Run the loop on the thread calling `monitor()`.
    pub run_on_caller_thread: bool,
    /// Opaque parameters for the bound action.
    pub params: BTreeMap<String, String>,
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            destination: None,
            max_depth: None,
            kill_count: 0,
            run_on_caller_thread: false,
            params: BTreeMap::new(),
        }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_kill_count(mut self, kill_count: u64) -> Self {
        self.kill_count = kill_count;
        self
    }

    pub fn on_caller_thread(mut self, enabled: bool) -> Self {
        self.run_on_caller_thread = enabled;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Convert the operator's signed depth (-1 = unbounded) to a limit.
    pub fn depth_limit(value: i64) -> Option<usize> {
        usize::try_from(value).ok()
    }

    pub fn depth_allows(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth <= max)
    }
}

/// Cooperative stop flag shared with the loop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop at its next iteration boundary.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stop was requested.
    Requested,
    /// The kill count was reached.
    KillCountReached,
    /// A fatal error ended the run; see [`DispatchEngine::last_error`].
    FatalError,
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopped(StopReason),
}

/// Counters and outcome of a run, written only by the loop.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub processed: u64,
    pub overflows: u64,
    pub last_error: Option<EngineError>,
    pub stop_reason: Option<StopReason>,
}

impl RunState {
    fn failed(error: EngineError) -> Self {
        Self {
            last_error: Some(error),
            stop_reason: Some(StopReason::FatalError),
            ..Self::default()
        }
    }
}

/// What the loop owns while it runs.
struct Worker<S: NotificationSource> {
    tree: WatchTree<S>,
    action: Box<dyn Action>,
}

impl<S: NotificationSource> Worker<S> {
    fn run(mut self, config: &EngineConfig, stop: &StopHandle) -> RunState {
        let mut state = RunState::default();

        crate::log_event!(
            "engine",
            "running",
            "{} on {}",
            self.action.name(),
            self.tree.root().display()
        );

        let reason = self.event_loop(config, stop, &mut state);
        state.stop_reason = Some(reason);
        self.tree.shutdown();

        crate::log_event!(
            "engine",
            "stopped",
            "{reason:?} after {} files",
            state.processed
        );
        state
    }

    fn event_loop(
        &mut self,
        config: &EngineConfig,
        stop: &StopHandle,
        state: &mut RunState,
    ) -> StopReason {
        loop {
            if stop.is_requested() {
                return StopReason::Requested;
            }

            let event = match self.tree.next_event(POLL_INTERVAL) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("[engine] notification failure: {e}");
                    state.last_error = Some(e.into());
                    return StopReason::FatalError;
                }
            };

            match event.kind {
                EventKind::FileCreated => {}
                EventKind::Overflow => {
                    state.overflows += 1;
                    tracing::warn!(
                        "[engine] events were dropped ({} overflows so far); some files may never be processed",
                        state.overflows
                    );
                    continue;
                }
                kind => {
                    crate::debug_event!("engine", "event", "{kind:?} {}", event.path.display());
                    continue;
                }
            }

            if !config.depth_allows(event.parent_depth) {
                crate::debug_event!("engine", "beyond max depth", "{}", event.path.display());
                continue;
            }

            crate::log_event!(self.action.name(), "processing", "{}", event.path.display());

            match self.action.process(&event.path) {
                Outcome::Success => {
                    state.processed += 1;
                    if config.kill_count > 0 && state.processed >= config.kill_count {
                        crate::log_event!("engine", "kill count reached", "{}", config.kill_count);
                        return StopReason::KillCountReached;
                    }
                }
                Outcome::RecoverableFailure(detail) => {
                    tracing::warn!(
                        "[{}] failed for {}: {detail}",
                        self.action.name(),
                        event.path.display()
                    );
                }
                Outcome::FatalFailure(reason) => {
                    let action = self.action.name().to_string();
                    tracing::error!("[{action}] fatal for {}: {reason}", event.path.display());
                    state.last_error = Some(EngineError::ActionFailed {
                        action,
                        path: event.path,
                        reason,
                    });
                    return StopReason::FatalError;
                }
            }
        }
    }
}

/// Watch-and-dispatch engine.
///
/// Construction takes the startup baseline (every directory within depth
/// is watched, existing files are left alone). [`monitor`](Self::monitor)
/// then runs exactly one event loop, on the caller's thread or on a
/// dedicated worker that it joins, and reports how the run ended.
pub struct DispatchEngine<S: NotificationSource + 'static = NativeSource> {
    config: EngineConfig,
    root: PathBuf,
    action_name: String,
    worker: Option<Worker<S>>,
    state: EngineState,
    run: RunState,
    stop: StopHandle,
    dispatch: Dispatch,
}

impl DispatchEngine<NativeSource> {
    /// Create an engine over the platform's native notifications.
    pub fn initialize(config: EngineConfig, action: Box<dyn Action>) -> Result<Self, EngineError> {
        let source = NativeSource::new()?;
        Self::with_source(config, action, source)
    }
}

impl<S: NotificationSource + 'static> DispatchEngine<S> {
    /// Create an engine over any notification source.
    pub fn with_source(
        config: EngineConfig,
        action: Box<dyn Action>,
        source: S,
    ) -> Result<Self, EngineError> {
        let tree = WatchTree::initialize(source, &config.root, config.max_depth)?;
        let root = tree.root().to_path_buf();
        let action_name = action.name().to_string();

        crate::log_event!(
            "engine",
            "initialized",
            "{action_name}: {} directories under {}",
            tree.len(),
            root.display()
        );

        Ok(Self {
            config,
            root,
            action_name,
            worker: Some(Worker { tree, action }),
            state: EngineState::Idle,
            run: RunState::default(),
            stop: StopHandle::new(),
            dispatch: tracing::dispatcher::get_default(|current| current.clone()),
        })
    }

    /// Route the loop's logging to `dispatch` instead of the default
    /// subscriber captured at construction.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Run the event loop until it stops.
    ///
    /// Returns the stop reason, or the fatal error that ended the run. The
    /// error also stays available from [`last_error`](Self::last_error).
    pub fn monitor(&mut self) -> Result<StopReason, EngineError> {
        if self.state != EngineState::Idle {
            return Err(EngineError::NotIdle);
        }
        let worker = self.worker.take().ok_or(EngineError::NotIdle)?;
        self.state = EngineState::Running;

        let run = if self.config.run_on_caller_thread {
            tracing::dispatcher::with_default(&self.dispatch, || {
                worker.run(&self.config, &self.stop)
            })
        } else {
            self.run_on_worker_thread(worker)
        };

        let reason = run.stop_reason.unwrap_or(StopReason::FatalError);
        self.state = EngineState::Stopped(reason);
        self.run = run;

        match (&self.run.last_error, reason) {
            (Some(error), StopReason::FatalError) => Err(error.clone()),
            _ => Ok(reason),
        }
    }

    fn run_on_worker_thread(&self, worker: Worker<S>) -> RunState {
        let config = self.config.clone();
        let stop = self.stop.clone();
        let dispatch = self.dispatch.clone();

        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || worker.run(&config, &stop))
            });

        match spawned {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|_| RunState::failed(EngineError::WorkerPanicked)),
            Err(e) => RunState::failed(EngineError::WorkerSpawn {
                reason: e.to_string(),
            }),
        }
    }

    /// Ask a running loop to stop after the current file.
    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Stop flag that other threads can hold.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn processed_count(&self) -> u64 {
        self.run.processed
    }

    pub fn overflow_count(&self) -> u64 {
        self.run.overflows
    }

    pub fn last_error(&self) -> Option<&EngineError> {
        self.run.last_error.as_ref()
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Canonical watch root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }
}
