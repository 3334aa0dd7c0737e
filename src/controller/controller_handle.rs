//! Control worker - joystick samples in, motor frames out
//!
//! The worker is a single tokio task owning the [`CommandShaper`]. Callers
//! hand samples over through a lock-free latest-value slot and a [`Notify`];
//! only the newest sample is ever processed.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Active ──► Stopping ──► Stopped
//!   (create)     (activate)  (cancelled)  (stats logged)
//! ```
//!
//! Every exit path converges on the zero command: `start` sends it before the
//! first sample, `stop` sends it before cancelling the task, and a worker
//! that finishes a send after `stop` re-sends it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::ControlCommand;
use super::filter::{FilterKind, DEFAULT_ALPHA, MAX_ALPHA};
use super::haptics::{HapticPulse, HapticSink};
use super::monitor::PipelineLatency;
use super::pipeline::{
    should_send, CommandShaper, CommandSlot, DirectionDelay, LatestSample,
    DEFAULT_DIRECTION_CHANGE_DELAY_MS,
};
use crate::connection::Transport;
use crate::protocol::CommandEncoder;

/// Smallest lag coefficient the settings surface accepts
pub const SETTINGS_MIN_ALPHA: f32 = 0.1;
pub const DEFAULT_STALL_RESEND_MS: u64 = 500;

const NO_INPUT: u64 = u64::MAX;

/// User-adjustable control parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub filter: FilterKind,
    pub filter_alpha: f32,
    /// Motor-off window on direction reversal, clamped to 50..=200 ms
    pub direction_change_delay_ms: u64,
    pub haptics_enabled: bool,
    /// Input gap after which the current command is re-sent
    pub stall_resend_ms: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            filter: FilterKind::Lag,
            filter_alpha: DEFAULT_ALPHA,
            direction_change_delay_ms: DEFAULT_DIRECTION_CHANGE_DELAY_MS,
            haptics_enabled: true,
            stall_resend_ms: DEFAULT_STALL_RESEND_MS,
        }
    }
}

impl ControlSettings {
    pub fn clamp_alpha(alpha: f32) -> f32 {
        if alpha.is_finite() {
            alpha.clamp(SETTINGS_MIN_ALPHA, MAX_ALPHA)
        } else {
            DEFAULT_ALPHA
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Filter cannot be changed while the control pipeline is running")]
    FilterLocked,

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

/// State shared between the handle and the worker task; atomics only
struct ControlShared {
    running: AtomicBool,
    force_send: AtomicBool,
    sample: LatestSample,
    wake: Notify,
    last_sent: CommandSlot,
    delay: DirectionDelay,
    stall_resend_ms: AtomicU64,
    epoch: Instant,
    last_input_ms: AtomicU64,
}

impl ControlShared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn millis_since_epoch(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX - 1)
    }
}

/// Encodes and sends commands, recording them as last sent
#[derive(Clone)]
struct Dispatcher {
    shared: Arc<ControlShared>,
    transport: Arc<dyn Transport>,
    encoder: Arc<CommandEncoder>,
}

impl Dispatcher {
    fn last_sent(&self) -> ControlCommand {
        self.shared.last_sent.load()
    }

    fn send(&self, command: &ControlCommand) -> bool {
        self.shared.last_sent.store(command);
        let frame = self.encoder.encode(command);
        if self.transport.send(&frame) {
            debug!("Sent {}", command);
            true
        } else {
            warn!("Failed to send {}, forcing resend", command);
            self.shared.force_send.store(true, Ordering::Release);
            false
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum ControlWorkerState {
    Initializing,
    Active,
    Stopping,
    Stopped,
}

#[machine]
struct ControlWorker<S: ControlWorkerState> {
    dispatcher: Dispatcher,
    shaper: CommandShaper,
    haptics: HapticSink,
    latency: Arc<Mutex<PipelineLatency>>,
    last_cycle: Option<Instant>,
}

impl ControlWorker<Initializing> {
    fn create(
        dispatcher: Dispatcher,
        settings: &ControlSettings,
        haptics: HapticSink,
        latency: Arc<Mutex<PipelineLatency>>,
    ) -> Self {
        info!(
            "Creating control worker: filter={} alpha={} delay={}ms",
            settings.filter,
            settings.filter_alpha,
            dispatcher.shared.delay.millis()
        );
        let filter = settings.filter.build(settings.filter_alpha);
        let shaper = CommandShaper::new(filter, dispatcher.shared.delay.clone());
        Self::new(dispatcher, shaper, haptics, latency, None)
    }

    /// Sends the zero command and arms the forced resend
    fn activate(self) -> ControlWorker<Active> {
        self.dispatcher.send(&ControlCommand::zero());
        self.dispatcher
            .shared
            .force_send
            .store(true, Ordering::Release);
        info!("Control worker active");
        self.transition()
    }
}

impl ControlWorker<Active> {
    fn process_latest(&mut self) {
        let shared = Arc::clone(&self.dispatcher.shared);
        let Some((x, y)) = shared.sample.take() else {
            return;
        };
        if !shared.is_running() {
            return;
        }

        let cycle_start = Instant::now();
        let input_interval = self
            .last_cycle
            .replace(cycle_start)
            .map(|prev| cycle_start - prev);

        let (fx, fy) = self.shaper.condition(x, y, &self.haptics);
        let filtered_at = Instant::now();

        let last = self.dispatcher.last_sent();
        let command = self
            .shaper
            .command_for(fx, fy, filtered_at, &last, &self.haptics);
        let generated_at = Instant::now();
        debug!("Sample ({:.3}, {:.3}) -> {}", x, y, command);

        let forced = shared.force_send.swap(false, Ordering::AcqRel);
        let mut send_time = None;
        if should_send(&command, &last, forced) {
            if last.is_zero() != command.is_zero() {
                self.haptics.pulse(HapticPulse::StartStop);
            }
            self.dispatcher.send(&command);
            send_time = Some(generated_at.elapsed());

            if !shared.is_running() {
                debug!("Stopped during send, restoring zero command");
                self.dispatcher.send(&ControlCommand::zero());
            }
        }

        let mut latency = self.latency.lock();
        if let Some(interval) = input_interval {
            latency.input_interval.record(interval);
        }
        latency.filtering.record(filtered_at - cycle_start);
        latency.command_generation.record(generated_at - filtered_at);
        if let Some(send) = send_time {
            latency.send.record(send);
            latency.full_path.record(cycle_start.elapsed());
        }
    }

    async fn run_until_cancelled(mut self, cancel: CancellationToken) -> ControlWorker<Stopping> {
        let shared = Arc::clone(&self.dispatcher.shared);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = shared.wake.notified() => self.process_latest(),
            }
        }
        self.transition()
    }
}

impl ControlWorker<Stopping> {
    fn shutdown(mut self) -> ControlWorker<Stopped> {
        self.shaper.reset();
        let report = self.latency.lock().report();
        info!("Control worker stopped. Latency:\n{}", report);
        self.transition()
    }
}

struct WorkerTask {
    cancel: CancellationToken,
    task_handle: JoinHandle<()>,
}

/// Public entry point of the control pipeline
pub struct ControlHandle {
    dispatcher: Dispatcher,
    settings: Mutex<ControlSettings>,
    haptics: HapticSink,
    latency: Arc<Mutex<PipelineLatency>>,
    worker: Mutex<Option<WorkerTask>>,
}

impl ControlHandle {
    pub fn new(
        settings: ControlSettings,
        transport: Arc<dyn Transport>,
        encoder: Arc<CommandEncoder>,
        haptics: HapticSink,
    ) -> Self {
        let settings = ControlSettings {
            filter_alpha: ControlSettings::clamp_alpha(settings.filter_alpha),
            ..settings
        };
        haptics.set_enabled(settings.haptics_enabled);
        let delay = DirectionDelay::new(settings.direction_change_delay_ms);
        let settings = ControlSettings {
            direction_change_delay_ms: delay.millis(),
            ..settings
        };

        let shared = Arc::new(ControlShared {
            running: AtomicBool::new(false),
            force_send: AtomicBool::new(false),
            sample: LatestSample::default(),
            wake: Notify::new(),
            last_sent: CommandSlot::default(),
            delay,
            stall_resend_ms: AtomicU64::new(settings.stall_resend_ms),
            epoch: Instant::now(),
            last_input_ms: AtomicU64::new(NO_INPUT),
        });

        Self {
            dispatcher: Dispatcher {
                shared,
                transport,
                encoder,
            },
            settings: Mutex::new(settings),
            haptics,
            latency: Arc::new(Mutex::new(PipelineLatency::default())),
            worker: Mutex::new(None),
        }
    }

    fn shared(&self) -> &ControlShared {
        &self.dispatcher.shared
    }

    /// Arms the pipeline and sends the zero command. No-op while running.
    pub fn start(&self) -> Result<(), ControlError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ControlError::NoRuntime(e.to_string()))?;
        if self.shared().running.swap(true, Ordering::AcqRel) {
            debug!("Control pipeline already running");
            return Ok(());
        }

        self.shared().sample.clear();
        self.shared().last_input_ms.store(NO_INPUT, Ordering::Release);
        self.latency.lock().reset();

        let settings = self.settings.lock().clone();
        let worker = ControlWorker::create(
            self.dispatcher.clone(),
            &settings,
            self.haptics.clone(),
            Arc::clone(&self.latency),
        )
        .activate();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_handle = runtime.spawn(async move {
            let stopping = worker.run_until_cancelled(task_cancel).await;
            let _stopped = stopping.shutdown();
        });

        *self.worker.lock() = Some(WorkerTask {
            cancel,
            task_handle,
        });
        info!("Control pipeline started");
        Ok(())
    }

    /// Sends the zero command and stops the worker. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.shared().running.swap(false, Ordering::AcqRel) {
            debug!("Control pipeline already stopped");
            return;
        }

        self.dispatcher.send(&ControlCommand::zero());
        if let Some(task) = self.worker.lock().take() {
            if task.task_handle.is_finished() {
                warn!("Control worker had already exited");
            }
            task.cancel.cancel();
        }
        info!("Control pipeline stopped");
    }

    /// Hands a joystick sample to the worker. Ignored while stopped.
    pub fn update_sample(&self, x: f32, y: f32) {
        let shared = self.shared();
        if !shared.is_running() {
            return;
        }

        let now = shared.millis_since_epoch();
        let previous = shared.last_input_ms.swap(now, Ordering::AcqRel);
        let stall = shared.stall_resend_ms.load(Ordering::Relaxed);
        if previous != NO_INPUT && now.saturating_sub(previous) > stall {
            debug!("Input stalled for {}ms, resending", now - previous);
            self.force_send();
        }

        shared.sample.store(x, y);
        shared.wake.notify_one();
    }

    /// Re-sends the last command out of band and forces the next cycle to send
    pub fn force_send(&self) {
        self.shared().force_send.store(true, Ordering::Release);
        let command = self.dispatcher.last_sent();
        self.dispatcher.send(&command);
    }

    pub fn is_running(&self) -> bool {
        self.shared().is_running()
    }

    /// True when the vessel was last told to stop
    pub fn is_idle(&self) -> bool {
        self.dispatcher.last_sent().is_zero()
    }

    pub fn last_command(&self) -> ControlCommand {
        self.dispatcher.last_sent()
    }

    pub fn settings(&self) -> ControlSettings {
        let mut settings = self.settings.lock().clone();
        settings.direction_change_delay_ms = self.shared().delay.millis();
        settings.haptics_enabled = self.haptics.is_enabled();
        settings
    }

    pub fn set_filter(&self, filter: FilterKind, alpha: f32) -> Result<(), ControlError> {
        if self.is_running() {
            warn!("Ignoring filter change to {} while running", filter);
            return Err(ControlError::FilterLocked);
        }
        let mut settings = self.settings.lock();
        settings.filter = filter;
        settings.filter_alpha = ControlSettings::clamp_alpha(alpha);
        info!(
            "Filter set to {} (alpha {})",
            settings.filter, settings.filter_alpha
        );
        Ok(())
    }

    /// Applies immediately, also to a reversal already in progress
    pub fn set_direction_change_delay(&self, millis: u64) -> u64 {
        let applied = self.shared().delay.set(millis);
        self.settings.lock().direction_change_delay_ms = applied;
        info!("Direction change delay set to {}ms", applied);
        applied
    }

    pub fn set_haptics_enabled(&self, enabled: bool) {
        self.haptics.set_enabled(enabled);
        self.settings.lock().haptics_enabled = enabled;
    }

    pub fn clear_caches(&self) {
        self.dispatcher.encoder.clear();
    }

    pub fn performance_report(&self) -> String {
        self.latency.lock().report()
    }

    pub fn reset_performance(&self) {
        self.latency.lock().reset();
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
