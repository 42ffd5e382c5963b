//! Continuous polling session: the four-state card lifecycle, pause/resume
//! with acknowledgement, write coordination, and user callbacks
//! (spec.md §4.6, §5, §9).
//!
//! [`PollingSession::new`] splits into the session itself (consumed by
//! [`PollingSession::start`], which runs the main loop to completion) and a
//! cheaply-clonable [`SessionHandle`] other tasks use to pause, resume, and
//! queue writes — mirroring the teacher's `tx: Sender<InMessage>` handle
//! split between the background I/O loop and its callers.

use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};

use crate::channel::ByteChannel;
use crate::context::Context;
use crate::device::{Device, DetectedTag, TagKind};
use crate::error::{Error, HostResult};
use crate::tag::Tag;
use crate::timer::OneShotTimer;

const PAUSE_ACK_TIMEOUT: Duration = Duration::from_millis(100);
const PAUSED_RECHECK_INTERVAL: Duration = Duration::from_millis(10);
const ADAPTIVE_IDLE_THRESHOLD: Duration = Duration::from_secs(5);
const ADAPTIVE_POLL_CEILING: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Idle,
    TagDetected,
    Reading,
    PostReadGrace,
}

/// Card lifecycle state (spec.md §3). `removal_timer` lives here so arming
/// and disarming it is naturally serialised by the lock guarding the rest
/// of the state.
pub struct CardState {
    pub detection_state: DetectionState,
    pub present: bool,
    pub last_uid: Vec<u8>,
    pub last_type: Option<TagKind>,
    pub tested_uid: String,
    pub last_seen_time: Option<Instant>,
    pub read_start_time: Option<Instant>,
    removal_timer: Option<OneShotTimer>,
}

impl Default for CardState {
    fn default() -> Self {
        Self {
            detection_state: DetectionState::Idle,
            present: false,
            last_uid: Vec::new(),
            last_type: None,
            tested_uid: String::new(),
            last_seen_time: None,
            read_start_time: None,
            removal_timer: None,
        }
    }
}

/// A `removal_timer`-free snapshot for public readers (spec.md §5: "readers
/// are the public accessors").
#[derive(Debug, Clone)]
pub struct CardStateSnapshot {
    pub detection_state: DetectionState,
    pub present: bool,
    pub last_uid: Vec<u8>,
    pub last_type: Option<TagKind>,
}

pub type OnCardDetected = Arc<dyn Fn(&DetectedTag) + Send + Sync>;
pub type OnCardRemoved = Arc<dyn Fn() + Send + Sync>;
pub type OnCardChanged = Arc<dyn Fn(&DetectedTag) + Send + Sync>;

#[derive(Default, Clone)]
pub struct Callbacks {
    pub on_card_detected: Option<OnCardDetected>,
    pub on_card_removed: Option<OnCardRemoved>,
    pub on_card_changed: Option<OnCardChanged>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub card_removal_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            card_removal_timeout: Duration::from_millis(300),
        }
    }
}

impl From<&crate::config::Config> for SessionConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            card_removal_timeout: config.card_removal_timeout,
        }
    }
}

#[derive(Default)]
struct Diagnostics {
    pause_ack_misses: AtomicU32,
}

type PendingWriteJob = Box<dyn FnOnce(&mut dyn Tag) + Send>;

enum ControlMsg<C: ByteChannel> {
    AckPause(oneshot::Sender<()>),
    RunWrite(Box<dyn FnOnce(&mut Device<C>) + Send>),
}

/// Cheaply-clonable handle used by any task to pause/resume the loop and
/// queue writes (spec.md §5: "additional tasks may invoke `write_to_tag`
/// and `pause`/`resume` from any thread").
pub struct SessionHandle<C: ByteChannel + 'static> {
    control_tx: mpsc::UnboundedSender<ControlMsg<C>>,
    pause: Arc<AtomicBool>,
    resume_notify: Arc<Notify>,
    state: Arc<RwLock<CardState>>,
    pending_write: Arc<Mutex<Option<PendingWriteJob>>>,
    write_mutex: Arc<Mutex<()>>,
    diagnostics: Arc<Diagnostics>,
}

impl<C: ByteChannel + 'static> Clone for SessionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            control_tx: self.control_tx.clone(),
            pause: self.pause.clone(),
            resume_notify: self.resume_notify.clone(),
            state: self.state.clone(),
            pending_write: self.pending_write.clone(),
            write_mutex: self.write_mutex.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

impl<C: ByteChannel + 'static> SessionHandle<C> {
    /// Best-effort, non-blocking signal (spec.md §4.6).
    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// Idempotent; clears the flag and wakes a loop parked on resume.
    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.resume_notify.notify_waiters();
    }

    /// Signals pause and waits up to 100 ms for the loop to acknowledge it
    /// has stopped touching the transport; proceeds regardless if the
    /// ceiling elapses, incrementing a diagnostic counter (spec.md §5).
    pub async fn pause_with_ack(&self) -> bool {
        self.pause.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(ControlMsg::AckPause(tx)).is_err() {
            return false;
        }
        match tokio::time::timeout(PAUSE_ACK_TIMEOUT, rx).await {
            Ok(Ok(())) => true,
            _ => {
                self.diagnostics.pause_ack_misses.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pause_ack_misses(&self) -> u32 {
        self.diagnostics.pause_ack_misses.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> CardStateSnapshot {
        let guard = self.state.read().await;
        CardStateSnapshot {
            detection_state: guard.detection_state,
            present: guard.present,
            last_uid: guard.last_uid.clone(),
            last_type: guard.last_type,
        }
    }

    /// Serialises writers, pauses the loop with acknowledgement, runs `f`
    /// against the freshly created tag handle, and always resumes — even if
    /// `f` or tag creation fails (spec.md §4.6, §7).
    pub async fn write_to_tag<T, F>(&self, detected: DetectedTag, f: F) -> HostResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Tag) -> HostResult<T> + Send + 'static,
    {
        let _write_guard = self.write_mutex.lock().await;
        self.pause_with_ack().await;

        let (result_tx, result_rx) = oneshot::channel::<HostResult<T>>();
        let job: Box<dyn FnOnce(&mut Device<C>) + Send> = Box::new(move |device: &mut Device<C>| {
            let outcome = device.create_tag(&detected).and_then(|mut tag| f(tag.as_mut()));
            let _ = result_tx.send(outcome);
        });

        let sent = self.control_tx.send(ControlMsg::RunWrite(job)).is_ok();
        let result = if sent {
            result_rx.await.unwrap_or(Err(Error::ScannerStopped))
        } else {
            Err(Error::ScannerStopped)
        };

        self.resume();
        result
    }

    /// Queues a single pending write fulfilled the next time the loop
    /// detects a card; fails fast if one is already queued (spec.md §4.6).
    pub async fn write_to_next_tag<T, F>(&self, ctx: &Context, timeout: Duration, f: F) -> HostResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Tag) -> HostResult<T> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<HostResult<T>>();
        {
            let mut pending = self.pending_write.lock().await;
            if pending.is_some() {
                return Err(Error::WriteAlreadyPending);
            }
            *pending = Some(Box::new(move |tag: &mut dyn Tag| {
                let _ = result_tx.send(f(tag));
            }));
        }

        tokio::select! {
            res = result_rx => res.unwrap_or(Err(Error::ScannerStopped)),
            _ = tokio::time::sleep(timeout) => {
                self.pending_write.lock().await.take();
                Err(Error::Timeout { operation: "write_to_next_tag".to_string(), port: "session".to_string() })
            }
            _ = ctx.cancelled() => {
                self.pending_write.lock().await.take();
                Err(Error::ScannerStopped)
            }
        }
    }
}

/// Owns the device; consumed by [`PollingSession::start`].
pub struct PollingSession<C: ByteChannel + 'static> {
    device: Device<C>,
    control_rx: mpsc::UnboundedReceiver<ControlMsg<C>>,
    state: Arc<RwLock<CardState>>,
    pending_write: Arc<Mutex<Option<PendingWriteJob>>>,
    callbacks: Callbacks,
    config: SessionConfig,
    pause: Arc<AtomicBool>,
    resume_notify: Arc<Notify>,
}

impl<C: ByteChannel + 'static> PollingSession<C> {
    pub fn new(device: Device<C>, config: SessionConfig, callbacks: Callbacks) -> (Self, SessionHandle<C>) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(CardState::default()));
        let pending_write = Arc::new(Mutex::new(None));
        let write_mutex = Arc::new(Mutex::new(()));
        let diagnostics = Arc::new(Diagnostics::default());
        let pause = Arc::new(AtomicBool::new(false));
        let resume_notify = Arc::new(Notify::new());

        let session = Self {
            device,
            control_rx,
            state: state.clone(),
            pending_write: pending_write.clone(),
            callbacks,
            config,
            pause: pause.clone(),
            resume_notify: resume_notify.clone(),
        };
        let handle = SessionHandle {
            control_tx,
            pause,
            resume_notify,
            state,
            pending_write,
            write_mutex,
            diagnostics,
        };
        (session, handle)
    }

    /// Drives the main loop until `ctx` is cancelled (spec.md §4.6).
    ///
    /// Device I/O runs directly on this task rather than through
    /// `tokio::task::block_in_place`: `block_in_place` requires a
    /// multi-thread runtime, which is incompatible with the
    /// `tokio::time::pause`-based deterministic tests this module relies
    /// on. Production callers should give a `PollingSession` its own task
    /// (or runtime) so its blocking transport I/O doesn't stall unrelated
    /// async work sharing the same worker thread.
    pub async fn start(mut self, ctx: Context) -> HostResult<()> {
        let mut poll_interval = self.config.poll_interval;
        let mut idle_since: Option<Instant> = None;

        loop {
            if ctx.is_cancelled() {
                break;
            }

            while let Ok(msg) = self.control_rx.try_recv() {
                match msg {
                    ControlMsg::AckPause(tx) => {
                        let _ = tx.send(());
                    }
                    ControlMsg::RunWrite(job) => {
                        let device = &mut self.device;
                        if panic::catch_unwind(panic::AssertUnwindSafe(|| job(device))).is_err() {
                            warn!(target: "pn532_host::session", "write job panicked");
                        }
                    }
                }
            }

            if self.pause.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = self.resume_notify.notified() => {}
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(PAUSED_RECHECK_INTERVAL) => {}
                }
                continue;
            }

            match self.device.detect_tags(1, 0x00) {
                Ok(tags) if tags.is_empty() => {
                    idle_since.get_or_insert(Instant::now());
                }
                Ok(tags) => {
                    idle_since = None;
                    poll_interval = self.config.poll_interval;
                    self.handle_detection(&tags[0]).await;
                }
                Err(Error::Timeout { .. }) | Err(Error::NoTagDetected) => {
                    // No card in range this tick: removal is handled by the timer.
                }
                Err(Error::Io { .. }) | Err(Error::Closed { .. }) => {
                    self.trigger_removal().await;
                }
                Err(e) if e.retryable() => {
                    // Other transient protocol hiccups (NoAck/FrameCorrupted/NotReady):
                    // removal is handled by the timer.
                }
                Err(_) => {
                    self.trigger_removal().await;
                }
            }

            if idle_since.map(|t| t.elapsed() >= ADAPTIVE_IDLE_THRESHOLD).unwrap_or(false) {
                poll_interval = ADAPTIVE_POLL_CEILING;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = ctx.cancelled() => break,
            }
        }

        self.disarm_removal_timer().await;
        Ok(())
    }

    async fn handle_detection(&mut self, detected: &DetectedTag) {
        let (is_new, changed) = {
            let guard = self.state.read().await;
            (!guard.present, guard.present && guard.last_uid != detected.uid)
        };

        {
            let mut guard = self.state.write().await;
            guard.present = true;
            guard.last_uid = detected.uid.clone();
            guard.last_type = Some(detected.kind);
            guard.last_seen_time = Some(Instant::now());
            guard.detection_state = DetectionState::TagDetected;
        }

        if is_new {
            if let Some(cb) = &self.callbacks.on_card_detected {
                cb(detected);
            }
        } else if changed {
            if let Some(cb) = &self.callbacks.on_card_changed {
                cb(detected);
            }
        }

        self.arm_removal_timer(self.config.card_removal_timeout).await;

        let job = self.pending_write.lock().await.take();
        if let Some(job) = job {
            {
                let mut guard = self.state.write().await;
                guard.detection_state = DetectionState::Reading;
                guard.read_start_time = Some(Instant::now());
            }
            self.disarm_removal_timer().await;

            match self.device.create_tag(detected) {
                Ok(mut tag) => job(tag.as_mut()),
                Err(e) => warn!(target: "pn532_host::session", "create_tag failed for queued write: {e}"),
            }

            {
                let mut guard = self.state.write().await;
                guard.detection_state = DetectionState::PostReadGrace;
                guard.read_start_time = None;
            }
            self.arm_removal_timer(self.config.card_removal_timeout / 2).await;
        }
    }

    async fn trigger_removal(&mut self) {
        self.disarm_removal_timer().await;
        let was_present = {
            let mut guard = self.state.write().await;
            let was_present = guard.present;
            guard.present = false;
            guard.detection_state = DetectionState::Idle;
            guard.last_uid.clear();
            guard.last_type = None;
            was_present
        };
        if was_present {
            if let Some(cb) = &self.callbacks.on_card_removed {
                cb();
            }
        }
    }

    /// Disarms any existing timer, then arms a fresh one. Firing it
    /// transitions to `Idle` and invokes `on_card_removed`, but only if the
    /// state is still `TagDetected`/`PostReadGrace` (spec.md §4.6: "any
    /// state change must safely stop-and-drain the timer").
    async fn arm_removal_timer(&self, duration: Duration) {
        self.disarm_removal_timer().await;

        let state = self.state.clone();
        let on_card_removed = self.callbacks.on_card_removed.clone();
        let timer = OneShotTimer::start(duration, move || async move {
            let fired = {
                let mut guard = state.write().await;
                let should_fire =
                    matches!(guard.detection_state, DetectionState::TagDetected | DetectionState::PostReadGrace);
                if should_fire {
                    guard.detection_state = DetectionState::Idle;
                    guard.present = false;
                    guard.last_uid.clear();
                    guard.last_type = None;
                }
                should_fire
            };
            if fired {
                if let Some(cb) = &on_card_removed {
                    cb();
                }
            }
        });

        self.state.write().await.removal_timer = Some(timer);
    }

    async fn disarm_removal_timer(&self) {
        let existing = self.state.write().await.removal_timer.take();
        if let Some(mut timer) = existing {
            timer.stop_and_drain().await;
        }
    }
}
