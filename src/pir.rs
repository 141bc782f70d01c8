//! PIR motion detector: debounced edge capture in interrupt context, a
//! bounded event channel across the ISR/task boundary, and the monitor task
//! that turns accepted events into detection-handler calls.
//!
//! Concurrency contract (one writer, one clearer, no lock anywhere):
//! - The ISR ([`PirState::on_rising_edge`]) is the only writer of the
//!   timestamps and the only *setter* of the sticky flags, and performs one
//!   non-blocking channel send. No heap, no blocking, no logging at that
//!   priority; diagnostics are deferred to the monitor via the flags.
//! - The monitor is the only consumer of the channel and the only *clearer*
//!   of the flags, via atomic `swap(false)`, so a set that lands between
//!   observation and clear is never lost. Rapid triggers may coalesce into
//!   one observed flag; distinct accepted events travel through the channel,
//!   not the flags.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

/// Depth of the ISR-to-monitor event queue. Overflow drops the event and
/// raises the `queue_full` diagnostic instead of ever blocking the ISR.
pub const EVENT_QUEUE_DEPTH: usize = 10;

/// Opaque token for one accepted (non-debounced, non-dropped) motion trigger.
/// Produced by the ISR, consumed exactly once by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionEvent;

/// Detector timing and cadence. Defaults follow the AM312-class sensor this
/// was built around: the part's own retrigger hold is ~2 s, the much longer
/// debounce keeps the speaker from re-firing on every hallway pass.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PirConfig {
    /// Input line (GPIO number) the sensor is wired to. Recorded for
    /// diagnostics; the actual pin setup belongs to the embedding firmware.
    pub line: u8,
    /// Cooldown window after an accepted trigger.
    pub debounce: Duration,
    /// Power-on settling time before the detector is armed.
    pub stabilisation: Duration,
    /// Monitor poll cadence; bounds how stale a sticky-flag diagnostic or a
    /// queued event can get.
    pub poll_interval: Duration,
}

impl PirConfig {
    pub const fn new(line: u8) -> Self {
        Self {
            line,
            debounce: Duration::from_millis(15_000),
            stabilisation: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub const fn with_stabilisation(mut self, stabilisation: Duration) -> Self {
        self.stabilisation = stabilisation;
        self
    }

    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Shared detector state, ISR-visible. Lives in a `static` for the process
/// lifetime; all fields are individually atomic (wrapping u32 milliseconds
/// for the timestamps, so 32-bit targets need no 64-bit atomics).
pub struct PirState {
    last_motion_ms: AtomicU32,
    // `last_motion_ms` is only meaningful once an edge has been accepted.
    triggered: AtomicBool,
    // Set once by `Pir::new` before arming; atomic because the ISR reads it
    // and the ISR path only gets `&self`.
    debounce_period_ms: AtomicU32,
    queue_full: AtomicBool,
    suppressed: AtomicBool,
    motion: AtomicBool,
    armed: AtomicBool,
    line: AtomicU8,
    handler_failures: AtomicU32,
    events: Channel<CriticalSectionRawMutex, MotionEvent, EVENT_QUEUE_DEPTH>,
}

impl PirState {
    pub const fn new() -> Self {
        Self {
            last_motion_ms: AtomicU32::new(0),
            triggered: AtomicBool::new(false),
            debounce_period_ms: AtomicU32::new(15_000),
            queue_full: AtomicBool::new(false),
            suppressed: AtomicBool::new(false),
            motion: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            line: AtomicU8::new(0),
            handler_failures: AtomicU32::new(0),
            events: Channel::new(),
        }
    }

    /// Record one rising edge of the sensor line.
    ///
    /// Interrupt-safe: no blocking, no allocation, no logging; one
    /// non-blocking channel send at most. Call from the GPIO ISR with
    /// [`crate::now_ms32`]. Edges arriving before the detector is armed
    /// (sensor still settling) are ignored entirely.
    ///
    /// An edge strictly more than the debounce period after the last accepted
    /// edge is accepted and one event is queued (a full queue raises
    /// `queue_full` instead, and the event is dropped). Any other edge only
    /// raises `suppressed`; rejected edges never touch `last_motion_ms`, so
    /// sustained chatter inside one window cannot postpone the next accept.
    /// The elapsed time is `wrapping_sub` of two u32 millisecond stamps,
    /// which holds up across the ~49.7-day clock rollover and across idle
    /// gaps of any length.
    pub fn on_rising_edge(&self, now_ms: u32) {
        if !self.armed.load(Ordering::Relaxed) {
            return;
        }

        let elapsed = now_ms.wrapping_sub(self.last_motion_ms.load(Ordering::Relaxed));
        let period = self.debounce_period_ms.load(Ordering::Relaxed);
        if !self.triggered.load(Ordering::Relaxed) || elapsed > period {
            self.triggered.store(true, Ordering::Relaxed);
            self.last_motion_ms.store(now_ms, Ordering::Relaxed);

            if self.events.try_send(MotionEvent).is_err() {
                self.queue_full.store(true, Ordering::Relaxed);
            } else {
                self.motion.store(true, Ordering::Relaxed);
            }
        } else {
            self.suppressed.store(true, Ordering::Relaxed);
        }
    }

    /// Timestamp (wrapping ms) of the last accepted trigger.
    pub fn last_motion_ms(&self) -> u32 {
        self.last_motion_ms.load(Ordering::Relaxed)
    }

    /// Total detection-handler invocations that returned an error.
    pub fn handler_failures(&self) -> u32 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// The input line the detector was configured with.
    pub fn line(&self) -> u8 {
        self.line.load(Ordering::Relaxed)
    }
}

impl Default for PirState {
    fn default() -> Self {
        Self::new()
    }
}

/// Called on each accepted, non-debounced motion event.
///
/// Expected to return quickly: schedule work, don't perform it. The blessed
/// implementation is `&Amp<S>`, whose `on_motion` is a fire-and-forget
/// playback request.
#[allow(async_fn_in_trait)]
pub trait DetectionHandler {
    type Error: core::fmt::Debug;

    async fn on_motion(&mut self) -> Result<(), Self::Error>;
}

/// The motion monitor task body.
///
/// Owns the detection handler (the "registered callback"); runs forever once
/// started. Wrap in an `#[embassy_executor::task]` for the concrete handler
/// type.
pub struct Pir<'d, H: DetectionHandler> {
    state: &'d PirState,
    ready: &'d Signal<CriticalSectionRawMutex, ()>,
    handler: H,
    cfg: PirConfig,
}

impl<'d, H: DetectionHandler> Pir<'d, H> {
    /// `ready` is signalled once (after the stabilisation wait, when the
    /// detector arms) and starts the status-indicator sequence.
    pub fn new(
        state: &'d PirState,
        ready: &'d Signal<CriticalSectionRawMutex, ()>,
        handler: H,
        cfg: PirConfig,
    ) -> Self {
        state.line.store(cfg.line, Ordering::Relaxed);
        state
            .debounce_period_ms
            .store(cfg.debounce.as_millis() as u32, Ordering::Relaxed);
        Self {
            state,
            ready,
            handler,
            cfg,
        }
    }

    pub async fn run(mut self) -> ! {
        info!(
            "pir: waiting {}ms for the sensor to settle (line {})",
            self.cfg.stabilisation.as_millis(),
            self.cfg.line
        );
        Timer::after(self.cfg.stabilisation).await;

        self.state.armed.store(true, Ordering::Relaxed);
        self.ready.signal(());
        info!("pir: armed");

        loop {
            if self.state.motion.swap(false, Ordering::Relaxed) {
                info!("pir: motion detected");
            }

            // One handler call per accepted event; bursts that queued several
            // events before this cycle all get their callback.
            while self.state.events.try_receive().is_ok() {
                if self.handler.on_motion().await.is_err() {
                    self.state.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("pir: detection handler failed");
                }
            }

            if self.state.queue_full.swap(false, Ordering::Relaxed) {
                warn!("pir: event queue full; a motion event was dropped");
            }
            if self.state.suppressed.swap(false, Ordering::Relaxed) {
                debug!("pir: motion edge debounced");
            }

            Timer::after(self.cfg.poll_interval).await;
        }
    }
}
