//! Amplifier driver: playback orchestration and the streaming engine.
//!
//! The output peripheral (MAX98357A-class I2S amp) sits behind the
//! [`PcmSink`] trait inside an async mutex. [`Amp::request_playback`] is the
//! orchestrator: it validates readiness, enables the channel, allocates the
//! transfer buffer (all-or-nothing: an allocation failure rolls the enable
//! back), then hands the buffer to the engine through a single-slot session
//! channel and returns. [`Amp::run`] is the engine: for each session it is
//! the sole owner of the buffer and of the enabled channel, streams the clip
//! window by window, and releases both on the way out, in that order, on
//! every exit path.
//!
//! Playback is fire-and-forget: a successful request only means streaming
//! was initiated. There is no join and no cancel; a session runs until the
//! clip is exhausted. At most one session exists at a time: the
//! `session_active` compare-and-swap is the admission token, and a request
//! arriving while it is held is rejected with [`PlaybackError::Busy`].

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration, Timer};

use crate::clip::{fill_window, Gain, PcmClip};
use crate::pir::DetectionHandler;

/// Output channel layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotMode {
    #[default]
    Mono,
    Stereo,
}

/// One-time peripheral configuration, consumed by [`Amp::init`].
///
/// The signal-line numbers name the board wiring (DIN, LRC/WS, BCLK on the
/// MAX98357A breakout); the sink implementation does the actual pin, clock
/// and format setup. The clip's sample rate and width must match this
/// configuration; that contract is fixed at build time, not checked here.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AmpConfig {
    pub port: u8,
    pub data_line: u8,
    pub word_select_line: u8,
    pub bit_clock_line: u8,
    pub sample_rate: u32,
    pub bit_width: u8,
    pub slot_mode: SlotMode,
}

impl AmpConfig {
    pub const fn new(data_line: u8, word_select_line: u8, bit_clock_line: u8) -> Self {
        Self {
            port: 0,
            data_line,
            word_select_line,
            bit_clock_line,
            sample_rate: 44_100,
            bit_width: 16,
            slot_mode: SlotMode::Mono,
        }
    }

    pub const fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub const fn with_slot_mode(mut self, slot_mode: SlotMode) -> Self {
        self.slot_mode = slot_mode;
        self
    }
}

/// Streaming tunables.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlayerConfig {
    /// Transfer window length in samples. Kept large so a slow consumer (or
    /// a long-running ISR) cannot starve the peripheral mid-clip.
    pub chunk_len: usize,
    pub gain: Gain,
    /// Bound on a single window write; expiry drops that window of audio and
    /// streaming moves on.
    pub write_timeout: Duration,
    /// Optional silence before streaming starts.
    pub lead_in: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            chunk_len: 10_000,
            gain: Gain::Clear,
            write_timeout: Duration::from_millis(1_000),
            lead_in: Duration::from_millis(0),
        }
    }
}

impl PlayerConfig {
    pub const fn with_chunk_len(mut self, chunk_len: usize) -> Self {
        self.chunk_len = chunk_len;
        self
    }

    pub const fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    pub const fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub const fn with_lead_in(mut self, lead_in: Duration) -> Self {
        self.lead_in = lead_in;
        self
    }
}

/// The output peripheral at its interface: an I2S-style transmit channel.
///
/// `configure` is the one-time bring-up (pins, clocks, format); `enable` and
/// `disable` bracket a playback session. An enabled channel that is not being
/// fed emits sustained line noise on real hardware, which is why the engine
/// guarantees enable/disable pairing on every path.
#[allow(async_fn_in_trait)]
pub trait PcmSink {
    type Error: core::fmt::Debug;

    async fn configure(&mut self, config: &AmpConfig) -> Result<(), Self::Error>;
    async fn enable(&mut self) -> Result<(), Self::Error>;
    async fn disable(&mut self) -> Result<(), Self::Error>;
    /// Write one window of samples; returns the number consumed.
    async fn write(&mut self, samples: &[u16]) -> Result<usize, Self::Error>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum PlaybackError<E> {
    /// `request_playback` before `init` completed. No side effect.
    NotInitialised,
    /// A session is already active; this request was rejected.
    Busy,
    /// Transfer buffer allocation failed. The channel enable was rolled back.
    OutOfMemory,
    /// The peripheral failed to enable.
    Sink(E),
}

/// A granted playback session: the transfer buffer, owned by the engine from
/// handoff until release.
struct Session {
    buffer: Vec<u16>,
}

/// Non-generic shared state for one amplifier. Const-constructible so it can
/// live in a `static` next to the sink mutex.
pub struct AmpState {
    initialised: AtomicBool,
    session_active: AtomicBool,
    sessions: Channel<CriticalSectionRawMutex, Session, 1>,
    write_errors: AtomicU32,
    rejected_requests: AtomicU32,
    sessions_played: AtomicU32,
}

impl AmpState {
    pub const fn new() -> Self {
        Self {
            initialised: AtomicBool::new(false),
            session_active: AtomicBool::new(false),
            sessions: Channel::new(),
            write_errors: AtomicU32::new(0),
            rejected_requests: AtomicU32::new(0),
            sessions_played: AtomicU32::new(0),
        }
    }

    /// Window writes that failed or timed out across all sessions.
    pub fn write_errors(&self) -> u32 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Playback requests rejected because a session was already active.
    pub fn rejected_requests(&self) -> u32 {
        self.rejected_requests.load(Ordering::Relaxed)
    }

    pub fn sessions_played(&self) -> u32 {
        self.sessions_played.load(Ordering::Relaxed)
    }

    /// `true` while a session holds the peripheral (granted but not yet
    /// released).
    pub fn session_active(&self) -> bool {
        self.session_active.load(Ordering::Relaxed)
    }
}

impl Default for AmpState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle over one amplifier: shared state, the sink behind its mutex, the
/// clip and the streaming tunables. Cheap to share by reference between the
/// requesting context and the engine task.
pub struct Amp<'d, S: PcmSink> {
    state: &'d AmpState,
    sink: &'d Mutex<CriticalSectionRawMutex, S>,
    clip: PcmClip,
    cfg: PlayerConfig,
}

impl<'d, S: PcmSink> Amp<'d, S> {
    pub fn new(
        state: &'d AmpState,
        sink: &'d Mutex<CriticalSectionRawMutex, S>,
        clip: PcmClip,
        cfg: PlayerConfig,
    ) -> Self {
        Self {
            state,
            sink,
            clip,
            cfg,
        }
    }

    /// One-time bring-up of the output channel. Must complete before any
    /// playback request; a failure here is fatal to the audio path and the
    /// caller should treat it as a startup abort.
    pub async fn init(&self, config: &AmpConfig) -> Result<(), S::Error> {
        let mut sink = self.sink.lock().await;
        sink.configure(config).await?;
        self.state.initialised.store(true, Ordering::Relaxed);
        info!(
            "amp: channel configured ({}Hz, {}bit, din={} ws={} bclk={})",
            config.sample_rate,
            config.bit_width,
            config.data_line,
            config.word_select_line,
            config.bit_clock_line
        );
        Ok(())
    }

    /// Start streaming the clip to the speaker, fire-and-forget.
    ///
    /// On success the engine task takes over and this returns immediately;
    /// the result only says whether streaming was *initiated*. Acquisition is
    /// all-or-nothing: if the buffer cannot be allocated after the channel
    /// was enabled, the channel is disabled again before the error is
    /// returned, and the admission token is released on every error path.
    pub async fn request_playback(&self) -> Result<(), PlaybackError<S::Error>> {
        if !self.state.initialised.load(Ordering::Relaxed) {
            return Err(PlaybackError::NotInitialised);
        }

        if self
            .state
            .session_active
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            self.state.rejected_requests.fetch_add(1, Ordering::Relaxed);
            debug!("amp: playback already in progress; request rejected");
            return Err(PlaybackError::Busy);
        }

        match self.acquire_session().await {
            Ok(session) => {
                // Cannot fail: the slot is guarded by the admission token we
                // hold. Checked anyway so a logic error cannot wedge the amp
                // in an enabled state.
                if self.state.sessions.try_send(session).is_err() {
                    let mut sink = self.sink.lock().await;
                    if sink.disable().await.is_err() {
                        error!("amp: failed to disable channel after handoff failure");
                    }
                    self.state.session_active.store(false, Ordering::Relaxed);
                    return Err(PlaybackError::Busy);
                }
                Ok(())
            }
            Err(err) => {
                self.state.session_active.store(false, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    async fn acquire_session(&self) -> Result<Session, PlaybackError<S::Error>> {
        let mut sink = self.sink.lock().await;
        sink.enable().await.map_err(PlaybackError::Sink)?;

        let mut buffer: Vec<u16> = Vec::new();
        if buffer.try_reserve_exact(self.cfg.chunk_len).is_err() {
            error!("amp: transfer buffer allocation failed; rolling back enable");
            if sink.disable().await.is_err() {
                error!("amp: rollback disable failed; channel state unknown");
            }
            return Err(PlaybackError::OutOfMemory);
        }
        buffer.resize(self.cfg.chunk_len, 0);

        debug!("amp: channel enabled, {} sample window ready", self.cfg.chunk_len);
        Ok(Session { buffer })
    }

    /// The streaming engine. Runs forever; wrap in a task and keep exactly
    /// one instance per amplifier running.
    pub async fn run(&self) -> ! {
        loop {
            let session = self.state.sessions.receive().await;
            self.play(session).await;
            self.state.sessions_played.fetch_add(1, Ordering::Relaxed);
            self.state.session_active.store(false, Ordering::Relaxed);
        }
    }

    async fn play(&self, session: Session) {
        let Session { mut buffer } = session;

        if self.cfg.lead_in.as_ticks() > 0 {
            Timer::after(self.cfg.lead_in).await;
        }

        let mut sink = self.sink.lock().await;
        let mut offset = 0usize;
        let mut windows = 0u32;
        let mut errors = 0u32;

        loop {
            let n = fill_window(&self.clip, offset, self.cfg.gain, &mut buffer);
            if n == 0 {
                break;
            }
            offset += n;

            match with_timeout(self.cfg.write_timeout, sink.write(&buffer[..n])).await {
                Ok(Ok(written)) => trace!("amp: wrote {} samples", written),
                Ok(Err(_)) => {
                    errors += 1;
                    warn!("amp: window write failed; continuing with the next window");
                }
                Err(_) => {
                    errors += 1;
                    warn!("amp: window write timed out; continuing with the next window");
                }
            }
            windows += 1;
        }

        // Release order per the session contract: buffer first, then quiesce
        // the channel. Both happen exactly once on every exit.
        drop(buffer);
        if sink.disable().await.is_err() {
            error!("amp: failed to disable the output channel");
        }

        if errors > 0 {
            self.state.write_errors.fetch_add(errors, Ordering::Relaxed);
            warn!("amp: {} of {} window writes failed this session", errors, windows);
        }
        debug!("amp: session complete ({} windows, {} source bytes)", windows, offset);
    }
}

/// A motion detection directly requests playback; errors (busy, not yet
/// initialised) surface through the monitor's failure accounting.
impl<'a, 'd, S: PcmSink> DetectionHandler for &'a Amp<'d, S> {
    type Error = PlaybackError<S::Error>;

    async fn on_motion(&mut self) -> Result<(), Self::Error> {
        Amp::request_playback(self).await
    }
}
