#![no_std]

//! Motion-triggered PCM playback.
//!
//! A PIR motion sensor raises a rising-edge interrupt; after debouncing, the
//! event is queued across the ISR/task boundary, a monitor task invokes the
//! registered detection handler, and the handler kicks off fire-and-forget
//! streaming playback of a fixed clip through an I2S-style amplifier
//! (MAX98357A or similar). A status indicator blinks once the sensor has
//! settled and the detector is armed.
//!
//! The crate is hardware-agnostic: the amplifier sits behind the [`PcmSink`]
//! trait and the indicator behind `embedded_hal::digital::StatefulOutputPin`,
//! so the whole pipeline runs under host unit tests. A firmware binary wires
//! the concrete HAL types in, roughly:
//!
//! ```ignore
//! static PIR: PirState = PirState::new();
//! static AMP: AmpState = AmpState::new();
//! static READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();
//! static SINK: StaticCell<Mutex<CriticalSectionRawMutex, I2sSink>> = StaticCell::new();
//!
//! // GPIO ISR, rising edge on the PIR line:
//! fn pir_isr() { PIR.on_rising_edge(motion_chime::now_ms32()); }
//!
//! #[embassy_executor::task]
//! async fn player(amp: &'static Amp<'static, I2sSink>) -> ! { amp.run().await }
//!
//! #[embassy_executor::task]
//! async fn monitor(pir: Pir<'static, &'static Amp<'static, I2sSink>>) -> ! { pir.run().await }
//! ```
//!
//! Playback is fire-and-forget by design: [`amp::Amp::request_playback`] only
//! reports whether streaming was *initiated*. There is no join or cancel for
//! a running session; it owns the amplifier and its transfer buffer until the
//! clip is exhausted, then releases both.
//!
//! Heap use is limited to the per-session transfer buffer (`alloc`); the
//! embedding application provides the global allocator.

extern crate alloc;

#[cfg(test)]
extern crate std;

// Must come first so the log shims are visible to the other modules.
mod fmt;

pub mod amp;
pub mod clip;
pub mod indicator;
pub mod pir;

pub use amp::{Amp, AmpConfig, AmpState, PcmSink, PlaybackError, PlayerConfig, SlotMode};
pub use clip::{Gain, PcmClip};
pub use indicator::Indicator;
pub use pir::{DetectionHandler, MotionEvent, Pir, PirConfig, PirState};

/// Milliseconds since boot, truncated to `u32`.
///
/// Wraps after ~49.7 days; elapsed time between two timestamps is always
/// computed with `wrapping_sub`, which stays correct across the rollover.
/// Safe to call from interrupt context on targets where the embassy time
/// driver is.
pub fn now_ms32() -> u32 {
    embassy_time::Instant::now().as_millis() as u32
}
