//! Status indicator: blinks the LED once the sensor has settled and the
//! detector is armed, then parks the pin low and ends.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use embedded_hal::digital::StatefulOutputPin;

/// Default blink cadence: 6 toggles (3 full blinks), 750ms apart.
pub const BLINK_TOGGLES: u8 = 6;
pub const BLINK_INTERVAL: Duration = Duration::from_millis(750);

/// Ready-blink task body. Consumes the pin; the task ends when the sequence
/// is done.
pub struct Indicator<'d, P: StatefulOutputPin> {
    pin: P,
    ready: &'d Signal<CriticalSectionRawMutex, ()>,
    toggles: u8,
    interval: Duration,
}

impl<'d, P: StatefulOutputPin> Indicator<'d, P> {
    /// `ready` is the one-shot setup-completion signal from the detector.
    pub fn new(pin: P, ready: &'d Signal<CriticalSectionRawMutex, ()>) -> Self {
        Self {
            pin,
            ready,
            toggles: BLINK_TOGGLES,
            interval: BLINK_INTERVAL,
        }
    }

    pub fn with_cadence(mut self, toggles: u8, interval: Duration) -> Self {
        self.toggles = toggles;
        self.interval = interval;
        self
    }

    /// Wait for the detector to arm, blink, then park the pin low and hand
    /// it back to the caller.
    pub async fn run(mut self) -> Result<P, P::Error> {
        self.pin.set_low()?;
        self.ready.wait().await;
        info!("indicator: sensor armed, starting blink sequence");

        for _ in 0..self.toggles {
            self.pin.toggle()?;
            Timer::after(self.interval).await;
        }

        self.pin.set_low()?;
        Ok(self.pin)
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;

    use embassy_futures::block_on;

    use super::*;

    #[derive(Default)]
    struct MockPin {
        high: bool,
        toggles: u32,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl embedded_hal::digital::OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            Ok(())
        }
    }

    impl StatefulOutputPin for MockPin {
        fn is_set_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.high)
        }

        fn is_set_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.high)
        }

        fn toggle(&mut self) -> Result<(), Infallible> {
            self.high = !self.high;
            self.toggles += 1;
            Ok(())
        }
    }

    #[test]
    fn blinks_after_ready_and_parks_low() {
        let ready: Signal<CriticalSectionRawMutex, ()> = Signal::new();
        ready.signal(());

        let indicator =
            Indicator::new(MockPin::default(), &ready).with_cadence(6, Duration::from_millis(1));
        let pin = block_on(indicator.run()).unwrap();

        assert_eq!(pin.toggles, 6);
        assert!(!pin.high);
    }

    #[test]
    fn does_not_blink_before_the_ready_signal() {
        use embassy_futures::select::{select, Either};

        let ready: Signal<CriticalSectionRawMutex, ()> = Signal::new();
        let indicator =
            Indicator::new(MockPin::default(), &ready).with_cadence(2, Duration::from_millis(1));

        block_on(async {
            match select(indicator.run(), Timer::after(Duration::from_millis(20))).await {
                Either::First(_) => panic!("blinked without the ready signal"),
                Either::Second(()) => {}
            }
        });
    }
}
