//! Bus-activity handshake for paced menu replies.
//!
//! The receive path calls [`ActivityFlag::notify`] for every inbound frame
//! (from interrupt context on target).  [`ActivityWaiter`] implements
//! [`BusActivity`] by polling the flag with an `embedded-hal` delay until
//! it fires or the timeout runs out.
//!
//! Anything signalled before the wait starts is discarded: the frame that
//! triggered the reply must not count as the handset's go-ahead.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use embedded_hal::delay::DelayNs;

use crate::app::ports::BusActivity;

/// Poll granularity while waiting.
const POLL_MS: u32 = 5;

/// Set by the receive path, consumed by a waiter.
pub struct ActivityFlag {
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl ActivityFlag {
    pub const fn new() -> Self {
        Self { signal: Signal::new() }
    }

    pub fn notify(&self) {
        self.signal.signal(());
    }

    fn take(&self) -> bool {
        self.signal.try_take().is_some()
    }

    fn reset(&self) {
        self.signal.reset();
    }
}

impl Default for ActivityFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded wait on an [`ActivityFlag`].
pub struct ActivityWaiter<'a, D: DelayNs> {
    flag: &'a ActivityFlag,
    delay: D,
}

impl<'a, D: DelayNs> ActivityWaiter<'a, D> {
    pub fn new(flag: &'a ActivityFlag, delay: D) -> Self {
        Self { flag, delay }
    }

    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }
}

impl<D: DelayNs> BusActivity for ActivityWaiter<'_, D> {
    fn wait_for_activity(&mut self, timeout: Duration) -> bool {
        self.flag.reset();
        let budget = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut waited = 0u32;
        loop {
            if self.flag.take() {
                return true;
            }
            if waited >= budget {
                return false;
            }
            let step = POLL_MS.min(budget - waited);
            self.delay.delay_ms(step);
            waited += step;
        }
    }
}
