//! GPIO adapters over `embedded-hal` pins.
//!
//! The solenoid driver and the bus-enable line are plain digital pins on
//! every board revision, so any HAL's pin types plug in here.

use embedded_hal::digital::{InputPin, OutputPin};
use log::warn;

use crate::app::ports::{BusEnable, SolenoidPort};

/// Solenoid MOSFET gate on an output pin, active high.
pub struct GpioSolenoid<P: OutputPin> {
    pin: P,
    on: bool,
}

impl<P: OutputPin> GpioSolenoid<P> {
    /// Takes the pin and drives it low.
    pub fn new(mut pin: P) -> Self {
        if pin.set_low().is_err() {
            warn!("solenoid: initial set_low failed");
        }
        Self { pin, on: false }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> SolenoidPort for GpioSolenoid<P> {
    fn set_solenoid(&mut self, on: bool) {
        let result = if on { self.pin.set_high() } else { self.pin.set_low() };
        match result {
            Ok(()) => self.on = on,
            Err(_) => warn!("solenoid: pin write failed"),
        }
    }
}

/// Bus-enable sense line on an input pin, high while the handset powers
/// the bus.
pub struct GpioBusEnable<P: InputPin> {
    pin: P,
}

impl<P: InputPin> GpioBusEnable<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }
}

impl<P: InputPin> BusEnable for GpioBusEnable<P> {
    /// A read error counts as enabled so a flaky pin never powers us off.
    fn bus_enabled(&mut self) -> bool {
        self.pin.is_high().unwrap_or(true)
    }
}
