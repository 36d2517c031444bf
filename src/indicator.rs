//! Status indicators (lights, buzzers, log lines).
//!
//! The pipeline fires named signals around inference. Indicators are best-effort:
//! they return nothing, their failures are logged, and a panicking indicator is
//! contained by [`IndicatorBus`] so it cannot take the producer down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndicatorSignal {
    Idle,
    Processing,
    DetectionFound,
}

impl IndicatorSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::DetectionFound => "detection-found",
        }
    }
}

/// Receiver of pipeline signals. Implementations must not block.
pub trait Indicator: Send {
    fn signal(&self, signal: IndicatorSignal);
}

/// Logs state transitions at debug level.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn signal(&self, signal: IndicatorSignal) {
        log::debug!("indicator: {}", signal.as_str());
    }
}

/// GPIO pin numbers for each signal. Unset pins are not driven.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GpioPins {
    pub idle: Option<u32>,
    pub processing: Option<u32>,
    pub detection: Option<u32>,
}

/// Drives sysfs GPIO lines: the pin for the current signal goes high, the rest low.
///
/// Pins must already be exported and configured as outputs.
#[derive(Clone, Debug)]
pub struct SysfsGpioIndicator {
    root: PathBuf,
    pins: GpioPins,
}

impl SysfsGpioIndicator {
    pub fn new(root: impl Into<PathBuf>, pins: GpioPins) -> Self {
        Self {
            root: root.into(),
            pins,
        }
    }

    fn write_pin(&self, pin: u32, high: bool) {
        let path = self.root.join(format!("gpio{pin}")).join("value");
        let value = if high { "1" } else { "0" };
        if let Err(err) = std::fs::write(&path, value) {
            log::debug!("gpio write {} failed: {}", path.display(), err);
        }
    }
}

impl Indicator for SysfsGpioIndicator {
    fn signal(&self, signal: IndicatorSignal) {
        let lines = [
            (self.pins.idle, IndicatorSignal::Idle),
            (self.pins.processing, IndicatorSignal::Processing),
            (self.pins.detection, IndicatorSignal::DetectionFound),
        ];
        for (pin, line_signal) in lines {
            if let Some(pin) = pin {
                self.write_pin(pin, line_signal == signal);
            }
        }
    }
}

/// Fan-out to every registered indicator.
#[derive(Default)]
pub struct IndicatorBus {
    indicators: Vec<Box<dyn Indicator>>,
}

impl IndicatorBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, indicator: Box<dyn Indicator>) {
        self.indicators.push(indicator);
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn fire(&self, signal: IndicatorSignal) {
        for indicator in &self.indicators {
            let outcome = catch_unwind(AssertUnwindSafe(|| indicator.signal(signal)));
            if outcome.is_err() {
                log::warn!("indicator panicked on '{}' signal", signal.as_str());
            }
        }
    }
}
