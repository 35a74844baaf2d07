// src/instruments/sim.rs
//! Simulated bench for running without hardware.
//!
//! The bias block and power meter share one virtual SIS junction: the current
//! follows a crude I-V curve with a gap at 2.8 mV and the detected power peaks
//! on the first photon step just below the gap.
use super::{BiasSource, BlockControl, PowerMeter};
use crate::error::InstrumentError;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const GAP_VOLTAGE: f64 = 2.8e-3;
const NORMAL_RESISTANCE: f64 = 15.0;
const SUBGAP_RATIO: f64 = 30.0;
const DROPOUT_PROBABILITY: f64 = 0.02;

#[derive(Clone)]
pub struct SimBench {
    voltage_bits: Arc<AtomicU64>,
    ctrl_current_bits: Arc<AtomicU64>,
    bias_short: Arc<AtomicBool>,
    ctrl_short: Arc<AtomicBool>,
    read_delay: Duration,
    dropout: f64,
}

impl Default for SimBench {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl SimBench {
    /// `read_delay` emulates the power meter's measurement time.
    pub fn new(read_delay: Duration) -> Self {
        Self {
            voltage_bits: Arc::new(AtomicU64::new(0f64.to_bits())),
            ctrl_current_bits: Arc::new(AtomicU64::new(0f64.to_bits())),
            bias_short: Arc::new(AtomicBool::new(false)),
            ctrl_short: Arc::new(AtomicBool::new(false)),
            read_delay,
            dropout: DROPOUT_PROBABILITY,
        }
    }

    /// Probability that a power read comes back empty.
    #[cfg(test)]
    pub fn with_dropout(mut self, p: f64) -> Self {
        self.dropout = p.clamp(0.0, 1.0);
        self
    }

    pub fn voltage(&self) -> f64 {
        f64::from_bits(self.voltage_bits.load(Ordering::Acquire))
    }

    fn set_voltage(&self, volts: f64) {
        self.voltage_bits.store(volts.to_bits(), Ordering::Release);
    }

    /// What the junction sees: a shorted bias line pins it to zero.
    fn junction_voltage(&self) -> f64 {
        if self.bias_short.load(Ordering::Acquire) {
            0.0
        } else {
            self.voltage()
        }
    }

    /// A shorted CTRL line carries no current.
    fn ctrl_current(&self) -> f64 {
        if self.ctrl_short.load(Ordering::Acquire) {
            0.0
        } else {
            f64::from_bits(self.ctrl_current_bits.load(Ordering::Acquire))
        }
    }

    pub fn bias_source(&self) -> SimBlock {
        SimBlock {
            bench: self.clone(),
        }
    }

    pub fn power_meter(&self) -> SimPowerMeter {
        SimPowerMeter {
            bench: self.clone(),
        }
    }
}

pub fn junction_current(volts: f64) -> f64 {
    if volts.abs() > GAP_VOLTAGE {
        volts / NORMAL_RESISTANCE
    } else {
        volts / (NORMAL_RESISTANCE * SUBGAP_RATIO)
    }
}

pub fn detected_power_dbm(volts: f64) -> f64 {
    let step_mv = volts.abs() * 1e3 - 2.0;
    -35.0 + 6.0 * (-(step_mv / 0.6).powi(2)).exp()
}

pub struct SimBlock {
    bench: SimBench,
}

impl BiasSource for SimBlock {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn bias_voltage(&mut self) -> Option<f64> {
        let noise = rand::thread_rng().gen_range(-2e-6..2e-6);
        Some(self.bench.junction_voltage() + noise)
    }

    fn set_bias_voltage(&mut self, volts: f64) -> Result<(), InstrumentError> {
        self.bench.set_voltage(volts);
        Ok(())
    }

    fn bias_current(&mut self) -> Option<f64> {
        let noise = rand::thread_rng().gen_range(-1e-7..1e-7);
        Some(junction_current(self.bench.junction_voltage()) + noise)
    }
}

impl BlockControl for SimBlock {
    fn bias_short(&mut self) -> Result<bool, InstrumentError> {
        Ok(self.bench.bias_short.load(Ordering::Acquire))
    }

    fn set_bias_short(&mut self, shorted: bool) -> Result<String, InstrumentError> {
        self.bench.bias_short.store(shorted, Ordering::Release);
        Ok("OK".to_owned())
    }

    fn ctrl_short(&mut self) -> Result<bool, InstrumentError> {
        Ok(self.bench.ctrl_short.load(Ordering::Acquire))
    }

    fn set_ctrl_short(&mut self, shorted: bool) -> Result<String, InstrumentError> {
        self.bench.ctrl_short.store(shorted, Ordering::Release);
        Ok("OK".to_owned())
    }

    fn bias_data(&mut self) -> Result<String, InstrumentError> {
        let v = self.bench.junction_voltage();
        Ok(format!(
            "V={:.6e} I={:.6e} SHORT={}",
            v,
            junction_current(v),
            u8::from(self.bench.bias_short.load(Ordering::Acquire))
        ))
    }

    fn ctrl_data(&mut self) -> Result<String, InstrumentError> {
        Ok(format!(
            "I={:.6e} SHORT={}",
            self.bench.ctrl_current(),
            u8::from(self.bench.ctrl_short.load(Ordering::Acquire))
        ))
    }

    fn ctrl_current(&mut self) -> Option<f64> {
        Some(self.bench.ctrl_current())
    }

    fn set_ctrl_current(&mut self, amps: f64) -> Result<String, InstrumentError> {
        self.bench
            .ctrl_current_bits
            .store(amps.to_bits(), Ordering::Release);
        Ok("OK".to_owned())
    }

    fn test(&mut self) -> Result<bool, InstrumentError> {
        Ok(true)
    }
}

pub struct SimPowerMeter {
    bench: SimBench,
}

impl PowerMeter for SimPowerMeter {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn power(&mut self) -> Option<f64> {
        thread::sleep(self.bench.read_delay);
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.bench.dropout) {
            return None;
        }
        Some(detected_power_dbm(self.bench.voltage()) + rng.gen_range(-0.05..0.05))
    }
}
