// src/instruments/mod.rs
//! Instrument clients and the capability traits the acquisition loops drive.
//!
//! Getters return `None` when the instrument had no reading to give; the
//! loops treat that as a transient condition, never as an error.

pub mod block;
pub mod nrx;
pub mod scpi;
pub mod sim;
pub mod vna;

use crate::config::AppConfig;
use crate::error::InstrumentError;
use crate::types::ConnectionMode;

pub use block::Block;
pub use nrx::Nrx;
pub use sim::SimBench;
pub use vna::Vna;

pub trait PowerMeter: Send {
    fn connect(&mut self) -> Result<(), InstrumentError>;
    /// dBm
    fn power(&mut self) -> Option<f64>;
}

pub trait BiasSource: Send {
    fn connect(&mut self) -> Result<(), InstrumentError>;
    /// Volts.
    fn bias_voltage(&mut self) -> Option<f64>;
    fn set_bias_voltage(&mut self, volts: f64) -> Result<(), InstrumentError>;
    /// Amperes.
    fn bias_current(&mut self) -> Option<f64>;
}

/// The Block's housekeeping commands beyond biasing: shorts, the CTRL
/// (magnet) current, raw data blocks and the device self test.
pub trait BlockControl: BiasSource {
    fn bias_short(&mut self) -> Result<bool, InstrumentError>;
    fn set_bias_short(&mut self, shorted: bool) -> Result<String, InstrumentError>;
    fn ctrl_short(&mut self) -> Result<bool, InstrumentError>;
    fn set_ctrl_short(&mut self, shorted: bool) -> Result<String, InstrumentError>;
    fn bias_data(&mut self) -> Result<String, InstrumentError>;
    fn ctrl_data(&mut self) -> Result<String, InstrumentError>;
    /// Amperes.
    fn ctrl_current(&mut self) -> Option<f64>;
    fn set_ctrl_current(&mut self, amps: f64) -> Result<String, InstrumentError>;
    /// `true` only when both devices report healthy.
    fn test(&mut self) -> Result<bool, InstrumentError>;
}

impl<T: PowerMeter + ?Sized> PowerMeter for Box<T> {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        (**self).connect()
    }
    fn power(&mut self) -> Option<f64> {
        (**self).power()
    }
}

impl<T: BiasSource + ?Sized> BiasSource for Box<T> {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        (**self).connect()
    }
    fn bias_voltage(&mut self) -> Option<f64> {
        (**self).bias_voltage()
    }
    fn set_bias_voltage(&mut self, volts: f64) -> Result<(), InstrumentError> {
        (**self).set_bias_voltage(volts)
    }
    fn bias_current(&mut self) -> Option<f64> {
        (**self).bias_current()
    }
}

/// Builds unconnected clients for the configured mode. Simulated clients
/// share `bench`, so the simulated power follows the simulated bias.
#[derive(Clone)]
pub struct InstrumentFactory {
    mode: ConnectionMode,
    bench: SimBench,
}

impl InstrumentFactory {
    pub fn new(mode: ConnectionMode, bench: SimBench) -> Self {
        Self { mode, bench }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn power_meter(&self, cfg: &AppConfig) -> Box<dyn PowerMeter> {
        match self.mode {
            ConnectionMode::Hardware => Box::new(Nrx::new(cfg.nrx.clone())),
            ConnectionMode::Simulation => Box::new(self.bench.power_meter()),
        }
    }

    pub fn bias_source(&self, cfg: &AppConfig) -> Box<dyn BiasSource> {
        match self.mode {
            ConnectionMode::Hardware => Box::new(Block::new(cfg.block.clone())),
            ConnectionMode::Simulation => Box::new(self.bench.bias_source()),
        }
    }

    pub fn block_control(&self, cfg: &AppConfig) -> Box<dyn BlockControl> {
        match self.mode {
            ConnectionMode::Hardware => Box::new(Block::new(cfg.block.clone())),
            ConnectionMode::Simulation => Box::new(self.bench.bias_source()),
        }
    }
}
