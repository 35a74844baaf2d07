// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub enum ConnectionMode {
    #[default]
    Simulation,
    Hardware,
}

/// Physical instruments on the bench. Used as lease keys and status tags.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Instrument {
    Block,
    Nrx,
    Vna,
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Instrument::Block => "Block",
            Instrument::Nrx => "NRX",
            Instrument::Vna => "VNA",
        };
        f.write_str(name)
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum LoopKind {
    PowerStream,
    BiasSweep,
}

impl LoopKind {
    pub fn label(&self) -> &'static str {
        match self {
            LoopKind::PowerStream => "power stream",
            LoopKind::BiasSweep => "bias-power sweep",
        }
    }
}

/// One power reading from the stream loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// dBm
    pub power: f64,
    /// Seconds since the stream started.
    pub elapsed_s: f64,
    /// First emitted sample of this stream; plots reset on it.
    pub is_first: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPoint {
    pub voltage_set: f64,
    pub voltage_get: f64,
    pub current_get: f64,
    pub power: f64,
    pub elapsed_s: f64,
}

/// Column-oriented sweep record. All five vectors always have the same length
/// and are ordered by sweep index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepResult {
    pub voltage_set: Vec<f64>,
    pub voltage_get: Vec<f64>,
    pub current_get: Vec<f64>,
    pub power: Vec<f64>,
    pub time: Vec<f64>,
}

impl SweepResult {
    pub fn push(&mut self, point: SweepPoint) {
        self.voltage_set.push(point.voltage_set);
        self.voltage_get.push(point.voltage_get);
        self.current_get.push(point.current_get);
        self.power.push(point.power);
        self.time.push(point.elapsed_s);
    }

    pub fn len(&self) -> usize {
        self.voltage_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage_set.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = SweepPoint> + '_ {
        (0..self.len()).map(move |i| SweepPoint {
            voltage_set: self.voltage_set[i],
            voltage_get: self.voltage_get[i],
            current_get: self.current_get[i],
            power: self.power[i],
            elapsed_s: self.time[i],
        })
    }
}

impl FromIterator<SweepPoint> for SweepResult {
    fn from_iter<I: IntoIterator<Item = SweepPoint>>(iter: I) -> Self {
        let mut result = SweepResult::default();
        for p in iter {
            result.push(p);
        }
        result
    }
}

/// Live plot update from the sweep: voltage in mV against power in dBm.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepIncrement {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub new_plot: bool,
}

/// Everything a worker thread can tell the GUI.
#[derive(Clone, Debug)]
pub enum AcqMessage {
    StreamSample(Sample),
    SweepIncrement(SweepIncrement),
    SweepComplete(SweepResult),
    /// Loop could not run (e.g. instrument unreachable). Always followed by `Finished`.
    Failed(LoopKind, String),
    Finished(LoopKind),
    /// Result of a one-off instrument check.
    Status(Instrument, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(v: f64) -> SweepPoint {
        SweepPoint {
            voltage_set: v,
            voltage_get: v + 0.001,
            current_get: v * 2.0,
            power: -30.0 + v,
            elapsed_s: v * 10.0,
        }
    }

    #[test]
    fn sweep_result_columns_stay_aligned() {
        let result: SweepResult = [1.0, 2.0, 3.0].into_iter().map(point).collect();
        assert_eq!(result.len(), 3);
        assert_eq!(result.voltage_get.len(), 3);
        assert_eq!(result.time, vec![10.0, 20.0, 30.0]);
        let back: Vec<SweepPoint> = result.points().collect();
        assert_eq!(back[1], point(2.0));
    }

    #[test]
    fn empty_result() {
        let result = SweepResult::default();
        assert!(result.is_empty());
        assert_eq!(result.points().count(), 0);
    }
}
