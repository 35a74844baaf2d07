// src/sweep.rs
use crate::config::SweepConfig;
use crate::engine::{Clock, RunGate};
use crate::error::EngineError;
use crate::instruments::{BiasSource, PowerMeter};
use crate::types::{AcqMessage, LoopKind, SweepIncrement, SweepPoint, SweepResult};
use log::{debug, error, info, warn};
use ndarray::Array1;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Extra pause before the first point; the time origin is reset after it.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq)]
pub struct SweepParams {
    /// Volts.
    pub voltage_from: f64,
    /// Volts.
    pub voltage_to: f64,
    pub points: usize,
    pub step_delay: Duration,
}

impl SweepParams {
    pub fn new(
        voltage_from: f64,
        voltage_to: f64,
        points: usize,
        step_delay_s: f64,
    ) -> Result<Self, EngineError> {
        if points == 0 {
            return Err(EngineError::InvalidSweep("point count must be at least 1".into()));
        }
        if !voltage_from.is_finite() || !voltage_to.is_finite() {
            return Err(EngineError::InvalidSweep("voltage bounds must be finite".into()));
        }
        if !step_delay_s.is_finite() || step_delay_s < 0.0 {
            return Err(EngineError::InvalidSweep(format!(
                "step delay must be >= 0 s, got {step_delay_s}"
            )));
        }
        Ok(Self {
            voltage_from,
            voltage_to,
            points,
            step_delay: Duration::from_secs_f64(step_delay_s),
        })
    }

    /// The GUI edits bounds in mV; the instrument takes volts.
    pub fn from_config(cfg: &SweepConfig) -> Result<Self, EngineError> {
        Self::new(
            cfg.volt_from_mv * 1e-3,
            cfg.volt_to_mv * 1e-3,
            cfg.points,
            cfg.step_delay_s,
        )
    }

    pub fn targets(&self) -> Vec<f64> {
        voltage_targets(self.voltage_from, self.voltage_to, self.points)
    }
}

/// `points` evenly spaced values over `[from, to]`, both ends included.
/// A single point is just `from`.
pub fn voltage_targets(from: f64, to: f64, points: usize) -> Vec<f64> {
    let mut targets = Array1::linspace(from, to, points).to_vec();
    // linspace accumulates `from + i * step`; pin the end exactly.
    if points > 1 {
        if let Some(last) = targets.last_mut() {
            *last = to;
        }
    }
    targets
}

/// Steps the bias through `params.targets()` and records voltage, current
/// and power at each step.
///
/// A point whose voltage, current or power cannot be read is dropped; the
/// sweep carries on. The original bias is written back exactly once after the
/// loop, however it ended. Emits one `SweepIncrement` per recorded point, then
/// `SweepComplete` and `Finished`.
pub fn run_bias_sweep<B, M, C>(
    bias: &mut B,
    meter: &mut M,
    gate: &RunGate,
    clock: &C,
    params: &SweepParams,
    tx: &Sender<AcqMessage>,
) -> SweepResult
where
    B: BiasSource + ?Sized,
    M: PowerMeter + ?Sized,
    C: Clock + ?Sized,
{
    let targets = params.targets();
    let mut result = SweepResult::default();

    let original = bias.bias_voltage();
    if original.is_none() {
        warn!("[sweep] original bias unreadable, it will not be restored");
    }
    let mut origin = clock.now();

    for (i, &voltage_set) in targets.iter().enumerate() {
        if !gate.is_running() {
            info!("[sweep] stopped before point {i}/{}", targets.len());
            break;
        }
        if i == 0 {
            clock.sleep(SETTLE_DELAY);
            origin = clock.now();
        }

        if let Err(e) = bias.set_bias_voltage(voltage_set) {
            warn!("[sweep] point {i}: {e}");
        }
        clock.sleep(params.step_delay);

        let Some(voltage_get) = bias.bias_voltage() else {
            debug!("[sweep] point {i}: voltage unreadable, skipped");
            continue;
        };
        let Some(current_get) = bias.bias_current() else {
            debug!("[sweep] point {i}: current unreadable, skipped");
            continue;
        };
        let Some(power) = meter.power() else {
            debug!("[sweep] point {i}: power unreadable, skipped");
            continue;
        };
        let elapsed_s = clock.now().duration_since(origin).as_secs_f64();

        tx.send(AcqMessage::SweepIncrement(SweepIncrement {
            x: vec![voltage_get * 1e3],
            y: vec![power],
            new_plot: result.is_empty(),
        }))
        .ok();

        result.push(SweepPoint {
            voltage_set,
            voltage_get,
            current_get,
            power,
            elapsed_s,
        });
    }

    if let Some(v) = original {
        match bias.set_bias_voltage(v) {
            Ok(()) => info!("[sweep] bias restored to {v} V"),
            Err(e) => error!("[sweep] failed to restore bias {v} V: {e}"),
        }
    }
    gate.stop();

    info!(
        "[sweep] recorded {} of {} points",
        result.len(),
        targets.len()
    );
    tx.send(AcqMessage::SweepComplete(result.clone())).ok();
    tx.send(AcqMessage::Finished(LoopKind::BiasSweep)).ok();
    result
}

/// Thread body: connect both instruments, then sweep. A connection failure
/// ends the loop before the bias is touched.
pub fn sweep_worker<B, M, C>(
    mut bias: B,
    mut meter: M,
    gate: RunGate,
    clock: C,
    params: SweepParams,
    tx: Sender<AcqMessage>,
) where
    B: BiasSource,
    M: PowerMeter,
    C: Clock,
{
    let connected = bias.connect().and_then(|_| meter.connect());
    if let Err(e) = connected {
        warn!("[sweep] connect failed: {e}");
        gate.stop();
        tx.send(AcqMessage::Failed(LoopKind::BiasSweep, e.to_string()))
            .ok();
        tx.send(AcqMessage::Finished(LoopKind::BiasSweep)).ok();
        return;
    }
    run_bias_sweep(&mut bias, &mut meter, &gate, &clock, &params, &tx);
}
