// src/engine.rs
use crate::config::AppConfig;
use crate::error::{EngineError, InstrumentError};
use crate::instruments::{BiasSource, BlockControl, InstrumentFactory, SimBench, Vna};
use crate::stream::{stream_worker, StreamSettings};
use crate::sweep::{sweep_worker, SweepParams};
use crate::types::*;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// =========================================================================
// 1. Time source
// =========================================================================

/// Where the loops read time and block. Real threads use `SystemClock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

// =========================================================================
// 2. Run gate: the only cancellation signal a loop sees
// =========================================================================

#[derive(Clone, Debug, Default)]
pub struct RunGate(Arc<AtomicBool>);

impl RunGate {
    pub fn started() -> Self {
        let gate = Self::default();
        gate.start();
        gate
    }

    pub fn start(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// =========================================================================
// 3. Instrument leases
// =========================================================================

/// One owner per instrument at a time. A claim is all-or-nothing.
#[derive(Clone, Default)]
pub struct InstrumentLocks {
    held: Arc<Mutex<HashSet<Instrument>>>,
}

impl InstrumentLocks {
    pub fn try_claim(&self, wanted: &[Instrument]) -> Result<Lease, EngineError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(busy) = wanted.iter().find(|i| held.contains(i)) {
            return Err(EngineError::Busy(*busy));
        }
        held.extend(wanted.iter().copied());
        Ok(Lease {
            locks: self.clone(),
            instruments: wanted.to_vec(),
        })
    }

    #[cfg(test)]
    pub fn is_held(&self, instrument: Instrument) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&instrument)
    }
}

/// Released on drop.
pub struct Lease {
    locks: InstrumentLocks,
    instruments: Vec<Instrument>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for i in &self.instruments {
            held.remove(i);
        }
    }
}

// =========================================================================
// 4. Running loops
// =========================================================================

/// GUI side of one worker thread. Dropping the handle closes its gate.
pub struct LoopHandle {
    kind: LoopKind,
    gate: RunGate,
    rx: Receiver<AcqMessage>,
    thread: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub fn stop(&self) {
        info!("Stop requested for {}", self.kind.label());
        self.gate.stop();
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    /// Everything sent since the last call, in send order.
    pub fn drain(&self) -> Vec<AcqMessage> {
        self.rx.try_iter().collect()
    }

    pub fn join(mut self) -> Vec<AcqMessage> {
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                warn!("{} worker panicked", self.kind.label());
            }
        }
        self.drain()
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.gate.stop();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BlockAction {
    /// Health check: BIAS data block.
    BiasData,
    CtrlData,
    SelfTest,
    SetBiasShort(bool),
    SetCtrlShort(bool),
    /// Amperes.
    SetCtrlCurrent(f64),
    ReadCtrlCurrent,
}

impl BlockAction {
    pub fn label(&self) -> &'static str {
        match self {
            BlockAction::BiasData => "bias data",
            BlockAction::CtrlData => "ctrl data",
            BlockAction::SelfTest => "self test",
            BlockAction::SetBiasShort(_) => "bias short",
            BlockAction::SetCtrlShort(_) => "ctrl short",
            BlockAction::SetCtrlCurrent(_) => "set ctrl current",
            BlockAction::ReadCtrlCurrent => "ctrl current",
        }
    }

    fn run<B: BlockControl + ?Sized>(self, block: &mut B) -> Result<String, InstrumentError> {
        match self {
            BlockAction::BiasData => block.bias_data(),
            BlockAction::CtrlData => block.ctrl_data(),
            BlockAction::SelfTest => Ok(if block.test()? { "OK" } else { "ERROR" }.to_owned()),
            BlockAction::SetBiasShort(on) => {
                block.set_bias_short(on)?;
                Ok(format!("bias short = {}", u8::from(block.bias_short()?)))
            }
            BlockAction::SetCtrlShort(on) => {
                block.set_ctrl_short(on)?;
                Ok(format!("ctrl short = {}", u8::from(block.ctrl_short()?)))
            }
            BlockAction::SetCtrlCurrent(amps) => block.set_ctrl_current(amps),
            BlockAction::ReadCtrlCurrent => Ok(match block.ctrl_current() {
                Some(i) => format!("{:.4} mA", i * 1e3),
                None => "ctrl current unreadable".to_owned(),
            }),
        }
    }
}

pub struct Engine {
    factory: InstrumentFactory,
    locks: InstrumentLocks,
    status_tx: Sender<AcqMessage>,
    status_rx: Receiver<AcqMessage>,
}

impl Engine {
    pub fn new(mode: ConnectionMode, bench: SimBench) -> Self {
        let (status_tx, status_rx) = channel();
        Self {
            factory: InstrumentFactory::new(mode, bench),
            locks: InstrumentLocks::default(),
            status_tx,
            status_rx,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.factory.mode()
    }

    #[cfg(test)]
    pub fn locks(&self) -> &InstrumentLocks {
        &self.locks
    }

    /// Results of one-off checks.
    pub fn drain_status(&self) -> Vec<AcqMessage> {
        self.status_rx.try_iter().collect()
    }

    pub fn spawn_power_stream(&self, cfg: &AppConfig) -> Result<LoopHandle, EngineError> {
        let lease = self.locks.try_claim(&[Instrument::Nrx])?;
        let meter = self.factory.power_meter(cfg);
        let settings = StreamSettings::from_config(&cfg.stream);
        info!("Starting power stream ({:?})", self.mode());

        spawn_loop(LoopKind::PowerStream, "nrx-stream", move |gate, tx| {
            let _lease = lease;
            stream_worker(meter, gate, SystemClock, settings, tx);
        })
    }

    pub fn spawn_bias_sweep(&self, cfg: &AppConfig) -> Result<LoopHandle, EngineError> {
        let params = SweepParams::from_config(&cfg.sweep)?;
        let lease = self
            .locks
            .try_claim(&[Instrument::Block, Instrument::Nrx])?;
        let bias = self.factory.bias_source(cfg);
        let meter = self.factory.power_meter(cfg);
        info!(
            "Starting bias sweep {} -> {} V, {} points ({:?})",
            params.voltage_from,
            params.voltage_to,
            params.points,
            self.mode()
        );

        spawn_loop(LoopKind::BiasSweep, "bias-sweep", move |gate, tx| {
            let _lease = lease;
            sweep_worker(bias, meter, gate, SystemClock, params, tx);
        })
    }

    /// Runs one Block command off the GUI thread; the outcome arrives as
    /// `Status(Block, ..)` via `drain_status`.
    pub fn block_action(&self, cfg: &AppConfig, action: BlockAction) -> Result<(), EngineError> {
        let lease = self.locks.try_claim(&[Instrument::Block])?;
        let tx = self.status_tx.clone();
        let mut block = self.factory.block_control(cfg);

        spawn_task("block-action", move || {
            let _lease = lease;
            let text = match block.connect().and_then(|_| action.run(block.as_mut())) {
                Ok(reply) => reply,
                Err(e) => format!("Error: {e}"),
            };
            info!("Block {}: {text}", action.label());
            tx.send(AcqMessage::Status(Instrument::Block, text)).ok();
        })
    }

    pub fn test_vna(&self, cfg: &AppConfig) -> Result<(), EngineError> {
        let lease = self.locks.try_claim(&[Instrument::Vna])?;
        let tx = self.status_tx.clone();
        let mode = self.mode();
        let vna_cfg = cfg.vna.clone();

        spawn_task("vna-test", move || {
            let _lease = lease;
            let text = match mode {
                ConnectionMode::Hardware => Vna::new(vna_cfg).test().label().to_owned(),
                ConnectionMode::Simulation => "Test passed (simulated)".to_owned(),
            };
            info!("VNA test: {text}");
            tx.send(AcqMessage::Status(Instrument::Vna, text)).ok();
        })
    }
}

fn spawn_loop<F>(kind: LoopKind, name: &str, body: F) -> Result<LoopHandle, EngineError>
where
    F: FnOnce(RunGate, Sender<AcqMessage>) + Send + 'static,
{
    let gate = RunGate::started();
    let (tx, rx) = channel();
    let worker_gate = gate.clone();
    let thread = thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || body(worker_gate, tx))
        .map_err(|e| {
            gate.stop();
            EngineError::Spawn(e)
        })?;
    Ok(LoopHandle {
        kind,
        gate,
        rx,
        thread: Some(thread),
    })
}

fn spawn_task<F>(name: &str, body: F) -> Result<(), EngineError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(body)
        .map(|_| ())
        .map_err(EngineError::Spawn)
}
