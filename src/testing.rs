// src/testing.rs
//! Test doubles shared by the unit tests.
use crate::engine::{Clock, RunGate};
use crate::error::InstrumentError;
use crate::instruments::{BiasSource, PowerMeter};
use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Virtual time: `sleep` advances `now` instantly and is recorded.
pub struct FakeClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn sleep(&self, d: Duration) {
        *self.offset.lock().unwrap() += d;
        self.sleeps.lock().unwrap().push(d);
    }
}

/// Replays a fixed list of readings, then repeats `fallback`.
pub struct ScriptedMeter {
    script: VecDeque<Option<f64>>,
    fallback: Option<f64>,
    stop_when_done: Option<RunGate>,
    polls: usize,
}

impl ScriptedMeter {
    pub fn new<I: IntoIterator<Item = Option<f64>>>(script: I) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: None,
            stop_when_done: None,
            polls: 0,
        }
    }

    pub fn constant(power: f64) -> Self {
        Self {
            fallback: Some(power),
            ..Self::new(Vec::<Option<f64>>::new())
        }
    }

    /// Closes `gate` as the last scripted reading is handed out.
    pub fn stop_when_done(mut self, gate: &RunGate) -> Self {
        self.stop_when_done = Some(gate.clone());
        self
    }

    pub fn polls(&self) -> usize {
        self.polls
    }
}

impl PowerMeter for ScriptedMeter {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn power(&mut self) -> Option<f64> {
        self.polls += 1;
        let reading = match self.script.pop_front() {
            Some(r) => r,
            None => return self.fallback,
        };
        if self.script.is_empty() {
            if let Some(gate) = &self.stop_when_done {
                gate.stop();
            }
        }
        reading
    }
}

pub struct FailingMeter;

impl PowerMeter for FailingMeter {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        Err(InstrumentError::Address("nowhere:0".to_owned()))
    }

    fn power(&mut self) -> Option<f64> {
        None
    }
}

/// Bias source whose readback echoes the last setpoint. Readbacks can be made
/// to fail after the n-th `set_bias_voltage` call (0 = before any set).
pub struct ScriptedBias {
    setpoint: f64,
    sets: Arc<Mutex<Vec<f64>>>,
    no_voltage_after: HashSet<usize>,
    no_current_after: HashSet<usize>,
    stop_after: Option<(usize, RunGate)>,
}

impl ScriptedBias {
    pub fn new(initial: f64) -> Self {
        Self {
            setpoint: initial,
            sets: Arc::new(Mutex::new(Vec::new())),
            no_voltage_after: HashSet::new(),
            no_current_after: HashSet::new(),
            stop_after: None,
        }
    }

    pub fn unreadable_voltage_after_set(mut self, n: usize) -> Self {
        self.no_voltage_after.insert(n);
        self
    }

    pub fn unreadable_current_after_set(mut self, n: usize) -> Self {
        self.no_current_after.insert(n);
        self
    }

    /// Closes `gate` once `n` setpoints have been written.
    pub fn stop_after_sets(mut self, n: usize, gate: &RunGate) -> Self {
        if n == 0 {
            gate.stop();
        }
        self.stop_after = Some((n, gate.clone()));
        self
    }

    pub fn sets(&self) -> Vec<f64> {
        self.sets.lock().unwrap().clone()
    }

    pub fn set_log(&self) -> Arc<Mutex<Vec<f64>>> {
        self.sets.clone()
    }

    fn set_count(&self) -> usize {
        self.sets.lock().unwrap().len()
    }
}

impl BiasSource for ScriptedBias {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn bias_voltage(&mut self) -> Option<f64> {
        if self.no_voltage_after.contains(&self.set_count()) {
            None
        } else {
            Some(self.setpoint)
        }
    }

    fn set_bias_voltage(&mut self, volts: f64) -> Result<(), InstrumentError> {
        self.setpoint = volts;
        let count = {
            let mut sets = self.sets.lock().unwrap();
            sets.push(volts);
            sets.len()
        };
        if let Some((n, gate)) = &self.stop_after {
            if count == *n {
                gate.stop();
            }
        }
        Ok(())
    }

    fn bias_current(&mut self) -> Option<f64> {
        if self.no_current_after.contains(&self.set_count()) {
            None
        } else {
            Some(self.setpoint / 15.0)
        }
    }
}

type Handler = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// Local TCP stand-in for an instrument. Each received command is recorded
/// and passed to the handler; `None` means "send nothing back".
pub struct Responder {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
}

impl Responder {
    /// Newline-terminated commands and replies.
    pub fn lines<F>(handler: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        Self::spawn(true, Box::new(handler))
    }

    /// One read per command, reply written as-is.
    pub fn packets<F>(handler: F) -> Self
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        Self::spawn(false, Box::new(handler))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    fn spawn(line_mode: bool, mut handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve(stream, line_mode, &mut handler, &log);
            }
        });
        Self { port, received }
    }
}

fn serve(stream: TcpStream, line_mode: bool, handler: &mut Handler, log: &Mutex<Vec<String>>) {
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };
    let mut reader = BufReader::new(stream);
    loop {
        let cmd = if line_mode {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => line.trim_end().to_owned(),
            }
        } else {
            let mut buf = [0u8; 1024];
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => String::from_utf8_lossy(&buf[..n]).into_owned(),
            }
        };
        log.lock().unwrap().push(cmd.clone());
        if let Some(reply) = handler(&cmd) {
            let framed = if line_mode { format!("{reply}\n") } else { reply };
            if writer.write_all(framed.as_bytes()).is_err() {
                return;
            }
        }
    }
}
