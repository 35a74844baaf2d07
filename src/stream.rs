// src/stream.rs
use crate::config::StreamConfig;
use crate::engine::{Clock, RunGate};
use crate::instruments::PowerMeter;
use crate::types::{AcqMessage, LoopKind, Sample};
use log::{debug, info, warn};
use std::sync::mpsc::Sender;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamSettings {
    /// Back-off after an empty reading.
    pub retry_delay: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl StreamSettings {
    pub fn from_config(cfg: &StreamConfig) -> Self {
        let secs = if cfg.retry_delay_s.is_finite() {
            cfg.retry_delay_s.max(0.0)
        } else {
            2.0
        };
        Self {
            retry_delay: Duration::from_secs_f64(secs),
        }
    }
}

/// Polls power until `gate` closes. Returns the number of samples emitted.
///
/// Empty readings sleep `retry_delay` and are never emitted, so the first
/// emitted sample is always the one flagged `is_first`. The gate is checked
/// once per poll: stopping takes effect after the in-flight read (and its
/// back-off, if any) completes.
pub fn run_power_stream<M, C>(
    meter: &mut M,
    gate: &RunGate,
    clock: &C,
    settings: &StreamSettings,
    tx: &Sender<AcqMessage>,
) -> usize
where
    M: PowerMeter + ?Sized,
    C: Clock + ?Sized,
{
    let start = clock.now();
    let mut index = 0usize;

    while gate.is_running() {
        let Some(power) = meter.power() else {
            debug!("[stream] no reading, retrying in {:?}", settings.retry_delay);
            clock.sleep(settings.retry_delay);
            continue;
        };
        let sample = Sample {
            power,
            elapsed_s: clock.now().duration_since(start).as_secs_f64(),
            is_first: index == 0,
        };
        if tx.send(AcqMessage::StreamSample(sample)).is_err() {
            warn!("[stream] receiver dropped, stopping");
            break;
        }
        index += 1;
    }

    gate.stop();
    info!("[stream] finished after {index} samples");
    tx.send(AcqMessage::Finished(LoopKind::PowerStream)).ok();
    index
}

/// Thread body: connect, then stream. A connection failure ends the loop.
pub fn stream_worker<M, C>(
    mut meter: M,
    gate: RunGate,
    clock: C,
    settings: StreamSettings,
    tx: Sender<AcqMessage>,
) where
    M: PowerMeter,
    C: Clock,
{
    if let Err(e) = meter.connect() {
        warn!("[stream] power meter connect failed: {e}");
        gate.stop();
        tx.send(AcqMessage::Failed(LoopKind::PowerStream, e.to_string()))
            .ok();
        tx.send(AcqMessage::Finished(LoopKind::PowerStream)).ok();
        return;
    }
    run_power_stream(&mut meter, &gate, &clock, &settings, &tx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingMeter, FakeClock, ScriptedMeter};
    use std::sync::mpsc::channel;

    fn samples(msgs: &[AcqMessage]) -> Vec<Sample> {
        msgs.iter()
            .filter_map(|m| match m {
                AcqMessage::StreamSample(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_readings_back_off_without_emitting() {
        let gate = RunGate::started();
        let clock = FakeClock::new();
        let mut meter = ScriptedMeter::new([None, None, Some(5.0), Some(6.0)]).stop_when_done(&gate);
        let (tx, rx) = channel();

        let n = run_power_stream(&mut meter, &gate, &clock, &StreamSettings::default(), &tx);
        let msgs: Vec<AcqMessage> = rx.try_iter().collect();

        assert_eq!(n, 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 2]);
        let got = samples(&msgs);
        assert_eq!(got.iter().map(|s| s.power).collect::<Vec<_>>(), vec![5.0, 6.0]);
        assert_eq!(got.iter().map(|s| s.is_first).collect::<Vec<_>>(), vec![true, false]);
        // Both back-offs happened before the first sample.
        assert_eq!(got[0].elapsed_s, 4.0);
        assert!(matches!(msgs.last(), Some(AcqMessage::Finished(LoopKind::PowerStream))));
    }

    #[test]
    fn closed_gate_emits_only_finished() {
        let gate = RunGate::default();
        let clock = FakeClock::new();
        let mut meter = ScriptedMeter::new([Some(1.0)]);
        let (tx, rx) = channel();

        assert_eq!(run_power_stream(&mut meter, &gate, &clock, &StreamSettings::default(), &tx), 0);
        let msgs: Vec<AcqMessage> = rx.try_iter().collect();
        assert_eq!(msgs.len(), 1);
        assert!(matches!(msgs[0], AcqMessage::Finished(LoopKind::PowerStream)));
        assert_eq!(meter.polls(), 0);
    }

    #[test]
    fn loop_clears_its_gate_when_receiver_is_gone() {
        let gate = RunGate::started();
        let clock = FakeClock::new();
        let mut meter = ScriptedMeter::new([Some(1.0), Some(2.0)]);
        let (tx, rx) = channel();
        drop(rx);

        run_power_stream(&mut meter, &gate, &clock, &StreamSettings::default(), &tx);
        assert!(!gate.is_running());
        assert_eq!(meter.polls(), 1);
    }

    #[test]
    fn connect_failure_reports_and_finishes() {
        let gate = RunGate::started();
        let (tx, rx) = channel();
        stream_worker(FailingMeter, gate.clone(), FakeClock::new(), StreamSettings::default(), tx);

        let msgs: Vec<AcqMessage> = rx.try_iter().collect();
        assert!(matches!(msgs[0], AcqMessage::Failed(LoopKind::PowerStream, _)));
        assert!(matches!(msgs[1], AcqMessage::Finished(LoopKind::PowerStream)));
        assert!(!gate.is_running());
    }

    #[test]
    fn retry_delay_from_config() {
        let cfg = StreamConfig {
            retry_delay_s: 0.5,
            ..StreamConfig::default()
        };
        assert_eq!(
            StreamSettings::from_config(&cfg).retry_delay,
            Duration::from_millis(500)
        );
    }
}
