// src/instruments/block.rs
use super::scpi::{parse_number, Framing, ScpiLink};
use super::{BiasSource, BlockControl};
use crate::config::BlockConfig;
use crate::error::InstrumentError;
use crate::types::Instrument;
use log::{debug, error, info, warn};
use std::thread;
use std::time::Duration;

const MAX_ATTEMPTS: usize = 5;
const READ_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Scontel SIS bias block: one BIAS device and one CTRL device behind a
/// single TCP port speaking raw ASCII commands.
pub struct Block {
    cfg: BlockConfig,
    link: Option<ScpiLink>,
    retry_pause: Duration,
}

impl Block {
    pub fn new(cfg: BlockConfig) -> Self {
        Self {
            cfg,
            link: None,
            retry_pause: READ_RETRY_PAUSE,
        }
    }

    /// Pause between numeric read retries (2 s by default).
    #[cfg(test)]
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Sends one command, retrying on i/o errors and `ERROR` replies.
    pub fn manipulate(&mut self, cmd: &str) -> Result<String, InstrumentError> {
        let link = self
            .link
            .as_mut()
            .ok_or(InstrumentError::NotConnected(Instrument::Block))?;
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match link.query(cmd) {
                Ok(reply) if reply.contains("ERROR") => {
                    error!("[Block] `{cmd}` returned `{reply}`; attempt {attempt}");
                    last_err = Some(InstrumentError::Rejected {
                        instrument: Instrument::Block,
                        command: cmd.to_owned(),
                        reply,
                    });
                }
                Ok(reply) => {
                    debug!("[Block] `{cmd}` -> `{reply}`; attempt {attempt}");
                    return Ok(reply);
                }
                Err(e) => {
                    error!("[Block] `{cmd}` failed: {e}; attempt {attempt}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(InstrumentError::NotConnected(Instrument::Block)))
    }

    fn read_number(&mut self, cmd: &str) -> Option<f64> {
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                thread::sleep(self.retry_pause);
            }
            match self.manipulate(cmd).and_then(|r| parse_number(&r)) {
                Ok(value) => {
                    debug!("[Block] `{cmd}` = {value}; attempt {attempt}");
                    return Some(value);
                }
                Err(e) => debug!("[Block] `{cmd}`: {e}; attempt {attempt}"),
            }
        }
        None
    }

    fn read_flag(&mut self, cmd: &str) -> Result<bool, InstrumentError> {
        let reply = self.manipulate(cmd)?;
        match reply.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            _ => Err(InstrumentError::BadReply(reply)),
        }
    }
}

impl BiasSource for Block {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        if self.link.is_none() {
            self.link = Some(ScpiLink::connect(
                &self.cfg.address,
                self.cfg.port,
                Framing::Packet,
            )?);
        }
        Ok(())
    }

    fn bias_voltage(&mut self) -> Option<f64> {
        let cmd = format!("BIAS:{}:VOLT?", self.cfg.bias_dev);
        self.read_number(&cmd)
    }

    fn set_bias_voltage(&mut self, volts: f64) -> Result<(), InstrumentError> {
        let cmd = format!("BIAS:{}:VOLT {volts}", self.cfg.bias_dev);
        let mut last = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.manipulate(&cmd) {
                Ok(status) if status == "OK" => {
                    debug!("[Block] bias set to {volts} V; attempt {attempt}");
                    return Ok(());
                }
                Ok(status) => {
                    warn!("[Block] unable to set {volts} V, got `{status}`; attempt {attempt}");
                    last = status;
                }
                Err(e) => {
                    warn!("[Block] unable to set {volts} V: {e}; attempt {attempt}");
                    last = e.to_string();
                }
            }
        }
        Err(InstrumentError::Rejected {
            instrument: Instrument::Block,
            command: cmd,
            reply: last,
        })
    }

    fn bias_current(&mut self) -> Option<f64> {
        let cmd = format!("BIAS:{}:CURR?", self.cfg.bias_dev);
        self.read_number(&cmd)
    }
}

impl BlockControl for Block {
    fn bias_short(&mut self) -> Result<bool, InstrumentError> {
        let cmd = format!("BIAS:{}:SHOR?", self.cfg.bias_dev);
        self.read_flag(&cmd)
    }

    fn set_bias_short(&mut self, shorted: bool) -> Result<String, InstrumentError> {
        let cmd = format!("BIAS:{}:SHOR {}", self.cfg.bias_dev, u8::from(shorted));
        self.manipulate(&cmd)
    }

    fn ctrl_short(&mut self) -> Result<bool, InstrumentError> {
        let cmd = format!("CTRL:{}:SHOR?", self.cfg.ctrl_dev);
        self.read_flag(&cmd)
    }

    fn set_ctrl_short(&mut self, shorted: bool) -> Result<String, InstrumentError> {
        let cmd = format!("CTRL:{}:SHOR {}", self.cfg.ctrl_dev, u8::from(shorted));
        self.manipulate(&cmd)
    }

    fn bias_data(&mut self) -> Result<String, InstrumentError> {
        let cmd = format!("BIAS:{}:DATA?", self.cfg.bias_dev);
        self.manipulate(&cmd)
    }

    fn ctrl_data(&mut self) -> Result<String, InstrumentError> {
        let cmd = format!("CTRL:{}:DATA?", self.cfg.ctrl_dev);
        self.manipulate(&cmd)
    }

    fn ctrl_current(&mut self) -> Option<f64> {
        let cmd = format!("CTRL:{}:CURR?", self.cfg.ctrl_dev);
        self.read_number(&cmd)
    }

    fn set_ctrl_current(&mut self, amps: f64) -> Result<String, InstrumentError> {
        let cmd = format!("CTRL:{}:CURR {amps}", self.cfg.ctrl_dev);
        self.manipulate(&cmd)
    }

    /// Both the BIAS and CTRL devices must answer `GEN:dev:STAT?` with `OK`.
    fn test(&mut self) -> Result<bool, InstrumentError> {
        let bias = self.manipulate(&format!("GEN:{}:STAT?", self.cfg.bias_dev))?;
        info!("[Block] bias test `{bias}`");
        let ctrl = self.manipulate(&format!("GEN:{}:STAT?", self.cfg.ctrl_dev))?;
        info!("[Block] ctrl test `{ctrl}`");
        Ok(bias == "OK" && ctrl == "OK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Responder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn block_on(port: u16) -> Block {
        let cfg = BlockConfig {
            address: "127.0.0.1".to_owned(),
            port,
            ..BlockConfig::default()
        };
        let mut block = Block::new(cfg).with_retry_pause(Duration::from_millis(1));
        block.connect().unwrap();
        block
    }

    #[test]
    fn reads_bias_voltage_and_current() {
        let responder = Responder::packets(|cmd| match cmd {
            "BIAS:DEV3:VOLT?" => Some("0.00251".to_owned()),
            "BIAS:DEV3:CURR?" => Some("1.2E-5\n".to_owned()),
            _ => Some("ERROR".to_owned()),
        });
        let mut block = block_on(responder.port());
        assert_eq!(block.bias_voltage(), Some(0.00251));
        assert_eq!(block.bias_current(), Some(1.2e-5));
    }

    #[test]
    fn error_replies_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let responder = Responder::packets(move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            Some(if n < 2 { "ERROR 5".to_owned() } else { "OK".to_owned() })
        });
        let mut block = block_on(responder.port());
        block.set_bias_voltage(0.002).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(responder.received()[0], "BIAS:DEV3:VOLT 0.002");
    }

    #[test]
    fn unparsable_voltage_gives_none_after_retries() {
        let responder = Responder::packets(|_| Some("garbage".to_owned()));
        let mut block = block_on(responder.port());
        assert_eq!(block.bias_voltage(), None);
        assert_eq!(responder.received().len(), MAX_ATTEMPTS);
    }

    #[test]
    fn setter_gives_up_after_five_rejections() {
        let responder = Responder::packets(|_| Some("BUSY".to_owned()));
        let mut block = block_on(responder.port());
        let err = block.set_bias_voltage(0.001).unwrap_err();
        assert!(matches!(err, InstrumentError::Rejected { .. }));
        assert_eq!(responder.received().len(), MAX_ATTEMPTS);
    }

    #[test]
    fn block_test_needs_both_devices_ok() {
        let responder = Responder::packets(|cmd| match cmd {
            "GEN:DEV3:STAT?" => Some("OK".to_owned()),
            "GEN:DEV4:STAT?" => Some("FAIL".to_owned()),
            _ => None,
        });
        let mut block = block_on(responder.port());
        assert!(!block.test().unwrap());
    }

    #[test]
    fn short_status_flags() {
        let responder = Responder::packets(|cmd| match cmd {
            "BIAS:DEV3:SHOR?" => Some("1".to_owned()),
            "CTRL:DEV4:SHOR?" => Some("0".to_owned()),
            "BIAS:DEV3:SHOR 0" => Some("OK".to_owned()),
            _ => Some("ERROR".to_owned()),
        });
        let mut block = block_on(responder.port());
        assert!(block.bias_short().unwrap());
        assert!(!block.ctrl_short().unwrap());
        assert_eq!(block.set_bias_short(false).unwrap(), "OK");
    }

    #[test]
    fn commands_need_a_connection() {
        let mut block = Block::new(BlockConfig::default());
        assert!(matches!(
            block.bias_data(),
            Err(InstrumentError::NotConnected(Instrument::Block))
        ));
    }
}
