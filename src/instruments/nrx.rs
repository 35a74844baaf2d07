// src/instruments/nrx.rs
use super::scpi::{parse_number, Framing, ScpiLink};
use super::PowerMeter;
use crate::config::NrxConfig;
use crate::error::InstrumentError;
use log::{debug, info, warn};

/// SCPI "not a number" sentinel returned when no measurement is available.
const SCPI_NAN: f64 = 9.9e37;

/// Rohde & Schwarz NRX power meter, sensor channel 1.
pub struct Nrx {
    cfg: NrxConfig,
    link: Option<ScpiLink>,
}

impl Nrx {
    pub fn new(cfg: NrxConfig) -> Self {
        Self { cfg, link: None }
    }

    fn configure(link: &mut ScpiLink, cfg: &NrxConfig) -> Result<(), InstrumentError> {
        link.send("SENS1:FUNC \"POW:AVG\"")?;
        link.send(&format!("SENS1:APER {}", cfg.aperture_time))?;
        link.send("SENS1:AVER:COUN:AUTO ON")?;
        link.send(&format!("SENS1:AVER:COUN:AUTO:MTIM {}", cfg.filter_time))?;
        link.send("UNIT1:POW DBM")?;
        Ok(())
    }
}

impl PowerMeter for Nrx {
    fn connect(&mut self) -> Result<(), InstrumentError> {
        if self.link.is_some() {
            return Ok(());
        }
        let mut link = ScpiLink::connect(&self.cfg.address, self.cfg.port, Framing::Line)?;
        Self::configure(&mut link, &self.cfg)?;
        info!(
            "[NRX] filter {} s, aperture {} s",
            self.cfg.filter_time, self.cfg.aperture_time
        );
        self.link = Some(link);
        Ok(())
    }

    fn power(&mut self) -> Option<f64> {
        let link = self.link.as_mut()?;
        match link.query("READ1?").and_then(|r| parse_number(&r)) {
            Ok(p) if p.is_finite() && p.abs() < SCPI_NAN => Some(p),
            Ok(p) => {
                debug!("[NRX] no measurement ({p})");
                None
            }
            Err(e) => {
                warn!("[NRX] power read failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Responder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn nrx_on(port: u16) -> Nrx {
        Nrx::new(NrxConfig {
            address: "127.0.0.1".to_owned(),
            port,
            ..NrxConfig::default()
        })
    }

    #[test]
    fn connect_configures_sensor() {
        let responder = Responder::lines(|cmd| match cmd {
            "READ1?" => Some("-31.25".to_owned()),
            _ => None,
        });
        let mut nrx = nrx_on(responder.port());
        nrx.connect().unwrap();
        assert_eq!(nrx.power(), Some(-31.25));

        let received = responder.received();
        assert_eq!(received[0], "SENS1:FUNC \"POW:AVG\"");
        assert!(received.contains(&"SENS1:AVER:COUN:AUTO:MTIM 0.01".to_owned()));
        assert!(received.contains(&"UNIT1:POW DBM".to_owned()));
        assert_eq!(received.last().map(String::as_str), Some("READ1?"));
    }

    #[test]
    fn nan_sentinel_is_no_reading() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = reads.clone();
        let responder = Responder::lines(move |cmd| {
            if cmd != "READ1?" {
                return None;
            }
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Some(if n == 0 { "9.91E37".to_owned() } else { "-12.5".to_owned() })
        });
        let mut nrx = nrx_on(responder.port());
        nrx.connect().unwrap();
        assert_eq!(nrx.power(), None);
        assert_eq!(nrx.power(), Some(-12.5));
    }

    #[test]
    fn power_before_connect_is_none() {
        let mut nrx = Nrx::new(NrxConfig::default());
        assert_eq!(nrx.power(), None);
    }
}
