// src/instruments/vna.rs
use super::scpi::{Framing, ScpiLink};
use crate::config::VnaConfig;
use crate::error::InstrumentError;
use log::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VnaTest {
    Passed,
    Failed,
    Error,
}

impl VnaTest {
    pub fn label(&self) -> &'static str {
        match self {
            VnaTest::Passed => "Test passed",
            VnaTest::Failed => "Test failed",
            VnaTest::Error => "Error",
        }
    }
}

pub struct Vna {
    cfg: VnaConfig,
    link: Option<ScpiLink>,
}

impl Vna {
    pub fn new(cfg: VnaConfig) -> Self {
        Self { cfg, link: None }
    }

    pub fn connect(&mut self) -> Result<&mut ScpiLink, InstrumentError> {
        if self.link.is_none() {
            self.link = Some(ScpiLink::connect(
                &self.cfg.address,
                self.cfg.port,
                Framing::Line,
            )?);
        }
        self.link
            .as_mut()
            .ok_or(InstrumentError::NotConnected(crate::types::Instrument::Vna))
    }

    pub fn identify(&mut self) -> Result<String, InstrumentError> {
        self.connect()?.query("*IDN?")
    }

    /// `*IDN?` then `*TST?`. Connection or i/o trouble maps to `Error`.
    pub fn test(&mut self) -> VnaTest {
        let reply = self.identify().and_then(|idn| {
            info!("[VNA] {idn}");
            self.connect()?.query("*TST?")
        });
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                info!("[VNA] test failed to run: {e}");
                return VnaTest::Error;
            }
        };
        info!("[VNA] self test `{reply}`");
        match reply.trim().parse::<i32>() {
            Ok(0) => VnaTest::Passed,
            Ok(_) => VnaTest::Failed,
            Err(_) => VnaTest::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Responder;

    fn vna_on(port: u16) -> Vna {
        Vna::new(VnaConfig {
            address: "127.0.0.1".to_owned(),
            port,
        })
    }

    #[test]
    fn self_test_maps_reply() {
        let ok = Responder::lines(|cmd| match cmd {
            "*IDN?" => Some("Rohde-Schwarz,ZVA40,1145.1110k40/100950,3.60".to_owned()),
            _ => Some("0".to_owned()),
        });
        assert_eq!(vna_on(ok.port()).test(), VnaTest::Passed);
        assert_eq!(ok.received(), vec!["*IDN?".to_owned(), "*TST?".to_owned()]);

        let bad = Responder::lines(|_| Some("+1".to_owned()));
        assert_eq!(vna_on(bad.port()).test(), VnaTest::Failed);
    }

    #[test]
    fn unreachable_vna_is_error() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        assert_eq!(vna_on(port).test(), VnaTest::Error);
        assert_eq!(VnaTest::Error.label(), "Error");
    }
}
