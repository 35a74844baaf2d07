// src/error.rs
use crate::types::Instrument;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot resolve address `{0}`")]
    Address(String),
    #[error("i/o error on {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not connected")]
    NotConnected(Instrument),
    #[error("{instrument} rejected `{command}`: `{reply}`")]
    Rejected {
        instrument: Instrument,
        command: String,
        reply: String,
    },
    #[error("unparsable reply `{0}`")]
    BadReply(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} is busy with another acquisition")]
    Busy(Instrument),
    #[error("invalid sweep: {0}")]
    InvalidSweep(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("unexpected csv header {found:?}")]
    Header { found: Vec<String> },
}
