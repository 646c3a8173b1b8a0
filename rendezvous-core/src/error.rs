// rendezvous-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendezvousError {

    #[error("Failed to resolve local address: {message}")]
    Resolution {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error(
        "No free port in range [{start}, {end}]; widen the port range or reduce the number of workers"
    )]
    ExhaustedRange {
        start: u16,
        end: u16,
    },

    #[error("Advertisement store unavailable at '{path}': {message}")]
    StoreUnavailable {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Corrupt advertisement '{path}': {message}")]
    CorruptAdvertisement {
        path: PathBuf,
        message: String,
    },

    #[error("Rendezvous timed out with {observed} of {required} advertisements visible")]
    RendezvousTimeout {
        observed: usize,
        required: usize,
    },

    #[error("Rendezvous cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to write output '{path}': {message}")]
    Output {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, RendezvousError>;

// Convenience constructors
impl RendezvousError {

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
            source: None,
        }
    }

    pub fn resolution_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Resolution {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn exhausted_range(start: u16, end: u16) -> Self {
        Self::ExhaustedRange { start, end }
    }

    pub fn store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn store_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::StoreUnavailable {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptAdvertisement {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn timeout(observed: usize, required: usize) -> Self {
        Self::RendezvousTimeout { observed, required }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn output_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Output {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}
