use std::path::PathBuf;

use thiserror::Error;

use crate::machine::{Event, State};

/// Camera faults. Caught at the capturing boundary, where they move the
/// machine to `Failed`.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The driver could not open the camera.
    #[error("camera initialization failed: {0}")]
    Init(String),

    /// An exposure was requested without an acquired camera.
    #[error("camera is not acquired")]
    NotAcquired,

    /// The driver reported a fault while exposing.
    #[error("exposure failed: {0}")]
    Expose(String),

    /// The exposed frame could not be copied to local storage.
    #[error("transfer of {name} failed: {reason}")]
    Transfer { name: String, reason: String },

    /// Underlying IO error, e.g. while preparing the capture directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Invalid or unresolvable configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown template '{name}', expected one of: {expected}")]
    UnknownTemplate { name: String, expected: String },

    #[error("unknown filter '{name}', expected one of: {expected}")]
    UnknownFilter { name: String, expected: String },

    #[error("invalid parameters for {owner}: {reason}")]
    InvalidParams { owner: String, reason: String },

    #[error("template {template} requires {expected} captures, configured {configured}")]
    CaptureCount {
        template: String,
        expected: usize,
        configured: usize,
    },

    #[error("unsupported margin '{0}', expected a percentage such as \"2%\"")]
    Margin(String),

    #[error("unknown color '{0}'")]
    Color(String),
}

/// The template was handed a different number of images than it lays out.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("template expects {expected} images, got {actual}")]
pub struct TemplateMismatchError {
    pub expected: usize,
    pub actual: usize,
}

/// Print failures are reported but never roll back the produced artifact.
#[derive(Debug, Error)]
pub enum PrintError {
    #[error("printing is not supported on {0}")]
    Unsupported(&'static str),

    #[error("failed to spawn print command for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("print command exited with status {code} for {path}")]
    Status { path: PathBuf, code: i32 },
}

/// Raised when the driver feeds an event the current state does not accept.
#[derive(Debug, Error)]
#[error("no transition from {state:?} on {event}")]
pub struct InvalidTransition {
    pub state: State,
    pub event: &'static str,
}

impl InvalidTransition {
    pub(crate) fn new(state: State, event: &Event) -> Self {
        Self {
            state,
            event: event.name(),
        }
    }
}
