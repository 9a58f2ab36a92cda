//! Error types shared by the controller, the worker and the collaborators.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::models::task::Mode;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("{0} mode is not supported")]
    UnsupportedMode(Mode),

    #[error("no data source selected")]
    MissingSource,
}

impl ConfigurationError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigurationError::UnsupportedMode(_) => "config_unsupported_mode",
            ConfigurationError::MissingSource => "config_missing_source",
        }
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StartError {
    /// Only one task may be active; a second request is rejected.
    #[error("task {id} is still active")]
    AlreadyRunning { id: u64 },

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

impl StartError {
    pub fn as_label(&self) -> &'static str {
        match self {
            StartError::AlreadyRunning { .. } => "start_already_running",
            StartError::Configuration(e) => e.as_label(),
            StartError::Settings(_) => "start_settings",
            StartError::Spawn(_) => "start_spawn",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("grid {grid} has shape {found:?}, expected {expected:?}")]
pub struct ShapeMismatch {
    pub grid: &'static str,
    pub expected: (usize, usize),
    pub found: (usize, usize),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskFailure {
    #[error("stopped by operator")]
    Cancelled,

    #[error("cannot read source {path}: {reason}")]
    Source { path: PathBuf, reason: String },

    #[error("failed to save results to {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error(transparent)]
    Shape(#[from] ShapeMismatch),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl TaskFailure {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskFailure::Cancelled => "task_cancelled",
            TaskFailure::Source { .. } => "task_source",
            TaskFailure::Save { .. } => "task_save",
            TaskFailure::Shape(_) => "task_shape",
            TaskFailure::Panicked(_) => "task_panicked",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("progress {0}% is out of range")]
    OutOfRange(u8),

    #[error("progress went back from {from}% to {to}%")]
    Regressed { from: u8, to: u8 },

    #[error("progress {0}% emitted after completion")]
    ProgressAfterCompletion(u8),

    #[error("completion emitted twice")]
    DuplicateCompletion,
}
