//! The crate's error type.

use std::io;

use thiserror::Error;

use crate::result::TraceErrorKind;

pub type Result<T> = std::result::Result<T, RetraceError>;

#[derive(Debug, Error)]
pub enum RetraceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The trace contents don't make sense: truncated arguments, unknown
    /// function ids, and so on.
    #[error("inconsistent trace file: {0}")]
    InvalidTrace(String),

    #[error("invalid parameter: {0}")]
    Config(String),

    #[error("parameter out of bounds: {0}")]
    OutOfBounds(String),

    /// The requested offscreen pixel, depth or stencil layout can't be built.
    #[error("unsupported offscreen format: {0}")]
    UnsupportedFormat(String),

    #[error("shader cache: {0}")]
    ShaderCache(String),

    #[error("no checkpoint set - not able to rollback")]
    NoCheckpoint,

    /// The window system refused to create a display, surface or context.
    #[error("platform error: {0}")]
    Platform(String),

    /// `Retracer::report_and_abort` has already written the error result.
    /// Callers just unwind; nothing more should be reported.
    #[error("replay aborted: {0}")]
    Aborted(String),
}

impl RetraceError {
    /// The result-file category this error is reported under.
    pub fn kind(&self) -> TraceErrorKind {
        match self {
            RetraceError::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                TraceErrorKind::FileNotFound
            }
            RetraceError::Json(_) => TraceErrorKind::InvalidJson,
            RetraceError::InvalidTrace(_) => TraceErrorKind::InconsistentTraceFile,
            RetraceError::Config(_) | RetraceError::UnsupportedFormat(_) => {
                TraceErrorKind::InvalidParameter
            }
            RetraceError::OutOfBounds(_) => TraceErrorKind::ParameterOutOfBounds,
            _ => TraceErrorKind::Generic,
        }
    }

    pub fn invalid_trace<S: Into<String>>(msg: S) -> RetraceError {
        RetraceError::InvalidTrace(msg.into())
    }
}
