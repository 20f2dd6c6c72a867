//! The result file: what a run measured, or why it failed.
//!
//! Automation reads this file after every run, so it is written even when
//! the run aborts. A successful run produces
//!
//! ```text
//! {"result": [{"frames": 100, "time": 1.5, "fps": 66.7, "start": 1, "end": 101,
//!              "loop_fps": [], "fb_config": {...}}]}
//! ```
//!
//! and a failed one
//!
//! ```text
//! {"error": ["TRACE_ERROR_INVALID_PARAMETER"], "error_description": ["..."]}
//! ```

use std::fs;
use std::path::PathBuf;

use log::info;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::EglConfigInfo;
use crate::error::Result;

/// Error categories, as automation knows them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TraceErrorKind {
    FileNotFound,
    InvalidJson,
    InvalidParameter,
    MissingParameter,
    ParameterOutOfBounds,
    OutOfMemory,
    MemoryBudget,
    InitialisingInstrumentation,
    CapturingInstrumentationData,
    InconsistentTraceFile,
    Generic,
}

impl TraceErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            TraceErrorKind::FileNotFound => "TRACE_ERROR_FILE_NOT_FOUND",
            TraceErrorKind::InvalidJson => "TRACE_ERROR_INVALID_JSON",
            TraceErrorKind::InvalidParameter => "TRACE_ERROR_INVALID_PARAMETER",
            TraceErrorKind::MissingParameter => "TRACE_ERROR_MISSING_PARAMETER",
            TraceErrorKind::ParameterOutOfBounds => "TRACE_ERROR_PARAMETER_OUT_OF_BOUNDS",
            TraceErrorKind::OutOfMemory => "TRACE_ERROR_OUT_OF_MEMORY",
            TraceErrorKind::MemoryBudget => "TRACE_ERROR_MEMORY_BUDGET",
            TraceErrorKind::InitialisingInstrumentation => {
                "TRACE_ERROR_INITIALISING_INSTRUMENTATION"
            }
            TraceErrorKind::CapturingInstrumentationData => {
                "TRACE_ERROR_CAPTURING_INSTRUMENTATION_DATA"
            }
            TraceErrorKind::InconsistentTraceFile => "TRACE_ERROR_INCONSISTENT_TRACE_FILE",
            TraceErrorKind::Generic => "TRACE_ERROR_GENERIC",
        }
    }
}

/// The numbers from a completed run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameResult {
    pub frames: u32,
    /// Seconds spent in the measured frames.
    pub time: f64,
    pub fps: f64,
    pub start: u32,
    pub end: u32,
    /// One entry per completed loop, when looping.
    pub loop_fps: Vec<f64>,
    pub fb_config: EglConfigInfo,
    /// Whatever the frame observers collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_data: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunReport {
    Success(FrameResult),
    Error(Vec<(TraceErrorKind, String)>),
}

impl RunReport {
    pub fn error(kind: TraceErrorKind, description: &str) -> RunReport {
        RunReport::Error(vec![(kind, description.to_string())])
    }

    pub fn is_error(&self) -> bool {
        match self {
            RunReport::Error(_) => true,
            RunReport::Success(_) => false,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            RunReport::Success(result) => json!({ "result": [result] }),
            RunReport::Error(errors) => {
                let names: Vec<_> = errors.iter().map(|(kind, _)| kind.name()).collect();
                let descriptions: Vec<_> = errors.iter().map(|(_, text)| text).collect();
                json!({ "error": names, "error_description": descriptions })
            }
        }
    }
}

/// Where a run's report goes.
pub trait ResultWriter: Send {
    fn write(&mut self, report: &RunReport) -> Result<()>;
}

/// Writes the report as JSON to a file.
pub struct JsonResultFile {
    path: PathBuf,
}

impl JsonResultFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> JsonResultFile {
        JsonResultFile { path: path.into() }
    }
}

impl ResultWriter for JsonResultFile {
    fn write(&mut self, report: &RunReport) -> Result<()> {
        let text = serde_json::to_string_pretty(&report.to_json())?;
        fs::write(&self.path, text)?;
        info!("wrote result file {}", self.path.display());
        Ok(())
    }
}

#[test]
fn test_result_json() {
    let report = RunReport::Success(FrameResult {
        frames: 10,
        time: 0.5,
        fps: 20.0,
        start: 1,
        end: 11,
        loop_fps: vec![19.0, 21.0],
        fb_config: EglConfigInfo::new(8, 8, 8, 8, 24, 8),
        frame_data: None,
    });
    let json = report.to_json();
    assert_eq!(json["result"][0]["frames"], 10);
    assert_eq!(json["result"][0]["loop_fps"][1], 21.0);
    assert_eq!(json["result"][0]["fb_config"]["depthBits"], 24);
    assert!(json["result"][0].get("frame_data").is_none());

    let report = RunReport::error(TraceErrorKind::InvalidParameter, "[c5,f1] bad config");
    let json = report.to_json();
    assert_eq!(json["error"][0], "TRACE_ERROR_INVALID_PARAMETER");
    assert_eq!(json["error_description"][0], "[c5,f1] bad config");
}

#[test]
fn test_json_result_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.json");
    let mut writer = JsonResultFile::new(&path);
    writer
        .write(&RunReport::error(TraceErrorKind::OutOfMemory, "out of memory"))
        .unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["error"][0], "TRACE_ERROR_OUT_OF_MEMORY");
}
