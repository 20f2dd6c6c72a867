//! Replay of recorded OpenGL ES / EGL call traces.
//!
//! A trace is a sequence of calls, each tagged with the recording thread's
//! id, the function called, and its serialized arguments. This crate reads
//! such a trace and reissues the calls on a live driver, translating the
//! object names, surfaces and contexts the recording device handed out into
//! the ones the replaying device hands out.
//!
//! The pieces:
//!
//! - `TraceFile` reads the on-disk container and implements `CallSource`.
//!
//! - `DispatchTable` maps function names to replay functions. The `egl` and
//!   `gles` modules register the functions that need interpreting;
//!   `dispatch_table` gathers them all.
//!
//! - `Retracer` owns the replay state: the `StateRegistry` of contexts and
//!   surfaces, each context's name maps, the offscreen compositor, frame
//!   counting and measurement, and the result report.
//!
//! - `RetraceEngine` pulls calls from a `CallSource` and runs them, handing
//!   the `Retracer` to a per-thread worker in multi-thread mode.
//!
//! The driver and the window system are traits, `Driver` and
//! `WindowSystem`, so the same replay can run against real GL through
//! `gleam` or headless against `NullDriver`.

mod arena;
pub mod call;
pub mod callset;
pub mod config;
pub mod driver;
pub mod egl;
pub mod engine;
pub mod error;
pub mod gles;
pub mod handle_map;
pub mod measure;
pub mod offscreen;
pub mod quad;
pub mod raw;
pub mod registry;
pub mod resource;
pub mod result;
mod scheduler;
pub mod shader_cache;
pub mod snapshot;
pub mod state;
pub mod trace_file;
pub mod window;

#[cfg(test)]
mod testing;

pub use call::{ArgCursor, ArgWriter, CallList, CallRecord, CallSource};
pub use callset::CallSet;
pub use config::{EglConfigInfo, MosaicLayout, RetraceOptions};
pub use driver::{Driver, GleamDriver, NullDriver};
pub use engine::{RetraceEngine, Retracer, Terminator};
pub use error::{Result, RetraceError};
pub use handle_map::HandleMap;
pub use registry::{DispatchTable, FunctionRegistry};
pub use result::{JsonResultFile, ResultWriter, RunReport, TraceErrorKind};
pub use trace_file::{TraceFile, TraceHeader, TraceWriter};
pub use window::{HeadlessWindowSystem, Profile, WindowSystem};

/// Every replay function this crate provides, registered by name.
pub fn dispatch_table() -> DispatchTable {
    let mut table = DispatchTable::new();
    egl::register(&mut table);
    gles::register(&mut table);
    table
}

#[test]
fn test_dispatch_table() {
    let table = dispatch_table();
    for name in &[
        "eglCreateContext",
        "eglMakeCurrent",
        "eglSwapBuffers",
        "glGenTextures",
        "glDeleteFramebuffersOES",
        "glLinkProgram",
        "glClientWaitSync",
    ] {
        assert!(table.contains(name), "{} is not registered", name);
    }
    assert!(!table.contains("glDispatchCompute"));
}

#[test]
fn test_unregistered_calls_are_skipped() {
    let mut list = CallList::new(TraceHeader::default());
    list.push(0, "glClearColor", ArgWriter::new().u32(0).finish());
    list.push(0, "glUniform1f", Vec::new());
    list.push(0, "glFlush", Vec::new());

    let mut options = RetraceOptions::default();
    options.debug = 1;
    let (retracer, window, results) = testing::fake_retracer(options);
    let mut table = dispatch_table();
    assert!(!table.contains("glUniform1f"));
    table.register("glUniform1f", false, |r, _| {
        r.driver().flush();
        Ok(())
    });
    let mut engine = RetraceEngine::new(retracer, Box::new(list), table);
    engine.run().unwrap();

    let log = window.fake_driver().take_log();
    assert_eq!(log.iter().filter(|call| *call == "flush()").count(), 2);
    assert!(!log.iter().any(|call| call.starts_with("clear_color")));
    assert_eq!(results.reports().len(), 1);
    assert!(!results.reports()[0].is_error());
}
