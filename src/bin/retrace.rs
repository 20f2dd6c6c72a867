use docopt::Docopt;
use serde::Deserialize;

use gles_retrace::{
    dispatch_table, HeadlessWindowSystem, JsonResultFile, NullDriver, RetraceEngine,
    RetraceOptions, Retracer, TraceFile,
};

use std::{fs, process};

static USAGE: &str = "
Replay a GLES/EGL call trace.

Read the trace directory <trace> and reissue its calls, then write a JSON
result document with the frame count, time and FPS of the measurement
window, or the error that ended the run. Calls go to a headless driver, so
this measures the replay machinery itself.

The optional JSON parameter file uses the same keys as the result-producing
harness (`frames`, `loopTimes`, `multithread`, `offscreen`, ...). Command line
flags override it.

Usage:
  retrace [options] <trace>
  retrace (-h | --help)

Options:
  --params=<json>      JSON parameter file.
  --result=<file>      Where to write the result [default: results.json].
  --frames=<range>     Measure frames start-end.
  --tid=<tid>          Replay only this recorded thread.
  --multithread        Replay every recorded thread on its own worker.
  --offscreen          Render offscreen and composite frames into a mosaic.
  --debug              Log every skipped call.
  -h, --help           Show this message.
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_trace: String,
    flag_params: Option<String>,
    flag_result: String,
    flag_frames: Option<String>,
    flag_tid: Option<u32>,
    flag_multithread: bool,
    flag_offscreen: bool,
    flag_debug: bool,
}

fn options(args: &Args, trace: &TraceFile) -> gles_retrace::Result<RetraceOptions> {
    use gles_retrace::CallSource;

    let mut options = RetraceOptions::default();
    options.apply_header(trace.header());
    if let Some(path) = &args.flag_params {
        options.apply_json(&fs::read_to_string(path)?)?;
    }

    let mut flags = serde_json::Map::new();
    if let Some(frames) = &args.flag_frames {
        flags.insert("frames".into(), frames.clone().into());
    }
    if let Some(tid) = args.flag_tid {
        flags.insert("tid".into(), tid.into());
    }
    if args.flag_multithread {
        flags.insert("multithread".into(), true.into());
    }
    if args.flag_offscreen {
        flags.insert("offscreen".into(), true.into());
    }
    if args.flag_debug {
        flags.insert("debug".into(), true.into());
    }
    options.apply_json(&serde_json::Value::Object(flags).to_string())?;
    Ok(options)
}

fn run(args: &Args) -> gles_retrace::Result<()> {
    let trace = TraceFile::open(&args.arg_trace)?;
    let options = options(args, &trace)?;

    let window = HeadlessWindowSystem::new(Box::new(NullDriver::new()));
    let results = JsonResultFile::new(&args.flag_result);
    let retracer = Retracer::new(
        options,
        Box::new(window),
        Box::new(results),
        Box::new(|msg: &str| {
            eprintln!("retrace: {}", msg);
            process::abort();
        }),
    )?;

    let mut engine = RetraceEngine::new(retracer, Box::new(trace), dispatch_table());
    engine.run()
}

fn main() {
    env_logger::init();
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if let Err(e) = run(&args) {
        eprintln!("retrace: {}", e);
        process::exit(1);
    }
}
