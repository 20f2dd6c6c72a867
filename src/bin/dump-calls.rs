use docopt::Docopt;
use serde::Deserialize;

use gles_retrace::{CallSource, TraceFile};

use std::io::{self, Write};

static USAGE: &str = "
List the calls in a GLES/EGL trace.

Print one line per call: the call number, the recording thread id, the
function name, and the size of its serialized arguments. With --header,
print the trace's header first.

Usage:
  dump-calls [--header] <trace>
";

#[derive(Debug, Deserialize)]
struct Args {
    arg_trace: String,
    flag_header: bool,
}

fn main() -> gles_retrace::Result<()> {
    env_logger::init();
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let mut trace = TraceFile::open(&args.arg_trace)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.flag_header {
        writeln!(out, "{:?}", trace.header())?;
    }
    while let Some(call) = trace.next_call()? {
        let name = trace.functions().name(call.function).unwrap_or("<unknown>");
        writeln!(
            out,
            "{:8} tid {:<3} {} ({} bytes)",
            call.call_no,
            call.tid,
            name,
            call.args.len()
        )?;
    }

    Ok(())
}
