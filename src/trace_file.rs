//! Traces stored as a directory of files.
//!
//! A trace directory holds:
//!
//! - `calls`: a `Header`, followed by one fixed-size `CallEntry` per call, in
//!   call order. A call's number is its index in this table.
//!
//! - `variable`: the calls' argument bytes, back to back. Each `CallEntry`
//!   gives its call's offset and length in here.
//!
//! - `functions`: one function name per line. A `CallEntry`'s function id is
//!   a line number in this file, counting from zero.
//!
//! - `header.json`: a `TraceHeader`, describing the recording as a whole.
//!
//! The `calls` table is written and read as raw memory, so a trace is
//! specific to the endianness of the machine that wrote it. The header's magic
//! number catches mismatches.

use std::io::prelude::*;
use std::path::Path;
use std::{fs, io, mem};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::call::{CallRecord, CallSource};
use crate::config::EglConfigInfo;
use crate::error::{Result, RetraceError};
use crate::raw::{self, Simple};
use crate::registry::FunctionRegistry;

/// Facts about a recording as a whole.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TraceHeader {
    /// The thread whose swaps were counted as frames when recording.
    pub default_tid: u32,
    pub window_width: i32,
    pub window_height: i32,
    /// The GLES major version the application asked for.
    pub api_version: u32,
    pub frame_count: u32,
    /// The framebuffer config the application ran with.
    pub config: Option<EglConfigInfo>,
}

impl Default for TraceHeader {
    fn default() -> TraceHeader {
        TraceHeader {
            default_tid: 0,
            window_width: 0,
            window_height: 0,
            api_version: 2,
            frame_count: 0,
            config: None,
        }
    }
}

const MAGIC: u32 = u32::from_le_bytes(*b"GLRT");

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(C)]
struct Header {
    // Using a `u32` here ensures we get different magic numbers on big-endian
    // and little-endian machines.
    magic: u32,
    size_of_entry: u32,
}

unsafe impl Simple for Header {}

impl Header {
    fn current() -> Header {
        Header {
            magic: MAGIC,
            size_of_entry: mem::size_of::<CallEntry>() as u32,
        }
    }

    fn check(&self) -> io::Result<()> {
        let expected = Header::current();
        if expected != *self {
            let msg = format!(
                "trace calls header does not match:\n\
                 expected: {:?}\n\
                 actual:   {:?}\n",
                expected, self
            );
            return Err(io::Error::new(io::ErrorKind::Other, msg));
        }
        Ok(())
    }
}

/// One row of the `calls` table.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(C)]
pub struct CallEntry {
    pub tid: u32,
    pub function: u32,
    pub offset: u64,
    pub len: u32,
    padding: u32,
}

unsafe impl Simple for CallEntry {}

/// Writes a trace directory.
pub struct TraceWriter {
    dir: std::path::PathBuf,
    calls: io::BufWriter<fs::File>,
    variable: io::BufWriter<fs::File>,
    bytes_written: u64,
    call_serial: u32,
    functions: FunctionRegistry,
    header: TraceHeader,
}

impl TraceWriter {
    pub fn create<P: AsRef<Path>>(dir: P, header: TraceHeader) -> io::Result<TraceWriter> {
        let dir = dir.as_ref();

        match fs::create_dir(dir) {
            Err(e) if e.kind() != io::ErrorKind::AlreadyExists => {
                return Err(e);
            }
            _ => (),
        }

        let mut calls = io::BufWriter::new(fs::File::create(dir.join("calls"))?);
        let variable = io::BufWriter::new(fs::File::create(dir.join("variable"))?);
        calls.write_all(raw::as_bytes(&Header::current()))?;

        Ok(TraceWriter {
            dir: dir.to_owned(),
            calls,
            variable,
            bytes_written: 0,
            call_serial: 0,
            functions: FunctionRegistry::default(),
            header,
        })
    }

    /// Append a call to `function` by thread `tid`. Return its call number.
    pub fn write_call(&mut self, tid: u32, function: &str, args: &[u8]) -> io::Result<u32> {
        let entry = CallEntry {
            tid,
            function: self.functions.intern(function),
            offset: self.bytes_written,
            len: args.len() as u32,
            padding: 0,
        };
        self.variable.write_all(args)?;
        self.bytes_written += args.len() as u64;
        self.calls.write_all(raw::as_bytes(&entry))?;

        let n = self.call_serial;
        self.call_serial += 1;
        Ok(n)
    }

    pub fn header_mut(&mut self) -> &mut TraceHeader {
        &mut self.header
    }

    /// Write out the function names and header, and flush everything.
    pub fn finish(mut self) -> Result<()> {
        self.calls.flush()?;
        self.variable.flush()?;

        let mut functions = io::BufWriter::new(fs::File::create(self.dir.join("functions"))?);
        for name in self.functions.names() {
            writeln!(functions, "{}", name)?;
        }
        functions.flush()?;

        let header = fs::File::create(self.dir.join("header.json"))?;
        serde_json::to_writer_pretty(header, &self.header)?;
        debug!(
            "wrote {} calls, {} bytes of arguments to {}",
            self.call_serial,
            self.bytes_written,
            self.dir.display()
        );
        Ok(())
    }
}

/// A trace directory, read into memory.
pub struct TraceFile {
    calls: Vec<CallEntry>,
    variable: Vec<u8>,
    functions: FunctionRegistry,
    header: TraceHeader,
    next: usize,
    checkpoint: Option<usize>,
}

impl TraceFile {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<TraceFile> {
        let dir = dir.as_ref();
        let mut calls_file = fs::File::open(dir.join("calls"))?;
        let mut variable_file = fs::File::open(dir.join("variable"))?;

        let calls_len = calls_file.metadata()?.len() as usize;
        if calls_len < mem::size_of::<Header>() {
            return Err(RetraceError::invalid_trace(
                "calls file is too short to hold a header.\n\
                 Are you recording to the same trace you're trying to replay from?",
            ));
        }

        let header: Header = raw::read_value(&mut calls_file)?;
        header.check()?;
        let calls = raw::read_vec(
            &mut calls_file,
            calls_len - mem::size_of::<Header>(),
            "calls table",
        )?;

        let variable_len = variable_file.metadata()?.len() as usize;
        let variable = raw::read_vec(&mut variable_file, variable_len, "variable data")?;

        let functions = fs::read_to_string(dir.join("functions"))?;
        let functions = FunctionRegistry::from_names(functions.lines());

        let header: TraceHeader = match fs::File::open(dir.join("header.json")) {
            Ok(file) => serde_json::from_reader(io::BufReader::new(file))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("trace has no header.json; using defaults");
                TraceHeader::default()
            }
            Err(e) => return Err(e.into()),
        };

        let trace = TraceFile {
            calls,
            variable,
            functions,
            header,
            next: 0,
            checkpoint: None,
        };
        trace.validate()?;
        Ok(trace)
    }

    /// Check every call's function id and argument range up front, so the
    /// replay never trips over them midway.
    fn validate(&self) -> Result<()> {
        for (call_no, entry) in self.calls.iter().enumerate() {
            if entry.function as usize >= self.functions.len() {
                return Err(RetraceError::invalid_trace(format!(
                    "call {} refers to function id {}, but the trace names only {} functions",
                    call_no,
                    entry.function,
                    self.functions.len()
                )));
            }
            let end = entry.offset.checked_add(u64::from(entry.len));
            if end.map_or(true, |end| end > self.variable.len() as u64) {
                return Err(RetraceError::invalid_trace(format!(
                    "call {}'s arguments extend past the end of the variable data",
                    call_no
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn entries(&self) -> &[CallEntry] {
        &self.calls
    }

    fn record(&self, index: usize) -> CallRecord {
        let entry = &self.calls[index];
        let start = entry.offset as usize;
        CallRecord {
            call_no: index as u32,
            tid: entry.tid,
            function: entry.function,
            args: self.variable[start..start + entry.len as usize].to_vec(),
        }
    }
}

impl CallSource for TraceFile {
    fn next_call(&mut self) -> Result<Option<CallRecord>> {
        if self.next >= self.calls.len() {
            return Ok(None);
        }
        let call = self.record(self.next);
        self.next += 1;
        Ok(Some(call))
    }

    fn set_checkpoint(&mut self) {
        self.checkpoint = Some(self.next);
    }

    fn rollback(&mut self) -> Result<()> {
        self.next = self.checkpoint.ok_or(RetraceError::NoCheckpoint)?;
        Ok(())
    }

    fn seek(&mut self, call_no: u32) -> Result<()> {
        self.next = (call_no as usize).min(self.calls.len());
        Ok(())
    }

    fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    fn header(&self) -> &TraceHeader {
        &self.header
    }
}

#[test]
fn test_write_and_open() {
    use crate::call::ArgWriter;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace");

    let mut header = TraceHeader::default();
    header.default_tid = 3;
    header.window_width = 640;
    header.window_height = 480;
    let mut writer = TraceWriter::create(&path, header.clone()).unwrap();
    writer
        .write_call(3, "glViewport", &ArgWriter::new().i32(0).i32(0).i32(640).i32(480).finish())
        .unwrap();
    writer.write_call(4, "glFlush", &[]).unwrap();
    writer
        .write_call(3, "glViewport", &ArgWriter::new().i32(1).i32(2).i32(3).i32(4).finish())
        .unwrap();
    writer.header_mut().frame_count = 1;
    writer.finish().unwrap();

    let mut trace = TraceFile::open(&path).unwrap();
    assert_eq!(trace.len(), 3);
    assert_eq!(trace.header().default_tid, 3);
    assert_eq!(trace.header().frame_count, 1);
    assert_eq!(trace.functions().name(1), Some("glFlush"));

    let first = trace.next_call().unwrap().unwrap();
    assert_eq!((first.call_no, first.tid, first.function), (0, 3, 0));
    assert_eq!(first.cursor().i32().unwrap(), 0);

    trace.set_checkpoint();
    let second = trace.next_call().unwrap().unwrap();
    assert_eq!((second.tid, second.args.len()), (4, 0));
    let third = trace.next_call().unwrap().unwrap();
    assert_eq!(third.cursor().i32().unwrap(), 1);
    assert_eq!(trace.next_call().unwrap(), None);

    trace.rollback().unwrap();
    assert_eq!(trace.next_call().unwrap().unwrap().call_no, 1);
}

#[test]
fn test_open_rejects_bad_traces() {
    let dir = tempfile::tempdir().unwrap();

    // Missing files are reported as such.
    let err = TraceFile::open(dir.path().join("missing")).err().unwrap();
    assert_eq!(err.kind(), crate::result::TraceErrorKind::FileNotFound);

    // A function id beyond the function list.
    let path = dir.path().join("bad");
    let mut writer = TraceWriter::create(&path, TraceHeader::default()).unwrap();
    writer.write_call(0, "glFlush", &[]).unwrap();
    writer.finish().unwrap();
    fs::write(path.join("functions"), "").unwrap();
    assert!(matches!(
        TraceFile::open(&path),
        Err(RetraceError::InvalidTrace(_))
    ));
}
