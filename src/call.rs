//! Recorded calls, and where they come from.
//!
//! A `CallRecord` is one call from a trace: which recorded thread made it,
//! which function it was (as an id into the trace's `FunctionRegistry`), and
//! the call's arguments as an opaque byte string. Replay functions decode the
//! arguments in order with an `ArgCursor`.
//!
//! Arguments are encoded back to back, with no tags:
//!
//! - integers (and enums, handles and booleans) as LEB128, signed or unsigned
//!   to match the parameter's type;
//!
//! - `f32` as four little-endian bytes;
//!
//! - arrays as an unsigned LEB128 element count followed by the elements;
//!
//! - strings as an unsigned LEB128 byte count followed by UTF-8 text.
//!
//! Return values, when the replay needs them, follow the arguments.

use crate::error::{Result, RetraceError};
use crate::registry::FunctionRegistry;
use crate::trace_file::TraceHeader;

/// `EGL_NONE`, the terminator of EGL attribute lists.
pub const EGL_NONE: i32 = 0x3038;

#[derive(Clone, Debug, PartialEq)]
pub struct CallRecord {
    /// This call's position in the trace. Call numbers are unique and
    /// increasing.
    pub call_no: u32,
    pub tid: u32,
    pub function: u32,
    pub args: Vec<u8>,
}

impl CallRecord {
    pub fn cursor(&self) -> ArgCursor {
        ArgCursor::new(&self.args)
    }
}

/// A producer of recorded calls, in trace order.
pub trait CallSource {
    /// Return the next call, or `None` at the end of the trace.
    fn next_call(&mut self) -> Result<Option<CallRecord>>;

    /// Remember the current position, for `rollback`.
    fn set_checkpoint(&mut self);

    /// Return to the position saved by the last `set_checkpoint`.
    fn rollback(&mut self) -> Result<()>;

    /// Position the source so that the next call returned is the first whose
    /// call number is at least `call_no`.
    fn seek(&mut self, call_no: u32) -> Result<()>;

    /// The names of the functions that calls' `function` ids refer to.
    fn functions(&self) -> &FunctionRegistry;

    fn header(&self) -> &TraceHeader;
}

/// Sequential reader for a call's argument bytes.
pub struct ArgCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

fn truncated() -> RetraceError {
    RetraceError::invalid_trace("call arguments end early")
}

impl<'a> ArgCursor<'a> {
    pub fn new(data: &'a [u8]) -> ArgCursor<'a> {
        ArgCursor { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(truncated());
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let mut rest = &self.data[self.pos..];
        let before = rest.len();
        let value = leb128::read::unsigned(&mut rest).map_err(leb128_error)?;
        self.pos += before - rest.len();
        Ok(value)
    }

    pub fn i64(&mut self) -> Result<i64> {
        let mut rest = &self.data[self.pos..];
        let before = rest.len();
        let value = leb128::read::signed(&mut rest).map_err(leb128_error)?;
        self.pos += before - rest.len();
        Ok(value)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let value = self.u64()?;
        if value > u64::from(u32::max_value()) {
            return Err(RetraceError::invalid_trace(format!(
                "argument {} does not fit in 32 bits",
                value
            )));
        }
        Ok(value as u32)
    }

    pub fn i32(&mut self) -> Result<i32> {
        let value = self.i64()?;
        if value < i64::from(i32::min_value()) || value > i64::from(i32::max_value()) {
            return Err(RetraceError::invalid_trace(format!(
                "argument {} does not fit in 32 bits",
                value
            )));
        }
        Ok(value as i32)
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u64()? != 0)
    }

    pub fn f32(&mut self) -> Result<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn len(&mut self) -> Result<usize> {
        let len = self.u64()? as usize;
        // Every element takes at least one byte.
        if len > self.remaining() {
            return Err(truncated());
        }
        Ok(len)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.len()?;
        self.take(len)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        let bytes = self.bytes()?;
        std::str::from_utf8(bytes)
            .map_err(|_| RetraceError::invalid_trace("string argument is not UTF-8"))
    }

    pub fn u32_array(&mut self) -> Result<Vec<u32>> {
        let len = self.len()?;
        (0..len).map(|_| self.u32()).collect()
    }

    pub fn i32_array(&mut self) -> Result<Vec<i32>> {
        let len = self.len()?;
        (0..len).map(|_| self.i32()).collect()
    }

    pub fn str_array(&mut self) -> Result<Vec<&'a str>> {
        let len = self.len()?;
        (0..len).map(|_| self.str()).collect()
    }
}

fn leb128_error(error: leb128::read::Error) -> RetraceError {
    match error {
        leb128::read::Error::IoError(_) => truncated(),
        leb128::read::Error::Overflow => RetraceError::invalid_trace("integer argument overflows"),
    }
}

/// Builds the argument bytes for a call, in the format `ArgCursor` reads.
#[derive(Clone, Debug, Default)]
pub struct ArgWriter {
    buf: Vec<u8>,
}

// Writes to a `Vec` can't fail, so the `io::Result`s from `leb128::write` are
// ignored below.
impl ArgWriter {
    pub fn new() -> ArgWriter {
        ArgWriter::default()
    }

    pub fn u64(mut self, value: u64) -> ArgWriter {
        let _ = leb128::write::unsigned(&mut self.buf, value);
        self
    }

    pub fn i64(mut self, value: i64) -> ArgWriter {
        let _ = leb128::write::signed(&mut self.buf, value);
        self
    }

    pub fn u32(self, value: u32) -> ArgWriter {
        self.u64(u64::from(value))
    }

    pub fn i32(self, value: i32) -> ArgWriter {
        self.i64(i64::from(value))
    }

    pub fn bool(self, value: bool) -> ArgWriter {
        self.u64(value as u64)
    }

    pub fn f32(mut self, value: f32) -> ArgWriter {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(self, value: &[u8]) -> ArgWriter {
        let mut this = self.u64(value.len() as u64);
        this.buf.extend_from_slice(value);
        this
    }

    pub fn str(self, value: &str) -> ArgWriter {
        self.bytes(value.as_bytes())
    }

    pub fn u32_array(self, values: &[u32]) -> ArgWriter {
        values
            .iter()
            .fold(self.u64(values.len() as u64), |w, &v| w.u32(v))
    }

    pub fn i32_array(self, values: &[i32]) -> ArgWriter {
        values
            .iter()
            .fold(self.u64(values.len() as u64), |w, &v| w.i32(v))
    }

    pub fn str_array(self, values: &[&str]) -> ArgWriter {
        values
            .iter()
            .fold(self.u64(values.len() as u64), |w, v| w.str(v))
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Look up `key` in an EGL attribute list.
pub fn attrib_value(attribs: &[i32], key: i32) -> Option<i32> {
    attribs
        .chunks(2)
        .take_while(|pair| pair[0] != EGL_NONE)
        .find(|pair| pair[0] == key && pair.len() == 2)
        .map(|pair| pair[1])
}

/// A `CallSource` over calls held in memory.
pub struct CallList {
    calls: Vec<CallRecord>,
    functions: FunctionRegistry,
    header: TraceHeader,
    next: usize,
    checkpoint: Option<usize>,
}

impl CallList {
    pub fn new(header: TraceHeader) -> CallList {
        CallList {
            calls: Vec::new(),
            functions: FunctionRegistry::default(),
            header,
            next: 0,
            checkpoint: None,
        }
    }

    /// Append a call to `function` made by thread `tid`. Its call number is
    /// its index in the list.
    pub fn push(&mut self, tid: u32, function: &str, args: Vec<u8>) -> u32 {
        let call_no = self.calls.len() as u32;
        let function = self.functions.intern(function);
        self.calls.push(CallRecord {
            call_no,
            tid,
            function,
            args,
        });
        call_no
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl CallSource for CallList {
    fn next_call(&mut self) -> Result<Option<CallRecord>> {
        let call = self.calls.get(self.next).cloned();
        if call.is_some() {
            self.next += 1;
        }
        Ok(call)
    }

    fn set_checkpoint(&mut self) {
        self.checkpoint = Some(self.next);
    }

    fn rollback(&mut self) -> Result<()> {
        self.next = self.checkpoint.ok_or(RetraceError::NoCheckpoint)?;
        Ok(())
    }

    fn seek(&mut self, call_no: u32) -> Result<()> {
        self.next = self
            .calls
            .iter()
            .position(|call| call.call_no >= call_no)
            .unwrap_or_else(|| self.calls.len());
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
fn test_arg_cursor() {
    let args = ArgWriter::new()
        .u32(300)
        .i32(-5)
        .f32(0.5)
        .str("void main() {}")
        .u32_array(&[1, 2, 0x8000_0000])
        .u64(0xdead_beef_cafe)
        .finish();

    let mut cursor = ArgCursor::new(&args);
    assert_eq!(cursor.u32().unwrap(), 300);
    assert_eq!(cursor.i32().unwrap(), -5);
    assert_eq!(cursor.f32().unwrap(), 0.5);
    assert_eq!(cursor.str().unwrap(), "void main() {}");
    assert_eq!(cursor.u32_array().unwrap(), vec![1, 2, 0x8000_0000]);
    assert_eq!(cursor.u64().unwrap(), 0xdead_beef_cafe);
    assert_eq!(cursor.remaining(), 0);

    // Reading past the end is an error, not a panic.
    assert!(cursor.u32().is_err());
    assert!(ArgCursor::new(&[5, b'a']).str().is_err());
    assert!(ArgCursor::new(&ArgWriter::new().u64(1 << 40).finish()).u32().is_err());
}

#[test]
fn test_attrib_value() {
    let attribs = [0x3098, 3, 0x3057, 64, EGL_NONE, 0x3056, 9];
    assert_eq!(attrib_value(&attribs, 0x3098), Some(3));
    assert_eq!(attrib_value(&attribs, 0x3057), Some(64));
    // Nothing after EGL_NONE counts.
    assert_eq!(attrib_value(&attribs, 0x3056), None);
    assert_eq!(attrib_value(&[], 0x3098), None);
}

#[test]
fn test_call_list_checkpoint() {
    let mut list = CallList::new(TraceHeader::default());
    for tid in 0..5 {
        list.push(tid, "glFlush", Vec::new());
    }
    assert!(matches!(list.rollback(), Err(RetraceError::NoCheckpoint)));

    assert_eq!(list.next_call().unwrap().unwrap().call_no, 0);
    list.set_checkpoint();
    assert_eq!(list.next_call().unwrap().unwrap().call_no, 1);
    assert_eq!(list.next_call().unwrap().unwrap().call_no, 2);
    list.rollback().unwrap();
    assert_eq!(list.next_call().unwrap().unwrap().call_no, 1);

    list.seek(4).unwrap();
    assert_eq!(list.next_call().unwrap().unwrap().tid, 4);
    assert_eq!(list.next_call().unwrap(), None);
}
