//! Sets of call numbers, used to pick calls to skip or snapshot.
//!
//! The syntax is:
//!
//! ```text
//! set       = '@' filename
//!           | range ( ','? range )*
//! range     = interval ( '/' frequency )?
//! interval  = '*' | number | number '-' number
//! frequency = divisor | "frame" | "rendertarget" | "fbo" | "render" | "draw"
//! ```
//!
//! A range with a divisor contains every `divisor`th call from its start. A
//! range with a named frequency contains only the calls in it that are of the
//! given kind: swaps for `frame`, framebuffer binds for `rendertarget`, and
//! draws for `draw`.

use std::fs;

use crate::error::{Result, RetraceError};

/// The kinds of call a range can be restricted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frequency {
    All,
    Frame,
    RenderTarget,
    Draw,
}

impl Frequency {
    /// Classify a call by its function name. Calls that are none of the
    /// special kinds return `None`.
    pub fn of_function(name: &str) -> Option<Frequency> {
        if name.starts_with("eglSwapBuffers") {
            Some(Frequency::Frame)
        } else if name == "glBindFramebuffer" {
            Some(Frequency::RenderTarget)
        } else if DRAW_CALLS.contains(&name) {
            Some(Frequency::Draw)
        } else {
            None
        }
    }
}

const DRAW_CALLS: &[&str] = &[
    "glDrawElements",
    "glDrawArrays",
    "glDrawArraysInstanced",
    "glDrawElementsInstanced",
    "glDrawArraysIndirect",
    "glDrawElementsIndirect",
    "glDrawRangeElements",
    "glBlitFramebuffer",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallRange {
    pub start: u32,
    pub stop: u32,
    pub step: u32,
    pub frequency: Frequency,
}

impl CallRange {
    pub fn contains(&self, call_no: u32, function: &str) -> bool {
        if call_no < self.start || call_no > self.stop || (call_no - self.start) % self.step != 0 {
            return false;
        }
        match self.frequency {
            Frequency::All => true,
            freq => Frequency::of_function(function) == Some(freq),
        }
    }
}

/// A set of call numbers: a list of ranges sorted by start.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallSet {
    ranges: Vec<CallRange>,
}

impl CallSet {
    /// Parse `text`. A leading `@` names a file holding the set, one or more
    /// ranges per line, with `#` comments.
    pub fn parse(text: &str) -> Result<CallSet> {
        let text = text.trim();
        if let Some(path) = text.strip_prefix('@') {
            let contents = fs::read_to_string(path)?;
            let mut set = CallSet::default();
            for line in contents.lines() {
                let line = line.split('#').next().unwrap_or("").trim();
                if !line.is_empty() {
                    set.parse_ranges(line)?;
                }
            }
            return Ok(set);
        }

        let mut set = CallSet::default();
        set.parse_ranges(text)?;
        Ok(set)
    }

    fn parse_ranges(&mut self, text: &str) -> Result<()> {
        for item in text.split(|c: char| c == ',' || c.is_whitespace()) {
            if !item.is_empty() {
                self.add_range(parse_range(item)?);
            }
        }
        Ok(())
    }

    pub fn add_range(&mut self, range: CallRange) {
        if range.start > range.stop {
            return;
        }
        let at = self
            .ranges
            .iter()
            .position(|r| r.start >= range.start)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(at, range);
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, call_no: u32, function: &str) -> bool {
        self.ranges
            .iter()
            .take_while(|range| range.start <= call_no)
            .any(|range| range.contains(call_no, function))
    }
}

fn invalid(item: &str) -> RetraceError {
    RetraceError::Config(format!("invalid call set range: {:?}", item))
}

fn parse_range(item: &str) -> Result<CallRange> {
    let (interval, frequency) = match item.find('/') {
        Some(slash) => (&item[..slash], Some(&item[slash + 1..])),
        None => (item, None),
    };

    let (start, stop) = if interval == "*" {
        (0, u32::max_value())
    } else if let Some(dash) = interval.find('-') {
        let start = interval[..dash].parse().map_err(|_| invalid(item))?;
        let stop = interval[dash + 1..].parse().map_err(|_| invalid(item))?;
        (start, stop)
    } else {
        let n = interval.parse().map_err(|_| invalid(item))?;
        (n, n)
    };

    let (step, frequency) = match frequency {
        None => (1, Frequency::All),
        Some("frame") => (1, Frequency::Frame),
        Some("rendertarget") | Some("fbo") => (1, Frequency::RenderTarget),
        Some("render") | Some("draw") => (1, Frequency::Draw),
        Some(divisor) => {
            let step: u32 = divisor.parse().map_err(|_| invalid(item))?;
            if step == 0 {
                return Err(invalid(item));
            }
            (step, Frequency::All)
        }
    };

    Ok(CallRange {
        start,
        stop,
        step,
        frequency,
    })
}

#[test]
fn test_parse_and_contains() {
    let set = CallSet::parse("5, 10-20/5 30-40/frame,*/draw").unwrap();
    assert!(set.contains(5, "glFlush"));
    assert!(!set.contains(6, "glFlush"));
    assert!(set.contains(10, "glFlush"));
    assert!(set.contains(15, "glFlush"));
    assert!(!set.contains(16, "glFlush"));
    assert!(set.contains(35, "eglSwapBuffers"));
    assert!(set.contains(35, "eglSwapBuffersWithDamageKHR"));
    assert!(!set.contains(35, "glClear"));
    assert!(set.contains(1000, "glDrawArrays"));
    assert!(!set.contains(1000, "glBindTexture"));
}

#[test]
fn test_parse_errors() {
    assert!(CallSet::parse("1-x").is_err());
    assert!(CallSet::parse("3/0").is_err());
    assert!(CallSet::parse("abc").is_err());
    assert!(CallSet::parse("").unwrap().is_empty());
    // Backwards ranges are dropped, not errors.
    assert!(CallSet::parse("9-3").unwrap().is_empty());
}

#[test]
fn test_parse_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# calls to snapshot").unwrap();
    writeln!(file, "1-3 # first few").unwrap();
    writeln!(file, "100").unwrap();
    let set = CallSet::parse(&format!("@{}", file.path().display())).unwrap();
    assert!(set.contains(2, "glClear"));
    assert!(set.contains(100, "glClear"));
    assert!(!set.contains(50, "glClear"));
}
