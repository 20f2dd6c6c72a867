//! Measuring the frames in the measurement window.
//!
//! The retracer knows nothing about what instrumentation is collecting; it
//! only calls the `FrameObserver` hooks at frame boundaries and asks each
//! observer for its results at the end of the run.

use std::time::{Duration, Instant};

use serde_json::{json, Value};

/// Frame-boundary callbacks.
///
/// `on_frame_complete` and `on_new_frame` are called once per swap on the
/// measured thread, in that order, with the frame number current at the time.
pub trait FrameObserver: Send {
    /// Measurement begins at the start of `frame`.
    fn start(&mut self, _frame: u32) {}

    /// The frame's last call has been replayed; the swap is about to happen.
    fn on_frame_complete(&mut self, _frame: u32) {}

    /// A frame inside the measurement window has just been presented.
    fn on_new_frame(&mut self, _frame: u32) {}

    fn stop(&mut self) {}

    /// A name and a JSON value to include in the result file, if any.
    fn results(&self) -> Option<(String, Value)> {
        None
    }
}

/// Start and end of the measurement window.
#[derive(Clone, Copy, Debug)]
pub struct Timer {
    started: Instant,
}

impl Timer {
    pub fn start() -> Timer {
        Timer {
            started: Instant::now(),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Frames per second, or zero for an empty or instantaneous interval.
pub fn fps(frames: u32, seconds: f64) -> f64 {
    if frames == 0 || seconds <= 0.0 {
        0.0
    } else {
        f64::from(frames) / seconds
    }
}

/// Records how long each measured frame took, and optionally how long the
/// swap at its end took.
#[derive(Debug, Default)]
pub struct FrameTimes {
    measure_swap: bool,
    frame_start: Option<Instant>,
    swap_start: Option<Instant>,
    frames: Vec<f64>,
    swaps: Vec<f64>,
}

impl FrameTimes {
    pub fn new(measure_swap: bool) -> FrameTimes {
        FrameTimes {
            measure_swap,
            ..FrameTimes::default()
        }
    }

    /// Frame durations in seconds, in frame order.
    pub fn frame_durations(&self) -> &[f64] {
        &self.frames
    }
}

impl FrameObserver for FrameTimes {
    fn start(&mut self, _frame: u32) {
        self.frame_start = Some(Instant::now());
        self.frames.clear();
        self.swaps.clear();
    }

    fn on_frame_complete(&mut self, _frame: u32) {
        if self.measure_swap {
            self.swap_start = Some(Instant::now());
        }
    }

    fn on_new_frame(&mut self, _frame: u32) {
        let now = Instant::now();
        if let Some(start) = self.frame_start.replace(now) {
            self.frames.push((now - start).as_secs_f64());
        }
        if let Some(swap) = self.swap_start.take() {
            self.swaps.push((now - swap).as_secs_f64());
        }
    }

    fn results(&self) -> Option<(String, Value)> {
        let mut value = json!({ "frame_time": self.frames });
        if self.measure_swap {
            value["swap_time"] = json!(self.swaps);
        }
        Some(("frame_times".to_string(), value))
    }
}

#[test]
fn test_fps() {
    assert_eq!(fps(10, 0.5), 20.0);
    assert_eq!(fps(0, 1.0), 0.0);
    assert_eq!(fps(10, 0.0), 0.0);
}

#[test]
fn test_frame_times() {
    let mut times = FrameTimes::new(true);
    // Frames before measurement starts aren't counted.
    times.on_new_frame(0);
    assert!(times.frame_durations().is_empty());

    times.start(1);
    for frame in 1..4 {
        times.on_frame_complete(frame);
        times.on_new_frame(frame);
    }
    assert_eq!(times.frame_durations().len(), 3);

    let (name, value) = times.results().unwrap();
    assert_eq!(name, "frame_times");
    assert_eq!(value["swap_time"].as_array().unwrap().len(), 3);
}
