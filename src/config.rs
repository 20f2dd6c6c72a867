//! Replay options.
//!
//! `RetraceOptions` starts from `Default`, takes the trace header's values
//! with `apply_header`, and is then overridden by a JSON parameter document
//! with `apply_json`. The JSON keys are the ones existing automation already
//! writes (`"frames"`, `"offscreen"`, `"loopTimes"`, ...), so they are
//! camelCase rather than Rust style.

use std::convert::TryFrom;
use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::callset::CallSet;
use crate::error::{Result, RetraceError};
use crate::trace_file::TraceHeader;

/// Framebuffer channel sizes, as EGL describes a config.
///
/// Negative values mean "don't care" when used as an override.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EglConfigInfo {
    #[serde(rename = "colorBitsRed")]
    pub red: i32,
    #[serde(rename = "colorBitsGreen")]
    pub green: i32,
    #[serde(rename = "colorBitsBlue")]
    pub blue: i32,
    #[serde(rename = "colorBitsAlpha")]
    pub alpha: i32,
    #[serde(rename = "depthBits")]
    pub depth: i32,
    #[serde(rename = "stencilBits")]
    pub stencil: i32,
    #[serde(rename = "msaaSamples")]
    pub msaa_samples: i32,
    #[serde(rename = "msaaSampleBuffers", default)]
    pub msaa_sample_buffers: i32,
}

impl EglConfigInfo {
    pub fn new(red: i32, green: i32, blue: i32, alpha: i32, depth: i32, stencil: i32) -> Self {
        EglConfigInfo {
            red,
            green,
            blue,
            alpha,
            depth,
            stencil,
            msaa_samples: 0,
            msaa_sample_buffers: 0,
        }
    }

    /// A config with every field "don't care".
    pub fn unspecified() -> EglConfigInfo {
        EglConfigInfo {
            red: -1,
            green: -1,
            blue: -1,
            alpha: -1,
            depth: -1,
            stencil: -1,
            msaa_samples: -1,
            msaa_sample_buffers: -1,
        }
    }

    /// Replace each of our fields with `other`'s, where `other` cares.
    pub fn override_with(&mut self, other: &EglConfigInfo) {
        fn pick(field: &mut i32, new: i32, name: &str) {
            if new >= 0 && new != *field {
                debug!("overriding {} from {} to {}", name, *field, new);
                *field = new;
            }
        }
        pick(&mut self.red, other.red, "EGL_RED_SIZE");
        pick(&mut self.green, other.green, "EGL_GREEN_SIZE");
        pick(&mut self.blue, other.blue, "EGL_BLUE_SIZE");
        pick(&mut self.alpha, other.alpha, "EGL_ALPHA_SIZE");
        pick(&mut self.depth, other.depth, "EGL_DEPTH_SIZE");
        pick(&mut self.stencil, other.stencil, "EGL_STENCIL_SIZE");
        pick(&mut self.msaa_samples, other.msaa_samples, "EGL_SAMPLES");
        pick(
            &mut self.msaa_sample_buffers,
            other.msaa_sample_buffers,
            "EGL_SAMPLE_BUFFERS",
        );
    }
}

/// How offscreen frames are tiled into the mosaic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MosaicLayout {
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_width: i32,
    pub tile_height: i32,
}

impl MosaicLayout {
    /// The number of tiles, once the layout is known to fit in a texture
    /// whose sides are `i32`s.
    pub fn tile_count(&self) -> Result<u32> {
        let out_of_bounds = || RetraceError::OutOfBounds(format!("mosaic layout {:?}", self));
        if self.tile_width <= 0 || self.tile_height <= 0 {
            return Err(out_of_bounds());
        }
        let side = |tile: i32, tiles: u32| i32::try_from(tiles).ok().and_then(|n| tile.checked_mul(n));
        side(self.tile_width, self.tiles_x).ok_or_else(out_of_bounds)?;
        side(self.tile_height, self.tiles_y).ok_or_else(out_of_bounds)?;
        match self.tiles_x.checked_mul(self.tiles_y) {
            Some(0) => Err(RetraceError::Config("mosaic has no tiles".to_string())),
            Some(count) => Ok(count),
            None => Err(out_of_bounds()),
        }
    }

    pub fn width(&self) -> i32 {
        self.tile_width.saturating_mul(self.tiles_x as i32)
    }

    pub fn height(&self) -> i32 {
        self.tile_height.saturating_mul(self.tiles_y as i32)
    }
}

impl Default for MosaicLayout {
    fn default() -> MosaicLayout {
        MosaicLayout {
            tiles_x: 10,
            tiles_y: 10,
            tile_width: 48,
            tile_height: 27,
        }
    }
}

/// The name of the on-screen framebuffer. iOS reserves framebuffer 0 and
/// hands the application 1 instead.
pub fn platform_on_screen_fbo() -> u32 {
    if cfg!(target_os = "ios") {
        1
    } else {
        0
    }
}

#[derive(Clone, Debug)]
pub struct RetraceOptions {
    /// The recorded thread whose swaps count frames.
    pub retrace_tid: u32,
    pub multi_thread: bool,

    pub begin_measure_frame: u32,
    /// The first frame that is *not* replayed.
    pub end_measure_frame: u32,
    pub loop_times: u32,
    pub loop_seconds: u32,

    pub window_width: i32,
    pub window_height: i32,
    pub api_version: u32,

    pub force_offscreen: bool,
    pub pbuffer_rendering: bool,
    pub force_single_window: bool,
    /// Render every window surface into this recorded surface; -1 for off.
    pub single_surface: i32,
    pub offscreen_config: EglConfigInfo,
    pub override_config: EglConfigInfo,
    pub mosaic: MosaicLayout,
    pub on_screen_fbo: u32,

    pub do_override_resolution: bool,
    pub override_width: i32,
    pub override_height: i32,
    pub override_ratio_w: f32,
    pub override_ratio_h: f32,

    /// Discard work this many frames before the measured range; -1 for off.
    pub skip_work: i32,
    pub flush_work: bool,
    pub finish_before_swap: bool,
    pub measure_per_frame: bool,
    pub measure_swap_time: bool,
    pub debug: u32,

    pub skip_call_set: Option<CallSet>,
    pub snapshot_call_set: Option<CallSet>,
    pub snapshot_prefix: String,
    /// Frames `[start, end]` in which fence waits are not executed.
    pub skip_fence_ranges: Vec<(u32, u32)>,

    pub link_error_whitelist: Vec<u32>,
    pub fail_on_shader_error: bool,
    pub shader_cache_file: Option<PathBuf>,
    pub shader_cache_required: bool,

    /// Pause for a step event every this many frames; 0 for off.
    pub step_frames: u32,
    /// Pause for a step event every this many draw calls; 0 for off.
    pub step_draws: u32,
}

impl Default for RetraceOptions {
    fn default() -> RetraceOptions {
        RetraceOptions {
            retrace_tid: 0,
            multi_thread: false,
            begin_measure_frame: 1,
            end_measure_frame: 9_999_999,
            loop_times: 0,
            loop_seconds: 0,
            window_width: 0,
            window_height: 0,
            api_version: 2,
            force_offscreen: false,
            pbuffer_rendering: false,
            force_single_window: false,
            single_surface: -1,
            offscreen_config: EglConfigInfo::new(8, 8, 8, 8, 24, 8),
            override_config: EglConfigInfo::unspecified(),
            mosaic: MosaicLayout::default(),
            on_screen_fbo: platform_on_screen_fbo(),
            do_override_resolution: false,
            override_width: -1,
            override_height: -1,
            override_ratio_w: 1.0,
            override_ratio_h: 1.0,
            skip_work: -1,
            flush_work: false,
            finish_before_swap: false,
            measure_per_frame: false,
            measure_swap_time: false,
            debug: 0,
            skip_call_set: None,
            snapshot_call_set: None,
            snapshot_prefix: String::new(),
            skip_fence_ranges: Vec::new(),
            link_error_whitelist: Vec::new(),
            fail_on_shader_error: false,
            shader_cache_file: None,
            shader_cache_required: false,
            step_frames: 0,
            step_draws: 0,
        }
    }
}

/// The JSON parameter document. Every field is optional; absent fields leave
/// the option alone.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct JsonParameters {
    frames: Option<String>,
    loop_times: Option<u32>,
    loop_seconds: Option<u32>,
    multithread: Option<bool>,
    tid: Option<u32>,
    offscreen: Option<bool>,
    noscreen: Option<bool>,
    force_single_window: Option<bool>,
    singlesurface: Option<i32>,
    override_resolution: Option<bool>,
    override_width: Option<i32>,
    override_height: Option<i32>,
    width: Option<i32>,
    height: Option<i32>,
    skip_work: Option<i32>,
    flush_work: Option<bool>,
    finish_before_swap: Option<bool>,
    measure_per_frame: Option<bool>,
    measure_swap_time: Option<bool>,
    debug: Option<bool>,
    skip_callset: Option<String>,
    snapshot_callset: Option<String>,
    snapshot_prefix: Option<String>,
    skip_fence: Option<String>,
    link_error_whitelist: Option<Vec<u32>>,
    #[serde(alias = "failOnShaderError")]
    override_fail_on_shader_error: Option<bool>,
    shader_cache: Option<String>,
    strict_shader_cache: Option<bool>,
    color_bits_red: Option<i32>,
    color_bits_green: Option<i32>,
    color_bits_blue: Option<i32>,
    color_bits_alpha: Option<i32>,
    depth_bits: Option<i32>,
    stencil_bits: Option<i32>,
    msaa_samples: Option<i32>,
    mosaic: Option<MosaicLayout>,
    step_frames: Option<u32>,
    step_draws: Option<u32>,
}

/// Parse `"start-end"` into a pair.
pub fn parse_frame_range(text: &str) -> Option<(u32, u32)> {
    let mut parts = text.trim().splitn(2, '-');
    let start = parts.next()?.trim().parse().ok()?;
    let end = parts.next()?.trim().parse().ok()?;
    Some((start, end))
}

impl RetraceOptions {
    /// Take defaults from the trace being replayed.
    pub fn apply_header(&mut self, header: &TraceHeader) {
        self.retrace_tid = header.default_tid;
        self.window_width = header.window_width;
        self.window_height = header.window_height;
        self.api_version = header.api_version;
        if let Some(config) = header.config {
            self.offscreen_config.override_with(&config);
        }
    }

    /// Override options from a JSON parameter document.
    pub fn apply_json(&mut self, json: &str) -> Result<()> {
        let params: JsonParameters = serde_json::from_str(json)?;

        if let Some(frames) = &params.frames {
            debug!("frame string: {}", frames);
            let (start, end) = parse_frame_range(frames).ok_or_else(|| {
                RetraceError::Config(format!("invalid frames parameter [ {} ]", frames))
            })?;
            if start >= end {
                return Err(RetraceError::Config(
                    "start frame must be lower than end frame (end frame is never played)"
                        .to_string(),
                ));
            }
            self.begin_measure_frame = start;
            self.end_measure_frame = end;
        }

        set(&mut self.loop_times, params.loop_times);
        set(&mut self.loop_seconds, params.loop_seconds);
        set(&mut self.multi_thread, params.multithread);
        set(&mut self.retrace_tid, params.tid);
        set(&mut self.force_offscreen, params.offscreen);
        set(&mut self.pbuffer_rendering, params.noscreen);
        set(&mut self.force_single_window, params.force_single_window);
        set(&mut self.single_surface, params.singlesurface);
        set(&mut self.skip_work, params.skip_work);
        set(&mut self.flush_work, params.flush_work);
        set(&mut self.finish_before_swap, params.finish_before_swap);
        set(&mut self.measure_per_frame, params.measure_per_frame);
        set(&mut self.measure_swap_time, params.measure_swap_time);
        set(&mut self.fail_on_shader_error, params.override_fail_on_shader_error);
        set(&mut self.shader_cache_required, params.strict_shader_cache);
        if let Some(mosaic) = params.mosaic {
            mosaic.tile_count()?;
            self.mosaic = mosaic;
        }
        set(&mut self.step_frames, params.step_frames);
        set(&mut self.step_draws, params.step_draws);
        if let Some(whitelist) = params.link_error_whitelist {
            self.link_error_whitelist = whitelist;
        }
        if let Some(debug) = params.debug {
            self.debug = debug as u32;
            if debug {
                info!("debug mode enabled");
            }
        }
        if let Some(prefix) = params.snapshot_prefix {
            self.snapshot_prefix = prefix;
        }
        if let Some(path) = params.shader_cache {
            self.shader_cache_file = Some(PathBuf::from(path));
        }
        if let Some(text) = &params.skip_callset {
            self.skip_call_set = Some(CallSet::parse(text)?);
        }
        if let Some(text) = &params.snapshot_callset {
            debug!("snapshotCallset = {}", text);
            self.snapshot_call_set = Some(CallSet::parse(text)?);
        }
        if let Some(fence) = &params.skip_fence {
            let range = parse_frame_range(fence).ok_or_else(|| {
                RetraceError::Config(format!("invalid skipFence parameter [ {} ]", fence))
            })?;
            self.skip_fence_ranges.push(range);
        }

        // Only very old traces lack a window size in their header.
        if let (Some(width), Some(height)) = (params.width, params.height) {
            if width > 0 && height > 0 {
                if self.window_width > 0 && (width, height) != (self.window_width, self.window_height) {
                    debug!("ignoring window size {}x{}: the trace header specifies it", width, height);
                } else {
                    self.window_width = width;
                    self.window_height = height;
                }
            }
        }

        self.override_config = EglConfigInfo {
            red: params.color_bits_red.unwrap_or(-1),
            green: params.color_bits_green.unwrap_or(-1),
            blue: params.color_bits_blue.unwrap_or(-1),
            alpha: params.color_bits_alpha.unwrap_or(-1),
            depth: params.depth_bits.unwrap_or(-1),
            stencil: params.stencil_bits.unwrap_or(-1),
            msaa_samples: params.msaa_samples.unwrap_or(-1),
            msaa_sample_buffers: -1,
        };
        if self.force_offscreen {
            let over = self.override_config;
            self.offscreen_config.override_with(&over);
        }

        set(&mut self.do_override_resolution, params.override_resolution);
        set(&mut self.override_width, params.override_width);
        set(&mut self.override_height, params.override_height);
        self.update_override_ratio()?;

        Ok(())
    }

    /// Recompute the resolution override ratio after any of its inputs change.
    pub fn update_override_ratio(&mut self) -> Result<()> {
        if !self.do_override_resolution {
            return Ok(());
        }
        if self.override_width < 0 || self.override_height < 0 {
            return Err(RetraceError::Config(
                "missing actual resolution when resolution override set".to_string(),
            ));
        }
        if self.window_width > 0 && self.window_height > 0 {
            self.override_ratio_w = self.override_width as f32 / self.window_width as f32;
            self.override_ratio_h = self.override_height as f32 / self.window_height as f32;
        }
        Ok(())
    }

    /// True if fence waits in `frame` should not be executed.
    pub fn skip_fence(&self, frame: u32) -> bool {
        self.skip_fence_ranges
            .iter()
            .any(|&(start, end)| frame >= start && frame <= end)
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

#[test]
fn test_apply_json() {
    let mut options = RetraceOptions::default();
    options.window_width = 1920;
    options.window_height = 1080;
    options
        .apply_json(
            r#"{
                "frames": "10-20",
                "loopTimes": 3,
                "multithread": true,
                "offscreen": true,
                "colorBitsAlpha": 0,
                "depthBits": 16,
                "overrideResolution": true,
                "overrideWidth": 960,
                "overrideHeight": 540,
                "skipFence": "3-5",
                "linkErrorWhitelist": [7, 9],
                "snapshotCallset": "100-200/frame"
            }"#,
        )
        .unwrap();
    assert_eq!((options.begin_measure_frame, options.end_measure_frame), (10, 20));
    assert_eq!(options.loop_times, 3);
    assert!(options.multi_thread);
    assert!(options.force_offscreen);
    assert_eq!(options.offscreen_config, EglConfigInfo::new(8, 8, 8, 0, 16, 8));
    assert_eq!(options.override_ratio_w, 0.5);
    assert_eq!(options.override_ratio_h, 0.5);
    assert!(options.skip_fence(4));
    assert!(!options.skip_fence(6));
    assert_eq!(options.link_error_whitelist, vec![7, 9]);
    assert!(options.snapshot_call_set.is_some());
}

#[test]
fn test_apply_json_errors() {
    let mut options = RetraceOptions::default();
    assert!(matches!(
        options.apply_json(r#"{ "frames": "20-10" }"#),
        Err(RetraceError::Config(_))
    ));
    assert!(matches!(
        options.apply_json(r#"{ "frames": "twenty" }"#),
        Err(RetraceError::Config(_))
    ));
    assert!(matches!(
        RetraceOptions::default().apply_json(r#"{ "overrideResolution": true }"#),
        Err(RetraceError::Config(_))
    ));
    assert!(matches!(
        RetraceOptions::default().apply_json("{ not json"),
        Err(RetraceError::Json(_))
    ));
}

#[test]
fn test_mosaic_bounds() {
    let mut options = RetraceOptions::default();
    options
        .apply_json(r#"{ "mosaic": { "tilesX": 4, "tilesY": 3, "tileWidth": 32, "tileHeight": 18 } }"#)
        .unwrap();
    assert_eq!(options.mosaic.tile_count().unwrap(), 12);
    assert_eq!((options.mosaic.width(), options.mosaic.height()), (128, 54));

    for json in &[
        r#"{ "mosaic": { "tilesX": 65536, "tilesY": 65536, "tileWidth": 1, "tileHeight": 1 } }"#,
        r#"{ "mosaic": { "tilesX": 4294967295, "tilesY": 1, "tileWidth": 1, "tileHeight": 1 } }"#,
        r#"{ "mosaic": { "tilesX": 100000, "tilesY": 1, "tileWidth": 100000, "tileHeight": 1 } }"#,
        r#"{ "mosaic": { "tileWidth": -48 } }"#,
    ] {
        let err = RetraceOptions::default().apply_json(json).unwrap_err();
        assert!(matches!(err, RetraceError::OutOfBounds(_)), "{}: {}", json, err);
        assert_eq!(err.kind(), crate::result::TraceErrorKind::ParameterOutOfBounds);
    }
    assert!(matches!(
        RetraceOptions::default().apply_json(r#"{ "mosaic": { "tilesY": 0 } }"#),
        Err(RetraceError::Config(_))
    ));
    // A rejected layout leaves the old one in place.
    let mut options = RetraceOptions::default();
    assert!(options.apply_json(r#"{ "mosaic": { "tilesX": 65536, "tilesY": 65536 } }"#).is_err());
    assert_eq!(options.mosaic, MosaicLayout::default());
}
