//! The dispatch loop, and the state it threads through every replay function.
//!
//! A `Retracer` is everything a replay function may touch: the options, the
//! `StateRegistry`, the window system, the frame counters and measurement
//! window, and the result writer. A `RetraceEngine` owns a `Retracer` along
//! with the call source and dispatch table, and drives the replay: it pulls
//! calls one at a time, decides whether and where each should run, and hands
//! the `Retracer` to the replay function on the right thread.
//!
//! Frame numbering: `cur_frame` counts presented frames on the measured
//! thread (`RetraceOptions::retrace_tid`), and is advanced by the swap replay
//! functions through `on_new_frame`. `dispatch_frame` counts swaps on that
//! thread as the dispatcher sees them go by, whether or not they were
//! executed; call-set and skip-work decisions are made against it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gleam::gl;
use log::{debug, error, info, warn};
use serde_json::{Map, Value};

use crate::call::{ArgCursor, CallSource};
use crate::config::RetraceOptions;
use crate::driver::{error_name, Driver};
use crate::egl;
use crate::error::{Result, RetraceError};
use crate::measure::{fps, FrameObserver, FrameTimes, Timer};
use crate::offscreen::OffscreenCompositor;
use crate::registry::{DispatchTable, Entry};
use crate::resource::Resources;
use crate::result::{FrameResult, ResultWriter, RunReport, TraceErrorKind};
use crate::scheduler::{Job, Scheduler};
use crate::shader_cache::ShaderCache;
use crate::snapshot;
use crate::state::{ContextHandle, StateRegistry};
use crate::window::WindowSystem;

/// Called once a fatal error has been reported. The binary aborts the
/// process; tests just record the message.
pub type Terminator = Box<dyn Fn(&str) + Send>;

/// Functions after which skip-work discards the framebuffer contents.
const DISCARD_BEFORE: &[&str] = &["glReadPixels", "glFlush", "glFinish", "glBindFramebuffer"];

pub struct Retracer {
    pub options: RetraceOptions,
    pub state: StateRegistry,
    pub(crate) window: Box<dyn WindowSystem>,
    results: Box<dyn ResultWriter>,
    terminator: Terminator,
    observers: Vec<Box<dyn FrameObserver>>,
    pub(crate) shader_cache: Option<ShaderCache>,

    finish: Arc<AtomicBool>,
    /// The measurement window is over, or something went wrong that ends
    /// the run without aborting it.
    stop_requested: bool,
    aborted: bool,

    pub cur_call_no: u32,
    pub cur_tid: u32,
    pub cur_frame: u32,
    pub dispatch_frame: u32,

    timer: Option<Timer>,
    first_timer: Option<Timer>,
    loop_fps: Vec<f64>,
    loops_done: u32,
    rollback_pending: bool,
    checkpoint_pending: bool,
    /// A swap actually presented something since the dispatcher last looked.
    pub(crate) present_pending: bool,

    pub failed_to_link: bool,
    pub out_of_memory: bool,

    /// Offscreen frames are in the mosaic that haven't been presented yet.
    pub(crate) mosaic_needs_flush: bool,
    /// The last surface and context an offscreen frame was drawn with, by
    /// recorded id, and the thread that drew it.
    pub(crate) last_non_zero_draw: Option<u64>,
    pub(crate) last_non_zero_ctx: Option<u64>,
    pub(crate) last_swap_tid: Option<u32>,

    frame_budget: u32,
    draw_budget: u32,
}

impl Retracer {
    pub fn new(
        options: RetraceOptions,
        window: Box<dyn WindowSystem>,
        results: Box<dyn ResultWriter>,
        terminator: Terminator,
    ) -> Result<Retracer> {
        let shader_cache = match &options.shader_cache_file {
            Some(path) => Some(ShaderCache::open(path, options.shader_cache_required)?),
            None => None,
        };
        let mut observers: Vec<Box<dyn FrameObserver>> = Vec::new();
        if options.measure_per_frame {
            observers.push(Box::new(FrameTimes::new(options.measure_swap_time)));
        }
        let frame_budget = options.step_frames;
        let draw_budget = options.step_draws;

        Ok(Retracer {
            options,
            state: StateRegistry::new(),
            window,
            results,
            terminator,
            observers,
            shader_cache,
            finish: Arc::new(AtomicBool::new(false)),
            stop_requested: false,
            aborted: false,
            cur_call_no: 0,
            cur_tid: 0,
            cur_frame: 0,
            dispatch_frame: 0,
            timer: None,
            first_timer: None,
            loop_fps: Vec::new(),
            loops_done: 0,
            rollback_pending: false,
            checkpoint_pending: false,
            present_pending: false,
            failed_to_link: false,
            out_of_memory: false,
            mosaic_needs_flush: false,
            last_non_zero_draw: None,
            last_non_zero_ctx: None,
            last_swap_tid: None,
            frame_budget,
            draw_budget,
        })
    }

    pub fn add_observer(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.push(observer);
    }

    pub fn driver(&self) -> &dyn Driver {
        self.window.driver()
    }

    pub fn window_mut(&mut self) -> &mut dyn WindowSystem {
        &mut *self.window
    }

    /// The flag that stops the run and every worker thread.
    pub fn finish_flag(&self) -> Arc<AtomicBool> {
        self.finish.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.stop_requested || self.finish.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn loop_fps(&self) -> &[f64] {
        &self.loop_fps
    }

    pub fn current_context(&self) -> Option<ContextHandle> {
        self.state.current_context(self.cur_tid)
    }

    pub fn current_resources(&mut self) -> Option<Resources<'_>> {
        self.state.current_resources(self.cur_tid)
    }

    /// Run `f` on the current context's offscreen compositor, if it has one.
    pub fn with_offscreen<R, F>(&mut self, f: F) -> Option<R>
    where
        F: FnOnce(&mut OffscreenCompositor, &dyn Driver) -> R,
    {
        let handle = self.state.current_context(self.cur_tid)?;
        let offscreen = self.state.context_mut(handle)?.offscreen.as_mut()?;
        Some(f(offscreen, self.window.driver()))
    }

    /// Run one call's replay function.
    pub(crate) fn execute(&mut self, entry: &Entry, args: &[u8]) -> Result<()> {
        let mut cursor = ArgCursor::new(args);
        (entry.func)(self, &mut cursor)?;

        if entry.check_error && self.options.debug > 0 {
            let error = self.driver().get_error();
            if error != gl::NO_ERROR {
                warn!(
                    "[c{},f{}] {}: {}",
                    self.cur_call_no,
                    self.cur_frame,
                    entry.name,
                    error_name(error)
                );
                if error == gl::OUT_OF_MEMORY {
                    self.out_of_memory = true;
                }
            }
        }
        Ok(())
    }

    /// The frame's last call has run, and its swap is next.
    pub fn on_frame_complete(&mut self) {
        if self.cur_tid != self.options.retrace_tid {
            return;
        }
        if self.in_measured_window() {
            let frame = self.cur_frame;
            for observer in &mut self.observers {
                observer.on_frame_complete(frame);
            }
        }
    }

    /// The frame has been presented.
    pub fn on_new_frame(&mut self) {
        if self.cur_tid != self.options.retrace_tid {
            return;
        }
        self.cur_frame += 1;
        let begin = self.options.begin_measure_frame;
        let end = self.options.end_measure_frame;

        if self.cur_frame == begin {
            if self.options.flush_work {
                self.flush_work();
            }
            self.start_measuring();
        }
        if self.cur_frame > begin && self.cur_frame <= end {
            let frame = self.cur_frame;
            for observer in &mut self.observers {
                observer.on_new_frame(frame);
            }
        }

        if self.out_of_memory || self.failed_to_link {
            self.stop_requested = true;
        } else if self.cur_frame >= end {
            self.end_of_window();
        }
        self.step_frame();
    }

    fn in_measured_window(&self) -> bool {
        self.cur_frame >= self.options.begin_measure_frame
            && self.cur_frame < self.options.end_measure_frame
    }

    /// Force outstanding GPU and compiler work to complete before measuring.
    fn flush_work(&mut self) {
        let driver = self.window.driver();
        driver.flush();
        if let Some(mut resources) = self.state.current_resources(self.cur_tid) {
            for (_, program) in resources.programs().live_entries() {
                driver.get_program_iv(program, gl::PROGRAM_BINARY_LENGTH);
            }
        }
    }

    pub(crate) fn start_measuring(&mut self) {
        let frame = self.cur_frame;
        for observer in &mut self.observers {
            observer.start(frame);
        }
        info!("================== Start timer (Frame: {}) ==================", frame);
        let timer = Timer::start();
        self.timer = Some(timer);
        self.first_timer.get_or_insert(timer);
        self.checkpoint_pending = true;
    }

    fn end_of_window(&mut self) {
        let elapsed = self.first_timer.map_or(0.0, |t| t.elapsed().as_secs_f64());
        let more = self.loops_done < self.options.loop_times
            || (self.options.loop_seconds > 0 && elapsed < f64::from(self.options.loop_seconds));
        if !more {
            self.stop_requested = true;
            return;
        }

        if let Some(timer) = self.timer {
            let frames = self.options.end_measure_frame - self.options.begin_measure_frame;
            let loop_fps = fps(frames, timer.elapsed().as_secs_f64());
            info!("Loop {} FPS = {}", self.loops_done, loop_fps);
            self.loop_fps.push(loop_fps);
        }
        self.loops_done += 1;
        self.rollback_pending = true;
    }

    /// Start the next loop: the dispatcher has rewound the call source.
    fn restart_loop(&mut self) {
        let begin = self.options.begin_measure_frame;
        debug!("rolling back to frame {}", begin);
        self.cur_frame = begin;
        self.dispatch_frame = begin;
        for observer in &mut self.observers {
            observer.start(begin);
        }
        self.timer = Some(Timer::start());
    }

    fn step_frame(&mut self) {
        if self.options.step_frames == 0 || !self.window.steppable() {
            return;
        }
        self.frame_budget = self.frame_budget.saturating_sub(1);
        if self.frame_budget == 0 {
            self.window.process_step_event();
            self.frame_budget = self.options.step_frames;
        }
    }

    pub(crate) fn on_draw(&mut self) {
        if self.options.step_draws == 0 || !self.window.steppable() {
            return;
        }
        self.draw_budget = self.draw_budget.saturating_sub(1);
        if self.draw_budget == 0 {
            self.window.process_step_event();
            self.draw_budget = self.options.step_draws;
        }
    }

    /// Report a fatal error and end the run.
    ///
    /// Writes exactly one error result, however many times this is called,
    /// sets the finish flag and calls the terminator. The returned error is
    /// for the caller to propagate; nothing else should report it again.
    pub fn report_and_abort(&mut self, msg: &str) -> RetraceError {
        self.abort_with(TraceErrorKind::Generic, msg)
    }

    pub fn abort_with(&mut self, kind: TraceErrorKind, msg: &str) -> RetraceError {
        let text = format!("[c{},f{}] {}", self.cur_call_no, self.cur_frame, msg);
        if self.aborted {
            return RetraceError::Aborted(text);
        }
        self.aborted = true;
        error!("{}", text);
        if let Err(e) = self.results.write(&RunReport::error(kind, &text)) {
            error!("error writing result file: {}", e);
        }
        self.finish.store(true, Ordering::SeqCst);
        (self.terminator)(&text);
        RetraceError::Aborted(text)
    }

    pub fn save_result(&mut self) -> Result<()> {
        let begin = self.options.begin_measure_frame;
        let (frames, time) = match self.timer {
            Some(timer) => {
                let time = timer.elapsed().as_secs_f64();
                let frames = self.cur_frame.saturating_sub(begin);
                info!("================== End timer (Frame: {}) ==================", self.cur_frame);
                info!("Duration = {}", time);
                info!("Frame cnt = {}, FPS = {}", frames, fps(frames, time));
                (frames, time)
            }
            None => {
                info!("Never rendered anything.");
                (0, 0.0)
            }
        };

        let mut frame_data = Map::new();
        for observer in &mut self.observers {
            observer.stop();
            if let Some((name, value)) = observer.results() {
                frame_data.insert(name, value);
            }
        }

        let report = RunReport::Success(FrameResult {
            frames,
            time,
            fps: fps(frames, time),
            start: begin,
            end: self.cur_frame,
            loop_fps: self.loop_fps.clone(),
            fb_config: self.window.selected_config(),
            frame_data: if frame_data.is_empty() {
                None
            } else {
                Some(Value::Object(frame_data))
            },
        });
        info!("Saving results...");
        if let Err(e) = self.results.write(&report) {
            return Err(self.report_and_abort(&format!("Error writing result file: {}", e)));
        }
        Ok(())
    }

    fn save_out_of_memory(&mut self) {
        let text = format!(
            "[c{},f{}] the driver ran out of memory",
            self.cur_call_no, self.cur_frame
        );
        error!("{}", text);
        if let Err(e) = self
            .results
            .write(&RunReport::error(TraceErrorKind::OutOfMemory, &text))
        {
            error!("error writing result file: {}", e);
        }
    }

    /// Present whatever is left in the mosaic at the end of the run, making
    /// the last offscreen surface and context current again to do it.
    pub fn force_render_mosaic_to_screen(&mut self) -> Result<()> {
        if !self.mosaic_needs_flush {
            return Ok(());
        }
        let (tid, draw, ctx) =
            match (self.last_swap_tid, self.last_non_zero_draw, self.last_non_zero_ctx) {
                (Some(tid), Some(draw), Some(ctx)) => (tid, draw, ctx),
                _ => return Ok(()),
            };
        self.cur_tid = tid;

        if self.state.get_drawable(draw).is_none() {
            let win = self.state.window_of(draw).unwrap_or(0);
            debug!("recreating surface {:#x} on window {} to flush the mosaic", draw, win);
            egl::create_window_surface(self, 0, 0, win, &[], draw)?;
        }
        egl::make_current(self, 0, draw, draw, ctx)?;

        let flushed = self
            .with_offscreen(|offscreen, driver| offscreen.mosaic_to_screen_if_needed(driver, true))
            .unwrap_or(false);
        if flushed && egl::swap_current_drawable(self) {
            self.present_pending = true;
        } else {
            warn!("could not present the last mosaic");
        }
        self.mosaic_needs_flush = false;
        Ok(())
    }

    /// Tell the driver the current framebuffer's contents won't be needed.
    pub fn discard_framebuffers(&self) {
        let driver = self.driver();
        if driver.get_integer(gl::DRAW_FRAMEBUFFER_BINDING) != 0 {
            driver.invalidate_framebuffer(
                gl::FRAMEBUFFER,
                &[
                    gl::COLOR_ATTACHMENT0,
                    gl::COLOR_ATTACHMENT1,
                    gl::COLOR_ATTACHMENT2,
                    gl::COLOR_ATTACHMENT3,
                    gl::DEPTH_ATTACHMENT,
                    gl::STENCIL_ATTACHMENT,
                ],
            );
        } else {
            driver.invalidate_framebuffer(gl::FRAMEBUFFER, &[gl::COLOR, gl::DEPTH, gl::STENCIL]);
        }
    }

    /// Write the current framebuffer to a PNG file.
    pub fn take_snapshot(&mut self, call_no: u32, frame: Option<u32>) {
        let (width, height) = match self.bind_snapshot_source() {
            Some(size) => size,
            None => {
                warn!("nothing is current to snapshot at call {}", call_no);
                return;
            }
        };
        let pixels = snapshot::read_framebuffer(self.driver(), width, height);
        let path = snapshot::snapshot_path(&self.options.snapshot_prefix, call_no, frame);
        match snapshot::write_png(&path, &pixels, width as u32, height as u32) {
            Ok(()) => debug!("wrote snapshot {}", path.display()),
            Err(e) => warn!("could not write snapshot {}: {}", path.display(), e),
        }
        self.restore_read_framebuffer();
    }

    fn bind_snapshot_source(&mut self) -> Option<(i32, i32)> {
        if let Some(size) = self.with_offscreen(|offscreen, driver| {
            offscreen.bind_offscreen_read_fbo(driver);
            offscreen.size()
        }) {
            return Some(size);
        }
        let drawable = self.state.current_drawable(self.cur_tid)?;
        let drawable = self.state.drawable(drawable)?;
        Some((
            (drawable.width as f32 * drawable.ratio_w).round() as i32,
            (drawable.height as f32 * drawable.ratio_h).round() as i32,
        ))
    }

    fn restore_read_framebuffer(&mut self) {
        let handle = match self.current_context() {
            Some(handle) => handle,
            None => return,
        };
        if let Some(context) = self.state.context(handle) {
            if context.offscreen.is_some() && context.current_framebuffer != 0 {
                let live = context.framebuffers.get(context.current_framebuffer);
                self.window.driver().bind_framebuffer(gl::READ_FRAMEBUFFER, live);
            }
        }
    }

    /// Destroy every context and surface we created.
    fn reset_state(&mut self) {
        let Retracer { state, window, .. } = self;
        state.reset(&mut **window);
    }
}

fn lost_retracer() -> RetraceError {
    RetraceError::Platform("the retracer was lost with a worker thread".to_string())
}

fn retracer_in(slot: &mut Option<Box<Retracer>>) -> Result<&mut Retracer> {
    slot.as_mut().map(|r| &mut **r).ok_or_else(lost_retracer)
}

/// Drives a `Retracer` through a trace.
pub struct RetraceEngine {
    /// `None` only while a worker thread has it.
    retracer: Option<Box<Retracer>>,
    source: Box<dyn CallSource>,
    dispatch: DispatchTable,
    scheduler: Scheduler,
    last_tid: Option<u32>,
    skipped_calls: u64,
    finished: bool,
}

impl RetraceEngine {
    pub fn new(
        retracer: Retracer,
        source: Box<dyn CallSource>,
        mut dispatch: DispatchTable,
    ) -> RetraceEngine {
        dispatch.bind(source.functions());
        let scheduler = Scheduler::new(retracer.finish_flag());
        RetraceEngine {
            retracer: Some(Box::new(retracer)),
            source,
            dispatch,
            scheduler,
            last_tid: None,
            skipped_calls: 0,
            finished: false,
        }
    }

    pub fn retracer(&self) -> Option<&Retracer> {
        self.retracer.as_deref()
    }

    pub fn retracer_mut(&mut self) -> Option<&mut Retracer> {
        self.retracer.as_deref_mut()
    }

    /// Calls on other threads passed over in single-thread mode.
    pub fn skipped_calls(&self) -> u64 {
        self.skipped_calls
    }

    /// Setting the returned flag stops the run at the next call.
    pub fn stop_handle(&self) -> Option<Arc<AtomicBool>> {
        self.retracer.as_ref().map(|r| r.finish_flag())
    }

    /// Replay the whole trace.
    pub fn run(&mut self) -> Result<()> {
        while self.retrace_until_swap_buffers()? {}
        Ok(())
    }

    /// Replay until something is presented. Return false once the run is
    /// over.
    ///
    /// Any error ends the run. Errors that haven't been reported yet are
    /// reported through `Retracer::abort_with`, so the caller always gets
    /// `RetraceError::Aborted`.
    pub fn retrace_until_swap_buffers(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        match self.dispatch_until_present() {
            Ok(more) => Ok(more),
            Err(RetraceError::Aborted(text)) => {
                self.finished = true;
                self.scheduler.shutdown();
                Err(RetraceError::Aborted(text))
            }
            Err(err) => {
                self.finished = true;
                let aborted = match self.retracer.as_mut() {
                    Some(retracer) => retracer.abort_with(err.kind(), &err.to_string()),
                    None => {
                        error!("{}", err);
                        RetraceError::Aborted(err.to_string())
                    }
                };
                self.scheduler.shutdown();
                Err(aborted)
            }
        }
    }

    fn dispatch_until_present(&mut self) -> Result<bool> {
        loop {
            let retracer = retracer_in(&mut self.retracer)?;
            let begin = retracer.options.begin_measure_frame;
            let end = retracer.options.end_measure_frame;

            if begin == 0 && retracer.cur_frame == 0 && retracer.timer.is_none() {
                retracer.start_measuring();
            }
            if retracer.rollback_pending {
                retracer.rollback_pending = false;
                self.source.rollback()?;
                retracer.restart_loop();
            }
            if retracer.checkpoint_pending {
                retracer.checkpoint_pending = false;
                self.source.set_checkpoint();
            }
            if retracer.is_finished() {
                self.finish_run()?;
                return Ok(false);
            }

            let call = match self.source.next_call()? {
                Some(call) => call,
                None => {
                    self.finish_run()?;
                    return Ok(false);
                }
            };

            let retracer = retracer_in(&mut self.retracer)?;
            let options = &retracer.options;
            if !options.multi_thread && call.tid != options.retrace_tid {
                self.skipped_calls += 1;
                continue;
            }

            let name = self.source.functions().name(call.function).unwrap_or("");
            let entry = self.dispatch.get(call.function).cloned();
            let is_swap = name.starts_with("eglSwapBuffers");
            let frame = retracer.dispatch_frame;
            let call_no = call.call_no;

            let (frame_snapshot, call_snapshot) = match &options.snapshot_call_set {
                Some(set) if is_swap => (set.contains(frame, name), false),
                Some(set) => (false, set.contains(call_no, name)),
                None => (false, false),
            };
            let mut skipped = options
                .skip_call_set
                .as_ref()
                .map_or(false, |set| set.contains(call_no, name));
            let mut discard = false;
            if options.skip_work >= 0 {
                let first_worked = begin.saturating_sub(options.skip_work as u32);
                if frame < first_worked || frame >= end {
                    if is_swap || DISCARD_BEFORE.contains(&name) {
                        discard = true;
                    } else if name.starts_with("glDispatchCompute") {
                        skipped = true;
                    }
                }
            }
            if options.debug > 0 {
                debug!(
                    "    {} : c{} f{}{}{}",
                    name,
                    call_no,
                    frame,
                    if skipped { " (skipped)" } else { "" },
                    if discard { " (discarded)" } else { "" }
                );
                if entry.is_none() && !skipped {
                    debug!("Unsupported function {} at call {}", name, call_no);
                }
            }

            retracer.cur_call_no = call_no;
            retracer.cur_tid = call.tid;
            let args = call.args;
            let job: Job = Box::new(move |r: &mut Retracer| {
                if frame_snapshot {
                    r.take_snapshot(call_no.saturating_sub(1), Some(frame));
                }
                if discard {
                    r.discard_framebuffers();
                }
                if skipped {
                    return Ok(());
                }
                if let Some(entry) = &entry {
                    r.execute(entry, &args)?;
                }
                if call_snapshot {
                    r.take_snapshot(call_no, None);
                }
                Ok(())
            });
            self.run_job(call.tid, job)?;
            self.last_tid = Some(call.tid);

            let retracer = retracer_in(&mut self.retracer)?;
            if is_swap && call.tid == retracer.options.retrace_tid {
                retracer.dispatch_frame += 1;
            }
            if !retracer.rollback_pending
                && (retracer.dispatch_frame >= end || retracer.out_of_memory || retracer.failed_to_link)
            {
                retracer.stop_requested = true;
            }
            if retracer.present_pending {
                retracer.present_pending = false;
                return Ok(true);
            }
        }
    }

    /// Run `job` with the retracer on the thread for `tid`.
    fn run_job(&mut self, tid: u32, job: Job) -> Result<()> {
        let mut retracer = self.retracer.take().ok_or_else(lost_retracer)?;
        if !retracer.options.multi_thread {
            let result = job(&mut *retracer);
            self.retracer = Some(retracer);
            return result;
        }
        let (retracer, result) = self.scheduler.run_on(tid, retracer, job)?;
        self.retracer = Some(retracer);
        result
    }

    /// Present any unflushed mosaic, write the results and tear down every
    /// context and surface.
    fn finish_run(&mut self) -> Result<()> {
        self.finished = true;
        let retracer = retracer_in(&mut self.retracer)?;
        let mosaic_tid = if retracer.options.force_offscreen {
            retracer.last_swap_tid
        } else {
            None
        };
        if let Some(tid) = mosaic_tid {
            self.run_job(tid, Box::new(|r: &mut Retracer| r.force_render_mosaic_to_screen()))?;
        }
        if let Some(tid) = self.last_tid {
            self.run_job(
                tid,
                Box::new(|r: &mut Retracer| {
                    r.driver().finish();
                    Ok(())
                }),
            )?;
        }

        let retracer = retracer_in(&mut self.retracer)?;
        retracer.window.cleanup();
        if retracer.out_of_memory {
            retracer.save_out_of_memory();
        } else {
            retracer.save_result()?;
        }
        retracer.reset_state();
        self.scheduler.shutdown();
        debug!("{} calls on other threads were skipped", self.skipped_calls);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{ArgWriter, CallList};
    use crate::callset::CallSet;
    use crate::testing::{FakeWindowSystem, MemoryResultWriter};
    use crate::trace_file::TraceHeader;
    use parking_lot::Mutex;
    use std::thread;

    struct Harness {
        window: FakeWindowSystem,
        results: MemoryResultWriter,
        terminated: Arc<Mutex<Vec<String>>>,
    }

    fn retracer(options: RetraceOptions) -> (Retracer, Harness) {
        let harness = Harness {
            window: FakeWindowSystem::new(),
            results: MemoryResultWriter::new(),
            terminated: Arc::new(Mutex::new(Vec::new())),
        };
        let terminated = harness.terminated.clone();
        let retracer = Retracer::new(
            options,
            Box::new(harness.window.clone()),
            Box::new(harness.results.clone()),
            Box::new(move |msg| terminated.lock().push(msg.to_string())),
        )
        .unwrap();
        (retracer, harness)
    }

    /// A dispatch table whose `glMark` records the call number and thread
    /// name, and whose `eglSwapBuffers` only counts frames.
    fn marking_table(log: Arc<Mutex<Vec<(u32, Option<String>)>>>) -> DispatchTable {
        let mut table = DispatchTable::new();
        table.register("glMark", false, move |r, _| {
            let name = thread::current().name().map(String::from);
            log.lock().push((r.cur_call_no, name));
            Ok(())
        });
        table.register("eglSwapBuffers", false, |r, _| {
            r.on_frame_complete();
            r.on_new_frame();
            Ok(())
        });
        table
    }

    fn calls(log: &Arc<Mutex<Vec<(u32, Option<String>)>>>) -> Vec<u32> {
        log.lock().iter().map(|&(call_no, _)| call_no).collect()
    }

    #[test]
    fn test_multi_thread_order() {
        let tids = [0, 1, 2, 1, 1, 0, 2, 2, 0, 1, 3, 0];
        let mut list = CallList::new(TraceHeader::default());
        for &tid in &tids {
            list.push(tid, "glMark", Vec::new());
        }

        let mut options = RetraceOptions::default();
        options.multi_thread = true;
        let (retracer, harness) = retracer(options);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RetraceEngine::new(retracer, Box::new(list), marking_table(log.clone()));
        engine.run().unwrap();

        let log = log.lock().clone();
        let order: Vec<_> = log.iter().map(|&(call_no, _)| call_no).collect();
        assert_eq!(order, (0..tids.len() as u32).collect::<Vec<_>>());
        for (&(call_no, ref name), &tid) in log.iter().zip(tids.iter()) {
            assert_eq!(name.as_deref(), Some(&*format!("retrace-{}", tid)), "call {}", call_no);
        }
        assert_eq!(engine.scheduler.worker_count(), 0);

        let reports = harness.results.reports();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_error());
    }

    #[test]
    fn test_single_thread_filter() {
        let mut list = CallList::new(TraceHeader::default());
        for &tid in &[0, 1, 1, 0, 2, 1] {
            list.push(tid, "glMark", Vec::new());
        }

        let mut options = RetraceOptions::default();
        options.retrace_tid = 1;
        let (retracer, _harness) = retracer(options);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RetraceEngine::new(retracer, Box::new(list), marking_table(log.clone()));
        engine.run().unwrap();

        assert_eq!(calls(&log), vec![1, 2, 5]);
        assert_eq!(engine.skipped_calls(), 3);
        // Single-thread mode runs everything on the caller's thread.
        assert!(log.lock().iter().all(|(_, name)| name.as_deref() != Some("retrace-1")));
    }

    #[test]
    fn test_loops_rewind_to_measure_start() {
        let mut list = CallList::new(TraceHeader::default());
        for _ in 0..6 {
            list.push(0, "glMark", Vec::new());
            list.push(0, "eglSwapBuffers", Vec::new());
        }

        let mut options = RetraceOptions::default();
        options.begin_measure_frame = 2;
        options.end_measure_frame = 4;
        options.loop_times = 2;
        let (retracer, harness) = retracer(options);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RetraceEngine::new(retracer, Box::new(list), marking_table(log.clone()));
        engine.run().unwrap();

        // Frames 0 and 1, then frames 2 and 3 three times over.
        assert_eq!(calls(&log), vec![0, 2, 4, 6, 4, 6, 4, 6]);
        assert_eq!(engine.retracer().unwrap().loop_fps().len(), 2);

        let reports = harness.results.reports();
        assert_eq!(reports.len(), 1);
        match &reports[0] {
            RunReport::Success(result) => {
                assert_eq!(result.frames, 2);
                assert_eq!((result.start, result.end), (2, 4));
                assert_eq!(result.loop_fps.len(), 2);
                assert_eq!(result.fb_config, harness.window.selected_config());
            }
            RunReport::Error(errors) => panic!("run failed: {:?}", errors),
        }
    }

    #[test]
    fn test_end_frame_stops_dispatch() {
        let mut list = CallList::new(TraceHeader::default());
        for _ in 0..5 {
            list.push(0, "glMark", Vec::new());
            list.push(0, "eglSwapBuffers", Vec::new());
        }

        let mut options = RetraceOptions::default();
        options.begin_measure_frame = 0;
        options.end_measure_frame = 2;
        let (retracer, harness) = retracer(options);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RetraceEngine::new(retracer, Box::new(list), marking_table(log.clone()));
        engine.run().unwrap();

        assert_eq!(calls(&log), vec![0, 2]);
        match &harness.results.reports()[0] {
            RunReport::Success(result) => assert_eq!(result.frames, 2),
            RunReport::Error(errors) => panic!("run failed: {:?}", errors),
        }
        // The run finished with a glFinish.
        assert_eq!(
            harness.window.fake_driver().take_log().last().map(String::as_str),
            Some("finish()")
        );
    }

    #[test]
    fn test_abort_writes_one_error() {
        let mut list = CallList::new(TraceHeader::default());
        for name in &["glMark", "glBoom", "glMark", "glBoom", "glMark"] {
            list.push(0, name, Vec::new());
        }

        let (retracer, harness) = retracer(RetraceOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = marking_table(log.clone());
        table.register("glBoom", false, |r, _| {
            Err(r.report_and_abort("Failed to create GLES context"))
        });
        let mut engine = RetraceEngine::new(retracer, Box::new(list), table);

        assert!(matches!(engine.run(), Err(RetraceError::Aborted(_))));
        assert!(!engine.retrace_until_swap_buffers().unwrap());
        assert_eq!(calls(&log), vec![0]);

        let reports = harness.results.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0],
            RunReport::error(
                TraceErrorKind::Generic,
                "[c1,f0] Failed to create GLES context"
            )
        );
        assert_eq!(harness.terminated.lock().len(), 1);
    }

    #[test]
    fn test_unsupported_offscreen_format_aborts() {
        let egl_none = crate::call::EGL_NONE;
        for &multi_thread in &[false, true] {
            let mut list = CallList::new(TraceHeader::default());
            let surface = ArgWriter::new().u64(1).u64(1).i32(0).i32_array(&[egl_none]).u64(0x5);
            list.push(0, "eglCreateWindowSurface", surface.finish());
            let context = ArgWriter::new().u64(1).u64(1).u64(0).i32_array(&[0x3098, 3, egl_none]).u64(0xc1);
            list.push(0, "eglCreateContext", context.finish());
            list.push(0, "glMark", Vec::new());
            let make_current = ArgWriter::new().u64(1).u64(0x5).u64(0x5).u64(0xc1);
            list.push(0, "eglMakeCurrent", make_current.finish());
            list.push(0, "glMark", Vec::new());
            list.push(0, "glMark", Vec::new());

            let mut options = RetraceOptions::default();
            options.multi_thread = multi_thread;
            options.force_offscreen = true;
            options.offscreen_config = crate::config::EglConfigInfo::new(6, 6, 6, 0, 24, 8);
            let (retracer, harness) = retracer(options);
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut table = crate::dispatch_table();
            let marks = log.clone();
            table.register("glMark", false, move |r, _| {
                marks.lock().push((r.cur_call_no, None));
                Ok(())
            });
            let mut engine = RetraceEngine::new(retracer, Box::new(list), table);

            assert!(matches!(engine.run(), Err(RetraceError::Aborted(_))));
            assert!(!engine.retrace_until_swap_buffers().unwrap());
            assert_eq!(calls(&log), vec![2]);

            assert_eq!(
                harness.results.reports(),
                vec![RunReport::error(
                    TraceErrorKind::InvalidParameter,
                    "[c3,f0] unsupported offscreen format: red=6, green=6, blue=6, alpha=0"
                )]
            );
            assert_eq!(harness.terminated.lock().len(), 1);
            assert_eq!(engine.scheduler.worker_count(), 0);
        }
    }

    #[test]
    fn test_bad_arguments_abort() {
        let mut list = CallList::new(TraceHeader::default());
        list.push(0, "glNeedsArg", ArgWriter::new().u32(7).finish());
        list.push(0, "glNeedsArg", Vec::new());
        list.push(0, "glNeedsArg", ArgWriter::new().u32(8).finish());

        let mut options = RetraceOptions::default();
        options.multi_thread = true;
        let (retracer, harness) = retracer(options);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut table = DispatchTable::new();
        let seen_in_replay = seen.clone();
        table.register("glNeedsArg", false, move |_, args| {
            seen_in_replay.lock().push(args.u32()?);
            Ok(())
        });
        let mut engine = RetraceEngine::new(retracer, Box::new(list), table);

        assert!(engine.run().is_err());
        assert_eq!(*seen.lock(), vec![7]);
        match &harness.results.reports()[..] {
            [RunReport::Error(errors)] => {
                assert_eq!(errors[0].0, TraceErrorKind::InconsistentTraceFile)
            }
            other => panic!("unexpected reports: {:?}", other),
        }
        assert_eq!(harness.terminated.lock().len(), 1);
    }

    #[test]
    fn test_skip_call_set() {
        let mut list = CallList::new(TraceHeader::default());
        for _ in 0..6 {
            list.push(0, "glMark", Vec::new());
        }

        let mut options = RetraceOptions::default();
        options.skip_call_set = Some(CallSet::parse("1-2,4").unwrap());
        let (retracer, _harness) = retracer(options);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = RetraceEngine::new(retracer, Box::new(list), marking_table(log.clone()));
        engine.run().unwrap();
        assert_eq!(calls(&log), vec![0, 3, 5]);
    }

    #[test]
    fn test_skip_work_discards() {
        let mut list = CallList::new(TraceHeader::default());
        for _ in 0..4 {
            list.push(0, "glFlush", Vec::new());
            list.push(0, "glDispatchCompute", Vec::new());
            list.push(0, "eglSwapBuffers", Vec::new());
        }

        let mut options = RetraceOptions::default();
        options.begin_measure_frame = 3;
        options.end_measure_frame = 4;
        options.skip_work = 1;
        let (retracer, harness) = retracer(options);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = marking_table(log.clone());
        let dispatched = log.clone();
        table.register("glDispatchCompute", false, move |r, _| {
            dispatched.lock().push((r.cur_call_no, None));
            Ok(())
        });
        let mut engine = RetraceEngine::new(retracer, Box::new(list), table);
        engine.run().unwrap();

        // Only frames 2 and 3 do real work.
        assert_eq!(calls(&log), vec![7, 10]);
        let discards = harness
            .window
            .fake_driver()
            .take_log()
            .iter()
            .filter(|line| line.starts_with("invalidate_framebuffer"))
            .count();
        // glFlush and the swap in frames 0 and 1.
        assert_eq!(discards, 4);
    }

    #[test]
    fn test_out_of_memory_ends_run() {
        let mut list = CallList::new(TraceHeader::default());
        for _ in 0..3 {
            list.push(0, "glAlloc", Vec::new());
            list.push(0, "eglSwapBuffers", Vec::new());
        }

        let mut options = RetraceOptions::default();
        options.debug = 1;
        let (retracer, harness) = retracer(options);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = marking_table(log);
        let driver = harness.window.fake_driver().clone();
        table.register("glAlloc", true, move |_, _| {
            driver.set_error(gl::OUT_OF_MEMORY);
            Ok(())
        });
        let mut engine = RetraceEngine::new(retracer, Box::new(list), table);
        engine.run().unwrap();

        // The run stops right after the failing call.
        assert!(engine.retracer().unwrap().out_of_memory);
        assert_eq!(engine.retracer().unwrap().cur_frame, 0);
        assert_eq!(engine.retracer().unwrap().dispatch_frame, 0);
        match &harness.results.reports()[..] {
            [RunReport::Error(errors)] => assert_eq!(errors[0].0, TraceErrorKind::OutOfMemory),
            other => panic!("unexpected reports: {:?}", other),
        }
    }
}
