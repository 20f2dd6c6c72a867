//! Recording fakes for the driver, window system and result writer.
//!
//! Each fake keeps its record behind an `Arc`, so a test can hand a clone to
//! the retracer and still inspect what happened afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use gleam::gl::{self, GLenum, GLint, GLsizei, GLuint};
use parking_lot::Mutex;

use crate::call::{ArgCursor, ArgWriter};
use crate::config::{EglConfigInfo, RetraceOptions};
use crate::driver::Driver;
use crate::engine::Retracer;
use crate::error::Result;
use crate::resource::Namespace;
use crate::result::{ResultWriter, RunReport};
use crate::window::{
    NativeContext, NativeImage, NativeSurface, NativeSync, Profile, WindowSystem,
    EGL_CONDITION_SATISFIED,
};

#[derive(Default)]
struct DriverState {
    log: Vec<String>,
    next_name: GLuint,
    enabled: HashSet<GLenum>,
    viewport: [i32; 4],
    framebuffer: GLuint,
    framebuffer_status: Option<GLenum>,
    link_status: Option<GLint>,
    compile_status: Option<GLint>,
    pending_error: Option<GLenum>,
}

/// A `Driver` that logs every call that changes state, as text.
///
/// Names come from a single counter shared by all namespaces. Queries are
/// answered from tracked state and aren't logged.
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<DriverState>>,
}

impl FakeDriver {
    pub fn new() -> FakeDriver {
        FakeDriver::default()
    }

    /// Return the calls logged so far, and clear the log.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().log)
    }

    pub fn viewport_state(&self) -> [i32; 4] {
        self.state.lock().viewport
    }

    pub fn set_framebuffer_status(&self, status: GLenum) {
        self.state.lock().framebuffer_status = Some(status);
    }

    pub fn set_link_status(&self, status: GLint) {
        self.state.lock().link_status = Some(status);
    }

    pub fn set_compile_status(&self, status: GLint) {
        self.state.lock().compile_status = Some(status);
    }

    /// Make the next `get_error` return `error`.
    pub fn set_error(&self, error: GLenum) {
        self.state.lock().pending_error = Some(error);
    }

    fn log(&self, call: String) {
        self.state.lock().log.push(call);
    }

    fn fresh(&self) -> GLuint {
        let mut state = self.state.lock();
        state.next_name += 1;
        state.next_name
    }
}

impl Driver for FakeDriver {
    fn get_error(&self) -> GLenum {
        self.state.lock().pending_error.take().unwrap_or(gl::NO_ERROR)
    }
    fn get_string(&self, which: GLenum) -> String {
        match which {
            gl::VERSION => "OpenGL ES 3.2 (fake)".to_string(),
            gl::EXTENSIONS => "GL_OES_depth24 GL_EXT_discard_framebuffer".to_string(),
            _ => String::new(),
        }
    }
    fn get_integer(&self, pname: GLenum) -> GLint {
        match pname {
            gl::FRAMEBUFFER_BINDING => self.state.lock().framebuffer as GLint,
            _ => 0,
        }
    }
    fn get_integer_v(&self, pname: GLenum, result: &mut [GLint]) {
        if pname == gl::VIEWPORT {
            let viewport = self.state.lock().viewport;
            for (out, value) in result.iter_mut().zip(viewport.iter()) {
                *out = *value;
            }
        } else if let Some(first) = result.first_mut() {
            *first = self.get_integer(pname);
        }
    }
    fn get_float_v(&self, _pname: GLenum, result: &mut [f32]) {
        for value in result {
            *value = 0.0;
        }
    }
    fn flush(&self) {
        self.log("flush()".to_string());
    }
    fn finish(&self) {
        self.log("finish()".to_string());
    }
    fn gen_names(&self, namespace: Namespace, n: GLsizei) -> Vec<GLuint> {
        let names: Vec<_> = (0..n.max(0)).map(|_| self.fresh()).collect();
        self.log(format!("gen_names({:?}, {:?})", namespace, names));
        names
    }
    fn delete_names(&self, namespace: Namespace, names: &[GLuint]) {
        self.log(format!("delete_names({:?}, {:?})", namespace, names));
    }
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        if target != gl::READ_FRAMEBUFFER {
            self.state.lock().framebuffer = framebuffer;
        }
        self.log(format!("bind_framebuffer({:#x}, {})", target, framebuffer));
    }
    fn bind_renderbuffer(&self, target: GLenum, renderbuffer: GLuint) {
        self.log(format!("bind_renderbuffer({:#x}, {})", target, renderbuffer));
    }
    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        self.log(format!("bind_texture({:#x}, {})", target, texture));
    }
    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        self.log(format!("bind_buffer({:#x}, {})", target, buffer));
    }
    fn bind_vertex_array(&self, vao: GLuint) {
        self.log(format!("bind_vertex_array({})", vao));
    }
    fn active_texture(&self, texture: GLenum) {
        self.log(format!("active_texture({:#x})", texture));
    }
    fn tex_image_2d(
        &self,
        target: GLenum,
        _level: GLint,
        _internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        _border: GLint,
        format: GLenum,
        ty: GLenum,
        _data: Option<&[u8]>,
    ) {
        self.log(format!(
            "tex_image_2d({:#x}, {}x{}, {:#x}, {:#x})",
            target, width, height, format, ty
        ));
    }
    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint) {
        self.log(format!("tex_parameter_i({:#x}, {:#x}, {:#x})", target, pname, param));
    }
    fn renderbuffer_storage(&self, _target: GLenum, format: GLenum, width: GLsizei, height: GLsizei) {
        self.log(format!("renderbuffer_storage({:#x}, {}x{})", format, width, height));
    }
    fn renderbuffer_storage_multisample(
        &self,
        _target: GLenum,
        samples: GLsizei,
        format: GLenum,
        width: GLsizei,
        height: GLsizei,
    ) {
        self.log(format!(
            "renderbuffer_storage_multisample({}, {:#x}, {}x{})",
            samples, format, width, height
        ));
    }
    fn framebuffer_texture_2d(
        &self,
        _target: GLenum,
        attachment: GLenum,
        _textarget: GLenum,
        texture: GLuint,
        _level: GLint,
    ) {
        self.log(format!("framebuffer_texture_2d({:#x}, {})", attachment, texture));
    }
    fn framebuffer_texture_2d_multisample(
        &self,
        _target: GLenum,
        attachment: GLenum,
        _textarget: GLenum,
        texture: GLuint,
        _level: GLint,
        samples: GLsizei,
    ) {
        self.log(format!(
            "framebuffer_texture_2d_multisample({:#x}, {}, {})",
            attachment, texture, samples
        ));
    }
    fn framebuffer_renderbuffer(
        &self,
        _target: GLenum,
        attachment: GLenum,
        _renderbuffer_target: GLenum,
        renderbuffer: GLuint,
    ) {
        self.log(format!("framebuffer_renderbuffer({:#x}, {})", attachment, renderbuffer));
    }
    fn check_frame_buffer_status(&self, _target: GLenum) -> GLenum {
        self.state
            .lock()
            .framebuffer_status
            .unwrap_or(gl::FRAMEBUFFER_COMPLETE)
    }
    fn invalidate_framebuffer(&self, target: GLenum, attachments: &[GLenum]) {
        let attachments: Vec<_> = attachments.iter().map(|a| format!("{:#x}", a)).collect();
        self.log(format!(
            "invalidate_framebuffer({:#x}, [{}])",
            target,
            attachments.join(", ")
        ));
    }
    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.state.lock().viewport = [x, y, width, height];
        self.log(format!("viewport({}, {}, {}, {})", x, y, width, height));
    }
    fn scissor(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.log(format!("scissor({}, {}, {}, {})", x, y, width, height));
    }
    fn enable(&self, cap: GLenum) {
        self.state.lock().enabled.insert(cap);
        self.log(format!("enable({:#x})", cap));
    }
    fn disable(&self, cap: GLenum) {
        self.state.lock().enabled.remove(&cap);
        self.log(format!("disable({:#x})", cap));
    }
    fn is_enabled(&self, cap: GLenum) -> bool {
        self.state.lock().enabled.contains(&cap)
    }
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.log(format!("clear_color({}, {}, {}, {})", r, g, b, a));
    }
    fn clear(&self, mask: GLenum) {
        self.log(format!("clear({:#x})", mask));
    }
    fn create_shader(&self, shader_type: GLenum) -> GLuint {
        let shader = self.fresh();
        self.log(format!("create_shader({:#x}) -> {}", shader_type, shader));
        shader
    }
    fn shader_source(&self, shader: GLuint, _source: &str) {
        self.log(format!("shader_source({})", shader));
    }
    fn compile_shader(&self, shader: GLuint) {
        self.log(format!("compile_shader({})", shader));
    }
    fn get_shader_iv(&self, _shader: GLuint, pname: GLenum) -> GLint {
        match pname {
            gl::COMPILE_STATUS => self.state.lock().compile_status.unwrap_or(1),
            _ => 0,
        }
    }
    fn get_shader_info_log(&self, _shader: GLuint) -> String {
        "fake compile log".to_string()
    }
    fn delete_shader(&self, shader: GLuint) {
        self.log(format!("delete_shader({})", shader));
    }
    fn create_program(&self) -> GLuint {
        let program = self.fresh();
        self.log(format!("create_program() -> {}", program));
        program
    }
    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        self.log(format!("attach_shader({}, {})", program, shader));
    }
    fn bind_attrib_location(&self, program: GLuint, index: GLuint, name: &str) {
        self.log(format!("bind_attrib_location({}, {}, {})", program, index, name));
    }
    fn link_program(&self, program: GLuint) {
        self.log(format!("link_program({})", program));
    }
    fn get_program_iv(&self, _program: GLuint, pname: GLenum) -> GLint {
        match pname {
            gl::LINK_STATUS => self.state.lock().link_status.unwrap_or(1),
            _ => 0,
        }
    }
    fn get_program_info_log(&self, _program: GLuint) -> String {
        "fake link log".to_string()
    }
    fn get_program_binary(&self, program: GLuint) -> (Vec<u8>, GLenum) {
        (vec![0xb1, program as u8], 0x1234)
    }
    fn program_binary(&self, program: GLuint, format: GLenum, binary: &[u8]) {
        self.log(format!("program_binary({}, {:#x}, {:?})", program, format, binary));
    }
    fn use_program(&self, program: GLuint) {
        self.log(format!("use_program({})", program));
    }
    fn delete_program(&self, program: GLuint) {
        self.log(format!("delete_program({})", program));
    }
    fn get_uniform_location(&self, _program: GLuint, _name: &str) -> GLint {
        0
    }
    fn uniform_1i(&self, location: GLint, value: GLint) {
        self.log(format!("uniform_1i({}, {})", location, value));
    }
    fn buffer_data_f32(&self, target: GLenum, data: &[f32], _usage: GLenum) {
        self.log(format!("buffer_data_f32({:#x}, {} floats)", target, data.len()));
    }
    fn vertex_attrib_pointer(
        &self,
        index: GLuint,
        size: GLint,
        _ty: GLenum,
        _normalized: bool,
        _stride: GLsizei,
        offset: GLuint,
    ) {
        self.log(format!("vertex_attrib_pointer({}, {}, {})", index, size, offset));
    }
    fn enable_vertex_attrib_array(&self, index: GLuint) {
        self.log(format!("enable_vertex_attrib_array({})", index));
    }
    fn disable_vertex_attrib_array(&self, index: GLuint) {
        self.log(format!("disable_vertex_attrib_array({})", index));
    }
    fn draw_arrays(&self, mode: GLenum, first: GLint, count: GLsizei) {
        self.log(format!("draw_arrays({:#x}, {}, {})", mode, first, count));
    }
    fn draw_elements(&self, mode: GLenum, count: GLsizei, ty: GLenum, offset: GLuint) {
        self.log(format!("draw_elements({:#x}, {}, {:#x}, {})", mode, count, ty, offset));
    }
    fn read_pixels(
        &self,
        x: GLint,
        y: GLint,
        width: GLsizei,
        height: GLsizei,
        _format: GLenum,
        _ty: GLenum,
    ) -> Vec<u8> {
        self.log(format!("read_pixels({}, {}, {}, {})", x, y, width, height));
        (0..width.max(0) as usize * height.max(0) as usize * 4)
            .map(|i| i as u8)
            .collect()
    }
    fn fence_sync(&self, condition: GLenum, _flags: u32) -> u64 {
        let sync = u64::from(self.fresh()) << 32;
        self.log(format!("fence_sync({:#x}) -> {:#x}", condition, sync));
        sync
    }
    fn client_wait_sync(&self, sync: u64, _flags: u32, _timeout: u64) -> GLenum {
        self.log(format!("client_wait_sync({:#x})", sync));
        gl::CONDITION_SATISFIED
    }
    fn wait_sync(&self, sync: u64, _flags: u32, _timeout: u64) {
        self.log(format!("wait_sync({:#x})", sync));
    }
    fn delete_sync(&self, sync: u64) {
        self.log(format!("delete_sync({:#x})", sync));
    }
    fn egl_image_target_texture_2d_oes(&self, target: GLenum, image: u64) {
        self.log(format!("egl_image_target_texture_2d_oes({:#x}, {})", target, image));
    }
}

#[derive(Default)]
struct WindowRecord {
    next_handle: u64,
    events: Vec<String>,
    created_surfaces: usize,
    destroyed_surfaces: usize,
    created_contexts: usize,
    destroyed_contexts: usize,
    swaps: usize,
    fail_context_creation: bool,
    steppable: bool,
    step_events: usize,
}

/// A `WindowSystem` that hands out fresh handles and records what it's asked.
#[derive(Clone, Default)]
pub struct FakeWindowSystem {
    driver: FakeDriver,
    record: Arc<Mutex<WindowRecord>>,
}

impl FakeWindowSystem {
    pub fn new() -> FakeWindowSystem {
        FakeWindowSystem::default()
    }

    pub fn fake_driver(&self) -> &FakeDriver {
        &self.driver
    }

    pub fn fail_context_creation(&self) {
        self.record.lock().fail_context_creation = true;
    }

    pub fn created_surfaces(&self) -> usize {
        self.record.lock().created_surfaces
    }

    pub fn destroyed_surfaces(&self) -> usize {
        self.record.lock().destroyed_surfaces
    }

    pub fn created_contexts(&self) -> usize {
        self.record.lock().created_contexts
    }

    pub fn destroyed_contexts(&self) -> usize {
        self.record.lock().destroyed_contexts
    }

    pub fn swaps(&self) -> usize {
        self.record.lock().swaps
    }

    pub fn enable_stepping(&self) {
        self.record.lock().steppable = true;
    }

    pub fn step_events(&self) -> usize {
        self.record.lock().step_events
    }

    /// Everything recorded so far, as text.
    pub fn events(&self) -> Vec<String> {
        self.record.lock().events.clone()
    }

    fn fresh(&self, event: String) -> u64 {
        let mut record = self.record.lock();
        record.next_handle += 1;
        let handle = record.next_handle;
        record.events.push(format!("{} -> {}", event, handle));
        handle
    }

    fn event(&self, event: String) {
        self.record.lock().events.push(event);
    }
}

impl WindowSystem for FakeWindowSystem {
    fn driver(&self) -> &dyn Driver {
        &self.driver
    }

    fn selected_config(&self) -> EglConfigInfo {
        EglConfigInfo::new(8, 8, 8, 8, 24, 8)
    }

    fn create_window_surface(
        &mut self,
        window: i32,
        width: i32,
        height: i32,
        _attribs: &[i32],
    ) -> Option<NativeSurface> {
        self.record.lock().created_surfaces += 1;
        Some(self.fresh(format!("create_window_surface({}, {}x{})", window, width, height)))
    }

    fn create_pbuffer_surface(&mut self, width: i32, height: i32) -> Option<NativeSurface> {
        self.record.lock().created_surfaces += 1;
        Some(self.fresh(format!("create_pbuffer_surface({}x{})", width, height)))
    }

    fn destroy_surface(&mut self, surface: NativeSurface) {
        self.record.lock().destroyed_surfaces += 1;
        self.event(format!("destroy_surface({})", surface));
    }

    fn create_context(
        &mut self,
        profile: Profile,
        share: Option<NativeContext>,
    ) -> Option<NativeContext> {
        if self.record.lock().fail_context_creation {
            self.event("create_context failed".to_string());
            return None;
        }
        self.record.lock().created_contexts += 1;
        Some(self.fresh(format!("create_context({:?}, {:?})", profile, share)))
    }

    fn destroy_context(&mut self, context: NativeContext) {
        self.record.lock().destroyed_contexts += 1;
        self.event(format!("destroy_context({})", context));
    }

    fn make_current(
        &mut self,
        surface: Option<NativeSurface>,
        context: Option<NativeContext>,
    ) -> bool {
        self.event(format!("make_current({:?}, {:?})", surface, context));
        true
    }

    fn swap_buffers(&mut self, surface: NativeSurface) -> bool {
        self.record.lock().swaps += 1;
        self.event(format!("swap_buffers({})", surface));
        true
    }

    fn create_image(
        &mut self,
        _context: Option<NativeContext>,
        target: u32,
        buffer: u64,
        _attribs: &[i32],
    ) -> Option<NativeImage> {
        Some(self.fresh(format!("create_image({:#x}, {})", target, buffer)))
    }

    fn destroy_image(&mut self, image: NativeImage) -> bool {
        self.event(format!("destroy_image({})", image));
        true
    }

    fn create_sync(&mut self, sync_type: u32, _attribs: &[i32]) -> Option<NativeSync> {
        Some(self.fresh(format!("create_sync({:#x})", sync_type)))
    }

    fn client_wait_sync(&mut self, sync: NativeSync, _flags: i32, _timeout: u64) -> i32 {
        self.event(format!("client_wait_sync({})", sync));
        EGL_CONDITION_SATISFIED
    }

    fn destroy_sync(&mut self, sync: NativeSync) -> bool {
        self.event(format!("destroy_sync({})", sync));
        true
    }

    fn set_surface_attribute(&mut self, surface: NativeSurface, attribute: i32, value: i32) -> bool {
        self.event(format!("set_surface_attribute({}, {:#x}, {})", surface, attribute, value));
        true
    }

    fn steppable(&self) -> bool {
        self.record.lock().steppable
    }

    fn process_step_event(&mut self) {
        self.record.lock().step_events += 1;
    }
}

/// Keeps every report it is given.
#[derive(Clone, Default)]
pub struct MemoryResultWriter {
    reports: Arc<Mutex<Vec<RunReport>>>,
}

impl MemoryResultWriter {
    pub fn new() -> MemoryResultWriter {
        MemoryResultWriter::default()
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().clone()
    }
}

impl ResultWriter for MemoryResultWriter {
    fn write(&mut self, report: &RunReport) -> Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

/// A `Retracer` over fresh fakes, with a terminator that does nothing.
pub fn fake_retracer(options: RetraceOptions) -> (Retracer, FakeWindowSystem, MemoryResultWriter) {
    let window = FakeWindowSystem::new();
    let results = MemoryResultWriter::new();
    let retracer = Retracer::new(
        options,
        Box::new(window.clone()),
        Box::new(results.clone()),
        Box::new(|_: &str| {}),
    )
    .unwrap();
    (retracer, window, results)
}

/// Run replay function `f` on `args`.
pub fn replay(
    r: &mut Retracer,
    f: fn(&mut Retracer, &mut ArgCursor) -> Result<()>,
    args: ArgWriter,
) -> Result<()> {
    let bytes = args.finish();
    f(r, &mut ArgCursor::new(&bytes))
}
