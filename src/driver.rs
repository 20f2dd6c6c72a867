//! The GL entry points the retracer issues on its own behalf.
//!
//! Each traced call is replayed by the function registered for it with
//! `DispatchTable::register`; calls nobody registered are skipped. The calls
//! in this trait are the ones the registered functions and the retracer
//! itself make: object creation and deletion for remapped names, framebuffer
//! binds it rewrites, the offscreen compositor's drawing, and state queries.
//!
//! Method names and argument types follow `gleam::gl::Gl`, and `GleamDriver`
//! forwards straight to a `gleam` context. Tests use a recording fake.

use std::cell::Cell;
use std::rc::Rc;

use gleam::gl::{self, GLenum, GLint, GLsizei, GLuint};
use log::warn;

use crate::resource::Namespace;

pub trait Driver {
    fn get_error(&self) -> GLenum;
    fn get_string(&self, which: GLenum) -> String;
    fn get_integer(&self, pname: GLenum) -> GLint;
    fn get_integer_v(&self, pname: GLenum, result: &mut [GLint]);
    fn get_float_v(&self, pname: GLenum, result: &mut [f32]);
    fn flush(&self);
    fn finish(&self);

    /// Create `n` objects in `namespace`, returning their live names.
    fn gen_names(&self, namespace: Namespace, n: GLsizei) -> Vec<GLuint>;
    fn delete_names(&self, namespace: Namespace, names: &[GLuint]);

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint);
    fn bind_renderbuffer(&self, target: GLenum, renderbuffer: GLuint);
    fn bind_texture(&self, target: GLenum, texture: GLuint);
    fn bind_buffer(&self, target: GLenum, buffer: GLuint);
    fn bind_vertex_array(&self, vao: GLuint);
    fn active_texture(&self, texture: GLenum);

    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        format: GLenum,
        ty: GLenum,
        data: Option<&[u8]>,
    );
    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint);
    fn renderbuffer_storage(
        &self,
        target: GLenum,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    );
    fn renderbuffer_storage_multisample(
        &self,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    );
    fn framebuffer_texture_2d(
        &self,
        target: GLenum,
        attachment: GLenum,
        textarget: GLenum,
        texture: GLuint,
        level: GLint,
    );
    /// `glFramebufferTexture2DMultisampleEXT`.
    fn framebuffer_texture_2d_multisample(
        &self,
        target: GLenum,
        attachment: GLenum,
        textarget: GLenum,
        texture: GLuint,
        level: GLint,
        samples: GLsizei,
    );
    fn framebuffer_renderbuffer(
        &self,
        target: GLenum,
        attachment: GLenum,
        renderbuffer_target: GLenum,
        renderbuffer: GLuint,
    );
    fn check_frame_buffer_status(&self, target: GLenum) -> GLenum;
    fn invalidate_framebuffer(&self, target: GLenum, attachments: &[GLenum]);

    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei);
    fn scissor(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei);
    fn enable(&self, cap: GLenum);
    fn disable(&self, cap: GLenum);
    fn is_enabled(&self, cap: GLenum) -> bool;
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);
    fn clear(&self, mask: GLenum);

    fn create_shader(&self, shader_type: GLenum) -> GLuint;
    fn shader_source(&self, shader: GLuint, source: &str);
    fn compile_shader(&self, shader: GLuint);
    fn get_shader_iv(&self, shader: GLuint, pname: GLenum) -> GLint;
    fn get_shader_info_log(&self, shader: GLuint) -> String;
    fn delete_shader(&self, shader: GLuint);
    fn create_program(&self) -> GLuint;
    fn attach_shader(&self, program: GLuint, shader: GLuint);
    fn bind_attrib_location(&self, program: GLuint, index: GLuint, name: &str);
    fn link_program(&self, program: GLuint);
    fn get_program_iv(&self, program: GLuint, pname: GLenum) -> GLint;
    fn get_program_info_log(&self, program: GLuint) -> String;
    fn get_program_binary(&self, program: GLuint) -> (Vec<u8>, GLenum);
    fn program_binary(&self, program: GLuint, format: GLenum, binary: &[u8]);
    fn use_program(&self, program: GLuint);
    fn delete_program(&self, program: GLuint);
    fn get_uniform_location(&self, program: GLuint, name: &str) -> GLint;
    fn uniform_1i(&self, location: GLint, value: GLint);

    fn buffer_data_f32(&self, target: GLenum, data: &[f32], usage: GLenum);
    fn vertex_attrib_pointer(
        &self,
        index: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLsizei,
        offset: GLuint,
    );
    fn enable_vertex_attrib_array(&self, index: GLuint);
    fn disable_vertex_attrib_array(&self, index: GLuint);
    fn draw_arrays(&self, mode: GLenum, first: GLint, count: GLsizei);
    fn draw_elements(&self, mode: GLenum, count: GLsizei, ty: GLenum, offset: GLuint);
    fn read_pixels(
        &self,
        x: GLint,
        y: GLint,
        width: GLsizei,
        height: GLsizei,
        format: GLenum,
        ty: GLenum,
    ) -> Vec<u8>;

    /// Sync objects travel as integers; the driver's `GLsync` is a pointer.
    fn fence_sync(&self, condition: GLenum, flags: u32) -> u64;
    fn client_wait_sync(&self, sync: u64, flags: u32, timeout: u64) -> GLenum;
    fn wait_sync(&self, sync: u64, flags: u32, timeout: u64);
    fn delete_sync(&self, sync: u64);

    fn egl_image_target_texture_2d_oes(&self, target: GLenum, image: u64);
}

/// Return the symbolic name of a `glGetError` result.
pub fn error_name(error: GLenum) -> &'static str {
    match error {
        gl::NO_ERROR => "GL_NO_ERROR",
        gl::INVALID_ENUM => "GL_INVALID_ENUM",
        gl::INVALID_VALUE => "GL_INVALID_VALUE",
        gl::INVALID_OPERATION => "GL_INVALID_OPERATION",
        gl::INVALID_FRAMEBUFFER_OPERATION => "GL_INVALID_FRAMEBUFFER_OPERATION",
        gl::OUT_OF_MEMORY => "GL_OUT_OF_MEMORY",
        _ => "unknown GL error",
    }
}

/// True if the space-separated `extensions` string lists `name`.
pub fn has_extension(extensions: &str, name: &str) -> bool {
    extensions.split_whitespace().any(|ext| ext == name)
}

/// Parse the major version out of a `GL_VERSION` string such as
/// `"OpenGL ES 3.2 build 1.2.3"`.
pub fn gles_major_version(version: &str) -> u32 {
    version
        .split_whitespace()
        .find_map(|word| {
            let major = word.split('.').next()?;
            if word.contains('.') {
                major.parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(2)
}

/// A `Driver` backed by a `gleam` GL context.
pub struct GleamDriver {
    gl: Rc<dyn gl::Gl>,
}

impl GleamDriver {
    /// Wrap `gl`.
    ///
    /// Safety: the caller must not keep any other clone of `gl`. The
    /// retracer moves its driver between worker threads (only one of which
    /// runs at a time), which is only sound if this wrapper holds the sole
    /// reference to the `Rc`.
    pub unsafe fn new(gl: Rc<dyn gl::Gl>) -> GleamDriver {
        GleamDriver { gl }
    }
}

// See `GleamDriver::new`.
unsafe impl Send for GleamDriver {}

fn sync_ptr(sync: u64) -> gl::GLsync {
    sync as usize as gl::GLsync
}

impl Driver for GleamDriver {
    fn get_error(&self) -> GLenum {
        self.gl.get_error()
    }

    fn get_string(&self, which: GLenum) -> String {
        self.gl.get_string(which)
    }

    fn get_integer(&self, pname: GLenum) -> GLint {
        let mut value = [0];
        self.get_integer_v(pname, &mut value);
        value[0]
    }

    #[allow(unused_unsafe)]
    fn get_integer_v(&self, pname: GLenum, result: &mut [GLint]) {
        unsafe { self.gl.get_integer_v(pname, result) }
    }

    #[allow(unused_unsafe)]
    fn get_float_v(&self, pname: GLenum, result: &mut [f32]) {
        unsafe { self.gl.get_float_v(pname, result) }
    }

    fn flush(&self) {
        self.gl.flush()
    }

    fn finish(&self) {
        self.gl.finish()
    }

    fn gen_names(&self, namespace: Namespace, n: GLsizei) -> Vec<GLuint> {
        match namespace {
            Namespace::Texture => self.gl.gen_textures(n),
            Namespace::Buffer => self.gl.gen_buffers(n),
            Namespace::Framebuffer => self.gl.gen_framebuffers(n),
            Namespace::Renderbuffer => self.gl.gen_renderbuffers(n),
            Namespace::VertexArray => self.gl.gen_vertex_arrays(n),
            Namespace::Query => self.gl.gen_queries(n),
            other => {
                warn!("gleam has no entry point to create {:?} objects", other);
                vec![0; n.max(0) as usize]
            }
        }
    }

    fn delete_names(&self, namespace: Namespace, names: &[GLuint]) {
        match namespace {
            Namespace::Texture => self.gl.delete_textures(names),
            Namespace::Buffer => self.gl.delete_buffers(names),
            Namespace::Framebuffer => self.gl.delete_framebuffers(names),
            Namespace::Renderbuffer => self.gl.delete_renderbuffers(names),
            Namespace::VertexArray => self.gl.delete_vertex_arrays(names),
            Namespace::Query => self.gl.delete_queries(names),
            Namespace::Program => names.iter().for_each(|p| self.gl.delete_program(*p)),
            Namespace::Shader => names.iter().for_each(|s| self.gl.delete_shader(*s)),
            other => warn!("gleam has no entry point to delete {:?} objects", other),
        }
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        self.gl.bind_framebuffer(target, framebuffer)
    }

    fn bind_renderbuffer(&self, target: GLenum, renderbuffer: GLuint) {
        self.gl.bind_renderbuffer(target, renderbuffer)
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        self.gl.bind_texture(target, texture)
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        self.gl.bind_buffer(target, buffer)
    }

    fn bind_vertex_array(&self, vao: GLuint) {
        self.gl.bind_vertex_array(vao)
    }

    fn active_texture(&self, texture: GLenum) {
        self.gl.active_texture(texture)
    }

    fn tex_image_2d(
        &self,
        target: GLenum,
        level: GLint,
        internal_format: GLint,
        width: GLsizei,
        height: GLsizei,
        border: GLint,
        format: GLenum,
        ty: GLenum,
        data: Option<&[u8]>,
    ) {
        self.gl.tex_image_2d(
            target,
            level,
            internal_format,
            width,
            height,
            border,
            format,
            ty,
            data,
        )
    }

    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint) {
        self.gl.tex_parameter_i(target, pname, param)
    }

    fn renderbuffer_storage(
        &self,
        target: GLenum,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    ) {
        self.gl.renderbuffer_storage(target, internal_format, width, height)
    }

    fn renderbuffer_storage_multisample(
        &self,
        target: GLenum,
        samples: GLsizei,
        internal_format: GLenum,
        width: GLsizei,
        height: GLsizei,
    ) {
        // The EXT_multisampled_render_to_texture entry points aren't
        // exposed by gleam; fall back to single-sampled storage.
        warn!("multisampled renderbuffer ({} samples) replaced by single-sampled storage", samples);
        self.gl.renderbuffer_storage(target, internal_format, width, height)
    }

    fn framebuffer_texture_2d(
        &self,
        target: GLenum,
        attachment: GLenum,
        textarget: GLenum,
        texture: GLuint,
        level: GLint,
    ) {
        self.gl
            .framebuffer_texture_2d(target, attachment, textarget, texture, level)
    }

    fn framebuffer_texture_2d_multisample(
        &self,
        target: GLenum,
        attachment: GLenum,
        textarget: GLenum,
        texture: GLuint,
        level: GLint,
        samples: GLsizei,
    ) {
        warn!("multisampled texture attachment ({} samples) replaced by single-sampled attachment", samples);
        self.gl
            .framebuffer_texture_2d(target, attachment, textarget, texture, level)
    }

    fn framebuffer_renderbuffer(
        &self,
        target: GLenum,
        attachment: GLenum,
        renderbuffer_target: GLenum,
        renderbuffer: GLuint,
    ) {
        self.gl
            .framebuffer_renderbuffer(target, attachment, renderbuffer_target, renderbuffer)
    }

    fn check_frame_buffer_status(&self, target: GLenum) -> GLenum {
        self.gl.check_frame_buffer_status(target)
    }

    fn invalidate_framebuffer(&self, target: GLenum, attachments: &[GLenum]) {
        self.gl.invalidate_framebuffer(target, attachments)
    }

    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.gl.viewport(x, y, width, height)
    }

    fn scissor(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.gl.scissor(x, y, width, height)
    }

    fn enable(&self, cap: GLenum) {
        self.gl.enable(cap)
    }

    fn disable(&self, cap: GLenum) {
        self.gl.disable(cap)
    }

    fn is_enabled(&self, cap: GLenum) -> bool {
        self.gl.is_enabled(cap) != 0
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.gl.clear_color(r, g, b, a)
    }

    fn clear(&self, mask: GLenum) {
        self.gl.clear(mask)
    }

    fn create_shader(&self, shader_type: GLenum) -> GLuint {
        self.gl.create_shader(shader_type)
    }

    fn shader_source(&self, shader: GLuint, source: &str) {
        self.gl.shader_source(shader, &[source.as_bytes()])
    }

    fn compile_shader(&self, shader: GLuint) {
        self.gl.compile_shader(shader)
    }

    #[allow(unused_unsafe)]
    fn get_shader_iv(&self, shader: GLuint, pname: GLenum) -> GLint {
        let mut value = [0];
        unsafe { self.gl.get_shader_iv(shader, pname, &mut value) };
        value[0]
    }

    fn get_shader_info_log(&self, shader: GLuint) -> String {
        self.gl.get_shader_info_log(shader)
    }

    fn delete_shader(&self, shader: GLuint) {
        self.gl.delete_shader(shader)
    }

    fn create_program(&self) -> GLuint {
        self.gl.create_program()
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        self.gl.attach_shader(program, shader)
    }

    fn bind_attrib_location(&self, program: GLuint, index: GLuint, name: &str) {
        self.gl.bind_attrib_location(program, index, name)
    }

    fn link_program(&self, program: GLuint) {
        self.gl.link_program(program)
    }

    #[allow(unused_unsafe)]
    fn get_program_iv(&self, program: GLuint, pname: GLenum) -> GLint {
        let mut value = [0];
        unsafe { self.gl.get_program_iv(program, pname, &mut value) };
        value[0]
    }

    fn get_program_info_log(&self, program: GLuint) -> String {
        self.gl.get_program_info_log(program)
    }

    fn get_program_binary(&self, program: GLuint) -> (Vec<u8>, GLenum) {
        self.gl.get_program_binary(program)
    }

    fn program_binary(&self, program: GLuint, format: GLenum, binary: &[u8]) {
        self.gl.program_binary(program, format, binary)
    }

    fn use_program(&self, program: GLuint) {
        self.gl.use_program(program)
    }

    fn delete_program(&self, program: GLuint) {
        self.gl.delete_program(program)
    }

    fn get_uniform_location(&self, program: GLuint, name: &str) -> GLint {
        self.gl.get_uniform_location(program, name)
    }

    fn uniform_1i(&self, location: GLint, value: GLint) {
        self.gl.uniform_1i(location, value)
    }

    fn buffer_data_f32(&self, target: GLenum, data: &[f32], usage: GLenum) {
        self.gl.buffer_data_untyped(
            target,
            std::mem::size_of_val(data) as gl::GLsizeiptr,
            data.as_ptr() as *const gl::GLvoid,
            usage,
        )
    }

    fn vertex_attrib_pointer(
        &self,
        index: GLuint,
        size: GLint,
        ty: GLenum,
        normalized: bool,
        stride: GLsizei,
        offset: GLuint,
    ) {
        self.gl
            .vertex_attrib_pointer(index, size, ty, normalized, stride, offset)
    }

    fn enable_vertex_attrib_array(&self, index: GLuint) {
        self.gl.enable_vertex_attrib_array(index)
    }

    fn disable_vertex_attrib_array(&self, index: GLuint) {
        self.gl.disable_vertex_attrib_array(index)
    }

    fn draw_arrays(&self, mode: GLenum, first: GLint, count: GLsizei) {
        self.gl.draw_arrays(mode, first, count)
    }

    fn draw_elements(&self, mode: GLenum, count: GLsizei, ty: GLenum, offset: GLuint) {
        self.gl.draw_elements(mode, count, ty, offset)
    }

    fn read_pixels(
        &self,
        x: GLint,
        y: GLint,
        width: GLsizei,
        height: GLsizei,
        format: GLenum,
        ty: GLenum,
    ) -> Vec<u8> {
        self.gl.read_pixels(x, y, width, height, format, ty)
    }

    fn fence_sync(&self, condition: GLenum, flags: u32) -> u64 {
        self.gl.fence_sync(condition, flags) as usize as u64
    }

    fn client_wait_sync(&self, sync: u64, flags: u32, timeout: u64) -> GLenum {
        let _ = self.gl.client_wait_sync(sync_ptr(sync), flags, timeout);
        gl::CONDITION_SATISFIED
    }

    fn wait_sync(&self, sync: u64, flags: u32, timeout: u64) {
        self.gl.wait_sync(sync_ptr(sync), flags, timeout)
    }

    fn delete_sync(&self, sync: u64) {
        self.gl.delete_sync(sync_ptr(sync))
    }

    fn egl_image_target_texture_2d_oes(&self, target: GLenum, image: u64) {
        self.gl
            .egl_image_target_texture2d_oes(target, image as usize as gl::GLeglImageOES)
    }
}

/// A driver that does no GPU work at all.
///
/// Object creation hands out increasing names, queries report success, and
/// everything else is counted and dropped. Used for headless runs that only
/// exercise the retracer's own bookkeeping.
#[derive(Default)]
pub struct NullDriver {
    next_name: Cell<GLuint>,
    calls: Cell<usize>,
}

impl NullDriver {
    pub fn new() -> NullDriver {
        NullDriver::default()
    }

    /// How many driver entry points have been called.
    pub fn call_count(&self) -> usize {
        self.calls.get()
    }

    fn count(&self) {
        self.calls.set(self.calls.get() + 1);
    }

    fn fresh(&self) -> GLuint {
        self.count();
        let name = self.next_name.get() + 1;
        self.next_name.set(name);
        name
    }
}

impl Driver for NullDriver {
    fn get_error(&self) -> GLenum {
        gl::NO_ERROR
    }
    fn get_string(&self, which: GLenum) -> String {
        match which {
            gl::VERSION => "OpenGL ES 3.2 (null)".to_string(),
            _ => String::new(),
        }
    }
    fn get_integer(&self, _pname: GLenum) -> GLint {
        0
    }
    fn get_integer_v(&self, _pname: GLenum, result: &mut [GLint]) {
        for value in result {
            *value = 0;
        }
    }
    fn get_float_v(&self, _pname: GLenum, result: &mut [f32]) {
        for value in result {
            *value = 0.0;
        }
    }
    fn flush(&self) {
        self.count()
    }
    fn finish(&self) {
        self.count()
    }
    fn gen_names(&self, _namespace: Namespace, n: GLsizei) -> Vec<GLuint> {
        (0..n.max(0)).map(|_| self.fresh()).collect()
    }
    fn delete_names(&self, _namespace: Namespace, _names: &[GLuint]) {
        self.count()
    }
    fn bind_framebuffer(&self, _target: GLenum, _framebuffer: GLuint) {
        self.count()
    }
    fn bind_renderbuffer(&self, _target: GLenum, _renderbuffer: GLuint) {
        self.count()
    }
    fn bind_texture(&self, _target: GLenum, _texture: GLuint) {
        self.count()
    }
    fn bind_buffer(&self, _target: GLenum, _buffer: GLuint) {
        self.count()
    }
    fn bind_vertex_array(&self, _vao: GLuint) {
        self.count()
    }
    fn active_texture(&self, _texture: GLenum) {
        self.count()
    }
    fn tex_image_2d(
        &self,
        _target: GLenum,
        _level: GLint,
        _internal_format: GLint,
        _width: GLsizei,
        _height: GLsizei,
        _border: GLint,
        _format: GLenum,
        _ty: GLenum,
        _data: Option<&[u8]>,
    ) {
        self.count()
    }
    fn tex_parameter_i(&self, _target: GLenum, _pname: GLenum, _param: GLint) {
        self.count()
    }
    fn renderbuffer_storage(&self, _: GLenum, _: GLenum, _: GLsizei, _: GLsizei) {
        self.count()
    }
    fn renderbuffer_storage_multisample(
        &self,
        _: GLenum,
        _: GLsizei,
        _: GLenum,
        _: GLsizei,
        _: GLsizei,
    ) {
        self.count()
    }
    fn framebuffer_texture_2d(&self, _: GLenum, _: GLenum, _: GLenum, _: GLuint, _: GLint) {
        self.count()
    }
    fn framebuffer_texture_2d_multisample(
        &self,
        _: GLenum,
        _: GLenum,
        _: GLenum,
        _: GLuint,
        _: GLint,
        _: GLsizei,
    ) {
        self.count()
    }
    fn framebuffer_renderbuffer(&self, _: GLenum, _: GLenum, _: GLenum, _: GLuint) {
        self.count()
    }
    fn check_frame_buffer_status(&self, _target: GLenum) -> GLenum {
        gl::FRAMEBUFFER_COMPLETE
    }
    fn invalidate_framebuffer(&self, _target: GLenum, _attachments: &[GLenum]) {
        self.count()
    }
    fn viewport(&self, _: GLint, _: GLint, _: GLsizei, _: GLsizei) {
        self.count()
    }
    fn scissor(&self, _: GLint, _: GLint, _: GLsizei, _: GLsizei) {
        self.count()
    }
    fn enable(&self, _cap: GLenum) {
        self.count()
    }
    fn disable(&self, _cap: GLenum) {
        self.count()
    }
    fn is_enabled(&self, _cap: GLenum) -> bool {
        false
    }
    fn clear_color(&self, _: f32, _: f32, _: f32, _: f32) {
        self.count()
    }
    fn clear(&self, _mask: GLenum) {
        self.count()
    }
    fn create_shader(&self, _shader_type: GLenum) -> GLuint {
        self.fresh()
    }
    fn shader_source(&self, _shader: GLuint, _source: &str) {
        self.count()
    }
    fn compile_shader(&self, _shader: GLuint) {
        self.count()
    }
    fn get_shader_iv(&self, _shader: GLuint, pname: GLenum) -> GLint {
        match pname {
            gl::COMPILE_STATUS => 1,
            _ => 0,
        }
    }
    fn get_shader_info_log(&self, _shader: GLuint) -> String {
        String::new()
    }
    fn delete_shader(&self, _shader: GLuint) {
        self.count()
    }
    fn create_program(&self) -> GLuint {
        self.fresh()
    }
    fn attach_shader(&self, _program: GLuint, _shader: GLuint) {
        self.count()
    }
    fn bind_attrib_location(&self, _program: GLuint, _index: GLuint, _name: &str) {
        self.count()
    }
    fn link_program(&self, _program: GLuint) {
        self.count()
    }
    fn get_program_iv(&self, _program: GLuint, pname: GLenum) -> GLint {
        match pname {
            gl::LINK_STATUS => 1,
            _ => 0,
        }
    }
    fn get_program_info_log(&self, _program: GLuint) -> String {
        String::new()
    }
    fn get_program_binary(&self, _program: GLuint) -> (Vec<u8>, GLenum) {
        (Vec::new(), 0)
    }
    fn program_binary(&self, _program: GLuint, _format: GLenum, _binary: &[u8]) {
        self.count()
    }
    fn use_program(&self, _program: GLuint) {
        self.count()
    }
    fn delete_program(&self, _program: GLuint) {
        self.count()
    }
    fn get_uniform_location(&self, _program: GLuint, _name: &str) -> GLint {
        0
    }
    fn uniform_1i(&self, _location: GLint, _value: GLint) {
        self.count()
    }
    fn buffer_data_f32(&self, _target: GLenum, _data: &[f32], _usage: GLenum) {
        self.count()
    }
    fn vertex_attrib_pointer(&self, _: GLuint, _: GLint, _: GLenum, _: bool, _: GLsizei, _: GLuint) {
        self.count()
    }
    fn enable_vertex_attrib_array(&self, _index: GLuint) {
        self.count()
    }
    fn disable_vertex_attrib_array(&self, _index: GLuint) {
        self.count()
    }
    fn draw_arrays(&self, _mode: GLenum, _first: GLint, _count: GLsizei) {
        self.count()
    }
    fn draw_elements(&self, _mode: GLenum, _count: GLsizei, _ty: GLenum, _offset: GLuint) {
        self.count()
    }
    fn read_pixels(
        &self,
        _x: GLint,
        _y: GLint,
        width: GLsizei,
        height: GLsizei,
        _format: GLenum,
        _ty: GLenum,
    ) -> Vec<u8> {
        self.count();
        vec![0; width.max(0) as usize * height.max(0) as usize * 4]
    }
    fn fence_sync(&self, _condition: GLenum, _flags: u32) -> u64 {
        u64::from(self.fresh())
    }
    fn client_wait_sync(&self, _sync: u64, _flags: u32, _timeout: u64) -> GLenum {
        self.count();
        gl::CONDITION_SATISFIED
    }
    fn wait_sync(&self, _sync: u64, _flags: u32, _timeout: u64) {
        self.count()
    }
    fn delete_sync(&self, _sync: u64) {
        self.count()
    }
    fn egl_image_target_texture_2d_oes(&self, _target: GLenum, _image: u64) {
        self.count()
    }
}

#[test]
fn test_version_and_extensions() {
    assert_eq!(gles_major_version("OpenGL ES 3.2 v1.r20p0"), 3);
    assert_eq!(gles_major_version("OpenGL ES 2.0"), 2);
    assert_eq!(gles_major_version("garbage"), 2);

    let exts = "GL_OES_depth24 GL_EXT_multisampled_render_to_texture";
    assert!(has_extension(exts, "GL_OES_depth24"));
    assert!(!has_extension(exts, "GL_OES_depth"));
    assert_eq!(error_name(gl::OUT_OF_MEMORY), "GL_OUT_OF_MEMORY");
}

#[test]
fn test_null_driver_names() {
    let driver = NullDriver::new();
    assert_eq!(driver.gen_names(Namespace::Texture, 3), vec![1, 2, 3]);
    assert_eq!(driver.create_program(), 4);
    assert_eq!(driver.get_program_iv(4, gl::LINK_STATUS), 1);
    assert_eq!(gles_major_version(&driver.get_string(gl::VERSION)), 3);
    assert_eq!(driver.call_count(), 4);
}
