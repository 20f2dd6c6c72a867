//! Replay functions for the GL calls the retracer has to interpret.
//!
//! Object names in the trace are the ones the recording driver handed out;
//! `glGen*` calls record the mapping to the names our driver hands out, and
//! every later use goes through the current context's `HandleMap`s. Names
//! that were never generated read as 0, which the driver treats as "no
//! object", and are logged.
//!
//! Besides remapping, these functions redirect the on-screen framebuffer to
//! the offscreen one, keep the viewport and scissor the application asked for
//! so they can be scaled under a resolution override, check shader compiles
//! and program links, and honour the fence-skipping range.

use gleam::gl::{self, GLenum};
use log::{debug, warn};

use crate::call::ArgCursor;
use crate::driver::Driver;
use crate::engine::Retracer;
use crate::error::{Result, RetraceError};
use crate::registry::DispatchTable;
use crate::resource::{Namespace, Resources};
use crate::shader_cache::{self, ProgramBinary};
use crate::state::Rectangle;

/// Generating and deleting functions for each remapped namespace.
const GEN_DELETE: &[(&str, &str, Namespace)] = &[
    ("glGenTextures", "glDeleteTextures", Namespace::Texture),
    ("glGenBuffers", "glDeleteBuffers", Namespace::Buffer),
    ("glGenFramebuffers", "glDeleteFramebuffers", Namespace::Framebuffer),
    ("glGenFramebuffersOES", "glDeleteFramebuffersOES", Namespace::Framebuffer),
    ("glGenRenderbuffers", "glDeleteRenderbuffers", Namespace::Renderbuffer),
    ("glGenRenderbuffersOES", "glDeleteRenderbuffersOES", Namespace::Renderbuffer),
    ("glGenVertexArrays", "glDeleteVertexArrays", Namespace::VertexArray),
    ("glGenVertexArraysOES", "glDeleteVertexArraysOES", Namespace::VertexArray),
    ("glGenSamplers", "glDeleteSamplers", Namespace::Sampler),
    ("glGenTransformFeedbacks", "glDeleteTransformFeedbacks", Namespace::TransformFeedback),
    ("glGenQueries", "glDeleteQueries", Namespace::Query),
    ("glGenQueriesEXT", "glDeleteQueriesEXT", Namespace::Query),
    ("glGenProgramPipelines", "glDeleteProgramPipelines", Namespace::Pipeline),
    ("glGenProgramPipelinesEXT", "glDeleteProgramPipelinesEXT", Namespace::Pipeline),
];

pub fn register(table: &mut DispatchTable) {
    for &(gen, delete, namespace) in GEN_DELETE {
        table.register(gen, true, move |r, args| gen_names(r, args, namespace, gen));
        table.register(delete, true, move |r, args| {
            delete_names(r, args, namespace, delete)
        });
    }

    table.register("glBindTexture", true, bind_texture);
    table.register("glBindBuffer", true, bind_buffer);
    table.register("glBindRenderbuffer", true, bind_renderbuffer);
    table.register("glBindRenderbufferOES", true, bind_renderbuffer);
    table.register("glBindVertexArray", true, bind_vertex_array);
    table.register("glBindVertexArrayOES", true, bind_vertex_array);
    for &name in &["glBindFramebuffer", "glBindFramebufferOES", "glBindFramebufferEXT"] {
        table.register(name, true, bind_framebuffer);
    }
    table.register("glActiveTexture", true, |r, args| {
        r.driver().active_texture(args.u32()?);
        Ok(())
    });
    for &name in &["glInvalidateFramebuffer", "glDiscardFramebufferEXT"] {
        table.register(name, true, invalidate_framebuffer);
    }

    table.register("glViewport", true, viewport);
    table.register("glScissor", true, scissor);
    table.register("glEnable", true, |r, args| {
        r.driver().enable(args.u32()?);
        Ok(())
    });
    table.register("glDisable", true, |r, args| {
        r.driver().disable(args.u32()?);
        Ok(())
    });
    table.register("glClearColor", true, |r, args| {
        let (red, green, blue, alpha) = (args.f32()?, args.f32()?, args.f32()?, args.f32()?);
        r.driver().clear_color(red, green, blue, alpha);
        Ok(())
    });
    table.register("glClear", true, |r, args| {
        r.driver().clear(args.u32()?);
        Ok(())
    });
    table.register("glDrawArrays", true, draw_arrays);
    table.register("glDrawElements", true, draw_elements);

    table.register("glCreateShader", true, create_shader);
    table.register("glShaderSource", true, shader_source);
    table.register("glCompileShader", true, compile_shader);
    table.register("glDeleteShader", true, delete_shader);
    table.register("glCreateProgram", true, create_program);
    table.register("glAttachShader", true, attach_shader);
    table.register("glBindAttribLocation", true, bind_attrib_location);
    table.register("glLinkProgram", true, link_program);
    table.register("glUseProgram", true, use_program);
    table.register("glDeleteProgram", true, delete_program);

    table.register("glFenceSync", true, fence_sync);
    table.register("glClientWaitSync", true, client_wait_sync);
    table.register("glWaitSync", true, wait_sync);
    table.register("glDeleteSync", true, delete_sync);

    table.register("glFlush", true, |r, _| {
        r.driver().flush();
        Ok(())
    });
    table.register("glFinish", true, |r, _| {
        r.driver().finish();
        Ok(())
    });
    table.register("glReadPixels", true, |r, args| {
        let (x, y, width, height) = (args.i32()?, args.i32()?, args.i32()?, args.i32()?);
        let (format, ty) = (args.u32()?, args.u32()?);
        r.driver().read_pixels(x, y, width, height, format, ty);
        Ok(())
    });
}

/// Run `f` with the current context's namespaces and the driver. Calls made
/// with no context current do nothing.
fn with_resources<F>(r: &mut Retracer, name: &str, f: F) -> Result<()>
where
    F: FnOnce(&mut Resources, &dyn Driver) -> Result<()>,
{
    let tid = r.cur_tid;
    let driver = r.window.driver();
    match r.state.current_resources(tid) {
        Some(mut resources) => f(&mut resources, driver),
        None => {
            debug!("{} with no current context", name);
            Ok(())
        }
    }
}

/// The live name for `recorded` in `namespace`, or 0 if it was never
/// generated.
fn live_name(resources: &mut Resources, namespace: Namespace, recorded: u32) -> u32 {
    let map = resources.map(namespace);
    if recorded != 0 && !map.is_live(recorded) {
        debug!("{:?} {} was never created; using 0", namespace, recorded);
    }
    map.get(recorded)
}

/// Read a `GLsizei n, const GLuint *names` pair.
fn counted_names(args: &mut ArgCursor, name: &str) -> Result<Vec<u32>> {
    let n = args.i32()?;
    let names = args.u32_array()?;
    if n < 0 || n as usize != names.len() {
        return Err(RetraceError::invalid_trace(format!(
            "{}: n is {}, but {} names were recorded",
            name,
            n,
            names.len()
        )));
    }
    Ok(names)
}

fn gen_names(r: &mut Retracer, args: &mut ArgCursor, namespace: Namespace, name: &str) -> Result<()> {
    let recorded = counted_names(args, name)?;
    with_resources(r, name, |resources, driver| {
        let live = driver.gen_names(namespace, recorded.len() as i32);
        let map = resources.map(namespace);
        for (&old, &new) in recorded.iter().zip(live.iter()) {
            map.set(old, new);
        }
        Ok(())
    })
}

fn delete_names(
    r: &mut Retracer,
    args: &mut ArgCursor,
    namespace: Namespace,
    name: &str,
) -> Result<()> {
    let recorded = counted_names(args, name)?;
    let on_screen = r.options.on_screen_fbo;
    with_resources(r, name, |resources, driver| {
        let mut live = Vec::with_capacity(recorded.len());
        for &old in &recorded {
            // Deleting the default framebuffer, or name 0, does nothing.
            if old == 0 || (namespace == Namespace::Framebuffer && old == on_screen) {
                continue;
            }
            let map = resources.map(namespace);
            if map.is_live(old) {
                live.push(map.forget(old));
            } else {
                debug!("{}: {} was never created", name, old);
            }
        }
        driver.delete_names(namespace, &live);

        // Deleting the bound framebuffer rebinds the default one.
        let context = &mut *resources.context;
        if namespace == Namespace::Framebuffer
            && context.current_framebuffer != on_screen
            && recorded.contains(&context.current_framebuffer)
        {
            context.current_framebuffer = on_screen;
            if let Some(offscreen) = &context.offscreen {
                offscreen.bind_offscreen_fbo(driver, gl::FRAMEBUFFER);
            }
        }
        Ok(())
    })
}

fn bind_texture(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let target = args.u32()?;
    let texture = args.u32()?;
    with_resources(r, "glBindTexture", |resources, driver| {
        driver.bind_texture(target, live_name(resources, Namespace::Texture, texture));
        Ok(())
    })
}

fn bind_buffer(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let target = args.u32()?;
    let buffer = args.u32()?;
    with_resources(r, "glBindBuffer", |resources, driver| {
        driver.bind_buffer(target, live_name(resources, Namespace::Buffer, buffer));
        Ok(())
    })
}

fn bind_renderbuffer(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let target = args.u32()?;
    let renderbuffer = args.u32()?;
    with_resources(r, "glBindRenderbuffer", |resources, driver| {
        let live = live_name(resources, Namespace::Renderbuffer, renderbuffer);
        driver.bind_renderbuffer(target, live);
        Ok(())
    })
}

fn bind_vertex_array(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let vao = args.u32()?;
    with_resources(r, "glBindVertexArray", |resources, driver| {
        driver.bind_vertex_array(live_name(resources, Namespace::VertexArray, vao));
        Ok(())
    })
}

/// In offscreen mode, binding the on-screen framebuffer binds the offscreen
/// one instead.
fn bind_framebuffer(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let target = args.u32()?;
    let framebuffer = args.u32()?;
    let on_screen = r.options.on_screen_fbo;
    with_resources(r, "glBindFramebuffer", |resources, driver| {
        if target == gl::FRAMEBUFFER || target == gl::DRAW_FRAMEBUFFER {
            resources.context.current_framebuffer = framebuffer;
        }
        if framebuffer == on_screen {
            if let Some(offscreen) = &resources.context.offscreen {
                offscreen.bind_offscreen_fbo(driver, target);
                return Ok(());
            }
        }
        let live = live_name(resources, Namespace::Framebuffer, framebuffer);
        driver.bind_framebuffer(target, live);
        Ok(())
    })
}

/// The offscreen framebuffer has attachments where the window had buffers.
fn offscreen_attachment(attachment: GLenum) -> GLenum {
    match attachment {
        gl::COLOR => gl::COLOR_ATTACHMENT0,
        gl::DEPTH => gl::DEPTH_ATTACHMENT,
        gl::STENCIL => gl::STENCIL_ATTACHMENT,
        other => other,
    }
}

fn invalidate_framebuffer(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let target = args.u32()?;
    let mut attachments = counted_names(args, "glInvalidateFramebuffer")?;
    if r.options.force_offscreen {
        for attachment in &mut attachments {
            *attachment = offscreen_attachment(*attachment);
        }
    }
    r.driver().invalidate_framebuffer(target, &attachments);
    Ok(())
}

fn read_rectangle(args: &mut ArgCursor) -> Result<Rectangle> {
    Ok(Rectangle::new(args.i32()?, args.i32()?, args.i32()?, args.i32()?))
}

/// Under a resolution override the application's viewport is only recorded
/// here; `pre_draw` passes it on, scaled, when something is drawn.
fn viewport(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let rect = read_rectangle(args)?;
    r.state.thread_mut(r.cur_tid)?.app_viewport = rect;
    if !r.options.do_override_resolution {
        r.driver().viewport(rect.x, rect.y, rect.width, rect.height);
    }
    Ok(())
}

fn scissor(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let rect = read_rectangle(args)?;
    if r.options.do_override_resolution {
        r.state.thread_mut(r.cur_tid)?.app_scissor = rect;
    } else {
        r.driver().scissor(rect.x, rect.y, rect.width, rect.height);
    }
    Ok(())
}

/// Bring the driver's viewport and scissor up to date with the
/// application's before a draw. Drawing to the screen scales them by the
/// override ratio; drawing to a framebuffer object uses them as they are.
fn pre_draw(r: &mut Retracer) -> Result<()> {
    if !r.options.do_override_resolution {
        return Ok(());
    }
    let on_screen = match r.current_context().and_then(|c| r.state.context(c)) {
        Some(context) => context.current_framebuffer == r.options.on_screen_fbo,
        None => return Ok(()),
    };
    let (ratio_w, ratio_h) = (r.options.override_ratio_w, r.options.override_ratio_h);
    let driver = r.window.driver();
    let slot = r.state.thread_mut(r.cur_tid)?;
    let (viewport, scissor) = if on_screen {
        (
            slot.app_viewport.stretch(ratio_w, ratio_h),
            slot.app_scissor.stretch(ratio_w, ratio_h),
        )
    } else {
        (slot.app_viewport, slot.app_scissor)
    };
    if slot.driver_viewport != viewport {
        slot.driver_viewport = viewport;
        driver.viewport(viewport.x, viewport.y, viewport.width, viewport.height);
    }
    if slot.driver_scissor != scissor {
        slot.driver_scissor = scissor;
        driver.scissor(scissor.x, scissor.y, scissor.width, scissor.height);
    }
    Ok(())
}

fn draw_arrays(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let mode = args.u32()?;
    let first = args.i32()?;
    let count = args.i32()?;
    pre_draw(r)?;
    r.driver().draw_arrays(mode, first, count);
    r.on_draw();
    Ok(())
}

fn draw_elements(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let mode = args.u32()?;
    let count = args.i32()?;
    let ty = args.u32()?;
    let offset = args.u32()?;
    pre_draw(r)?;
    r.driver().draw_elements(mode, count, ty, offset);
    r.on_draw();
    Ok(())
}

fn create_shader(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let shader_type = args.u32()?;
    let ret = args.u32()?;
    with_resources(r, "glCreateShader", |resources, driver| {
        let live = driver.create_shader(shader_type);
        resources.shaders().set(ret, live);
        Ok(())
    })
}

fn shader_source(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let shader = args.u32()?;
    let source = args.str_array()?.concat();
    with_resources(r, "glShaderSource", |resources, driver| {
        let live = live_name(resources, Namespace::Shader, shader);
        driver.shader_source(live, &source);
        resources.shared.shader_sources.insert(live, source);
        Ok(())
    })
}

fn compile_shader(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let shader = args.u32()?;
    let tid = r.cur_tid;
    let live = match r.state.current_resources(tid) {
        Some(mut resources) => live_name(&mut resources, Namespace::Shader, shader),
        None => {
            debug!("glCompileShader with no current context");
            return Ok(());
        }
    };

    let driver = r.driver();
    driver.compile_shader(live);
    if driver.get_shader_iv(live, gl::COMPILE_STATUS) != 0 {
        return Ok(());
    }
    let msg = format!(
        "Error in compiling shader {}: {}",
        shader,
        driver.get_shader_info_log(live)
    );
    if r.options.fail_on_shader_error {
        return Err(r.report_and_abort(&msg));
    }
    warn!("{}", msg);
    Ok(())
}

fn delete_shader(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let shader = args.u32()?;
    with_resources(r, "glDeleteShader", |resources, driver| {
        if shader == 0 {
            return Ok(());
        }
        let live = live_name(resources, Namespace::Shader, shader);
        driver.delete_shader(live);
        resources.shaders().forget(shader);
        resources.shared.shader_sources.remove(&live);
        Ok(())
    })
}

fn create_program(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let ret = args.u32()?;
    with_resources(r, "glCreateProgram", |resources, driver| {
        let live = driver.create_program();
        resources.programs().set(ret, live);
        Ok(())
    })
}

fn attach_shader(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let program = args.u32()?;
    let shader = args.u32()?;
    with_resources(r, "glAttachShader", |resources, driver| {
        let program = live_name(resources, Namespace::Program, program);
        let shader = live_name(resources, Namespace::Shader, shader);
        driver.attach_shader(program, shader);
        resources
            .shared
            .program_shaders
            .entry(program)
            .or_default()
            .push(shader);
        Ok(())
    })
}

fn bind_attrib_location(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let program = args.u32()?;
    let index = args.u32()?;
    let name = args.str()?;
    with_resources(r, "glBindAttribLocation", |resources, driver| {
        let program = live_name(resources, Namespace::Program, program);
        driver.bind_attrib_location(program, index, name);
        Ok(())
    })
}

/// `glLinkProgram(program)`, followed by the link status the recording
/// driver reported: 1 for success, 0 for failure, -1 if unknown.
///
/// With a shader cache, a program whose sources have been seen before is
/// loaded from its cached binary; programs linked from source are added.
fn link_program(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let program = args.u32()?;
    let recorded_status = args.i32()?;

    let tid = r.cur_tid;
    let caching = r.shader_cache.is_some();
    let (live, digest) = match r.state.current_resources(tid) {
        Some(mut resources) => {
            let live = live_name(&mut resources, Namespace::Program, program);
            let digest = if caching {
                Some(shader_cache::digest(resources.shared.program_sources(live)))
            } else {
                None
            };
            (live, digest)
        }
        None => {
            debug!("glLinkProgram with no current context");
            return Ok(());
        }
    };

    let driver = r.window.driver();
    let mut linked = false;
    if let (Some(cache), Some(digest)) = (r.shader_cache.as_mut(), digest.as_ref()) {
        if let Some(binary) = cache.lookup(digest)? {
            driver.program_binary(live, binary.format, &binary.data);
            linked = driver.get_program_iv(live, gl::LINK_STATUS) != 0;
            if linked {
                debug!("program {} loaded from the shader cache", program);
            } else {
                debug!("cached binary for program {} was rejected; linking from source", program);
            }
        }
    }
    if !linked {
        driver.link_program(live);
        linked = driver.get_program_iv(live, gl::LINK_STATUS) != 0;
        if let (true, Some(cache), Some(digest)) = (linked, r.shader_cache.as_mut(), digest) {
            let (data, format) = driver.get_program_binary(live);
            if data.is_empty() {
                debug!("no binary available for program {}", program);
            } else {
                cache.append(digest, &ProgramBinary { format, data })?;
            }
        }
    }
    if linked {
        return Ok(());
    }

    let msg = format!(
        "Error in linking program {}: {}",
        program,
        driver.get_program_info_log(live)
    );
    if recorded_status == 0 {
        debug!("{} (it failed when recorded, too)", msg);
        return Ok(());
    }
    if r.options.link_error_whitelist.contains(&r.cur_call_no) {
        warn!("{}", msg);
        return Ok(());
    }
    r.failed_to_link = true;
    Err(r.report_and_abort(&msg))
}

fn use_program(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let program = args.u32()?;
    with_resources(r, "glUseProgram", |resources, driver| {
        let live = live_name(resources, Namespace::Program, program);
        resources.context.current_program = live;
        driver.use_program(live);
        Ok(())
    })
}

fn delete_program(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let program = args.u32()?;
    with_resources(r, "glDeleteProgram", |resources, driver| {
        if program == 0 {
            return Ok(());
        }
        let live = live_name(resources, Namespace::Program, program);
        driver.delete_program(live);
        resources.programs().forget(program);
        resources.shared.program_shaders.remove(&live);
        Ok(())
    })
}

fn fence_sync(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let condition = args.u32()?;
    let flags = args.u32()?;
    let ret = args.u32()?;
    with_resources(r, "glFenceSync", |resources, driver| {
        let sync = driver.fence_sync(condition, flags);
        resources.syncs().set(ret, sync);
        Ok(())
    })
}

fn live_sync(resources: &mut Resources, sync: u32) -> Option<u64> {
    let map = resources.syncs();
    if map.is_live(sync) {
        Some(map.get(sync))
    } else {
        debug!("sync {:#x} was never created", sync);
        None
    }
}

/// `glClientWaitSync(sync, flags, timeout)`, followed by what it returned
/// when recorded. A wait that was satisfied then is repeated until it is
/// satisfied now.
fn client_wait_sync(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let sync = args.u32()?;
    let flags = args.u32()?;
    let timeout = args.u64()?;
    let recorded = args.u32()?;
    if r.options.skip_fence(r.cur_frame) {
        debug!("skipping glClientWaitSync in frame {}", r.cur_frame);
        return Ok(());
    }
    with_resources(r, "glClientWaitSync", |resources, driver| {
        let live = match live_sync(resources, sync) {
            Some(live) => live,
            None => return Ok(()),
        };
        let satisfied = recorded == gl::ALREADY_SIGNALED || recorded == gl::CONDITION_SATISFIED;
        let mut result = driver.client_wait_sync(live, flags, timeout);
        while satisfied && result == gl::TIMEOUT_EXPIRED {
            result = driver.client_wait_sync(live, flags, u64::MAX);
        }
        if result != recorded {
            debug!("glClientWaitSync returned {:#x}, but {:#x} when recorded", result, recorded);
        }
        Ok(())
    })
}

fn wait_sync(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let sync = args.u32()?;
    let flags = args.u32()?;
    let timeout = args.u64()?;
    if r.options.skip_fence(r.cur_frame) {
        debug!("skipping glWaitSync in frame {}", r.cur_frame);
        return Ok(());
    }
    with_resources(r, "glWaitSync", |resources, driver| {
        if let Some(live) = live_sync(resources, sync) {
            driver.wait_sync(live, flags, timeout);
        }
        Ok(())
    })
}

fn delete_sync(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let sync = args.u32()?;
    with_resources(r, "glDeleteSync", |resources, driver| {
        if live_sync(resources, sync).is_some() {
            driver.delete_sync(resources.syncs().forget(sync));
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{ArgWriter, EGL_NONE};
    use crate::config::{MosaicLayout, RetraceOptions};
    use crate::egl;
    use crate::result::{RunReport, TraceErrorKind};
    use crate::testing::{fake_retracer, replay, FakeWindowSystem};

    const SURFACE: u64 = 0x5001;

    fn options() -> RetraceOptions {
        let mut options = RetraceOptions::default();
        options.window_width = 800;
        options.window_height = 600;
        options
    }

    fn new_context(r: &mut Retracer, ctx: u64, share: u64) {
        let attribs = [0x3098, 3, EGL_NONE];
        let args = ArgWriter::new().u64(1).u64(1).u64(share).i32_array(&attribs).u64(ctx);
        replay(r, egl::create_context, args).unwrap();
    }

    fn bind(r: &mut Retracer, ctx: u64) {
        if r.state.get_drawable(SURFACE).is_none() {
            egl::create_window_surface(r, 1, 1, 0, &[EGL_NONE], SURFACE).unwrap();
        }
        if r.state.get_context(ctx).is_none() {
            new_context(r, ctx, 0);
        }
        egl::make_current(r, 1, SURFACE, SURFACE, ctx).unwrap();
    }

    fn bound(options: RetraceOptions) -> (Retracer, FakeWindowSystem) {
        let (mut r, window, _) = fake_retracer(options);
        bind(&mut r, 0xc1);
        window.fake_driver().take_log();
        (r, window)
    }

    fn gen(r: &mut Retracer, f: &'static str, names: &[u32]) {
        let namespace = GEN_DELETE.iter().find(|e| e.0 == f).unwrap().2;
        let bytes = ArgWriter::new().i32(names.len() as i32).u32_array(names).finish();
        gen_names(r, &mut ArgCursor::new(&bytes), namespace, f).unwrap();
    }

    fn delete(r: &mut Retracer, namespace: Namespace, names: &[u32]) {
        let bytes = ArgWriter::new().i32(names.len() as i32).u32_array(names).finish();
        delete_names(r, &mut ArgCursor::new(&bytes), namespace, "glDelete").unwrap();
    }

    #[test]
    fn test_names_are_remapped() {
        let (mut r, window) = bound(options());
        gen(&mut r, "glGenTextures", &[3, 9]);
        let live = r.current_resources().unwrap().textures().get(9);
        assert_ne!(live, 0);

        let bind = |r: &mut Retracer, texture| {
            replay(r, bind_texture, ArgWriter::new().u32(gl::TEXTURE_2D).u32(texture)).unwrap()
        };
        bind(&mut r, 9);
        bind(&mut r, 42);
        delete(&mut r, Namespace::Texture, &[3, 42]);
        bind(&mut r, 3);

        let log = window.fake_driver().take_log();
        let live3 = live - 1;
        assert_eq!(
            log,
            vec![
                format!("gen_names(Texture, [{}, {}])", live3, live),
                format!("bind_texture(0xde1, {})", live),
                "bind_texture(0xde1, 0)".to_string(),
                format!("delete_names(Texture, [{}])", live3),
                "bind_texture(0xde1, 0)".to_string(),
            ]
        );
    }

    #[test]
    fn test_gen_count_mismatch() {
        let (mut r, _) = bound(options());
        let bytes = ArgWriter::new().i32(3).u32_array(&[1, 2]).finish();
        let result = gen_names(&mut r, &mut ArgCursor::new(&bytes), Namespace::Buffer, "glGenBuffers");
        assert!(matches!(result, Err(RetraceError::InvalidTrace(_))));
    }

    #[test]
    fn test_share_groups() {
        let (mut r, _) = bound(options());
        gen(&mut r, "glGenTextures", &[1]);
        gen(&mut r, "glGenFramebuffers", &[2]);

        new_context(&mut r, 0xc2, 0xc1);
        new_context(&mut r, 0xc3, 0);
        bind(&mut r, 0xc2);
        assert!(r.current_resources().unwrap().textures().is_live(1));
        assert!(!r.current_resources().unwrap().map(Namespace::Framebuffer).is_live(2));

        bind(&mut r, 0xc3);
        assert!(!r.current_resources().unwrap().textures().is_live(1));
    }

    #[test]
    fn test_offscreen_framebuffer_redirect() {
        let mut opts = options();
        opts.force_offscreen = true;
        opts.mosaic = MosaicLayout {
            tiles_x: 1,
            tiles_y: 1,
            tile_width: 8,
            tile_height: 8,
        };
        let (mut r, window) = bound(opts);
        let offscreen = r
            .with_offscreen(|offscreen, _| offscreen.offscreen_framebuffer())
            .unwrap();

        gen(&mut r, "glGenFramebuffers", &[5]);
        let fbo = r.current_resources().unwrap().map(Namespace::Framebuffer).get(5);
        let bind = |r: &mut Retracer, fb| {
            replay(r, bind_framebuffer, ArgWriter::new().u32(gl::FRAMEBUFFER).u32(fb)).unwrap()
        };
        bind(&mut r, 5);
        bind(&mut r, 0);
        bind(&mut r, 5);
        let current = |r: &mut Retracer| r.current_resources().unwrap().context.current_framebuffer;
        assert_eq!(current(&mut r), 5);

        // Deleting the bound framebuffer falls back to the offscreen one.
        window.fake_driver().take_log();
        delete(&mut r, Namespace::Framebuffer, &[5]);
        assert_eq!(current(&mut r), 0);
        let log = window.fake_driver().take_log();
        assert_eq!(log.last().unwrap(), &format!("bind_framebuffer(0x8d40, {})", offscreen));

        let invalidate = ArgWriter::new().u32(gl::FRAMEBUFFER).i32(2).u32_array(&[gl::COLOR, gl::DEPTH]);
        replay(&mut r, invalidate_framebuffer, invalidate).unwrap();
        assert_eq!(
            window.fake_driver().take_log(),
            vec!["invalidate_framebuffer(0x8d40, [0x8ce0, 0x8d00])".to_string()]
        );
        assert_ne!(fbo, offscreen);
    }

    #[test]
    fn test_resolution_override_scales_on_screen_draws() {
        let mut opts = options();
        opts.do_override_resolution = true;
        opts.override_width = 400;
        opts.override_height = 300;
        opts.update_override_ratio().unwrap();
        let (mut r, window) = bound(opts);

        replay(&mut r, viewport, ArgWriter::new().i32(0).i32(0).i32(800).i32(600)).unwrap();
        replay(&mut r, scissor, ArgWriter::new().i32(100).i32(100).i32(200).i32(200)).unwrap();
        // Recorded, but not passed on yet.
        assert!(window.fake_driver().take_log().is_empty());

        let draw = || ArgWriter::new().u32(gl::TRIANGLES).i32(0).i32(3);
        replay(&mut r, draw_arrays, draw()).unwrap();
        replay(&mut r, draw_arrays, draw()).unwrap();
        assert_eq!(
            window.fake_driver().take_log(),
            vec![
                "scissor(50, 50, 100, 100)".to_string(),
                "draw_arrays(0x4, 0, 3)".to_string(),
                "draw_arrays(0x4, 0, 3)".to_string(),
            ]
        );

        // Framebuffer objects get the application's rectangles unscaled.
        gen(&mut r, "glGenFramebuffers", &[1]);
        replay(&mut r, bind_framebuffer, ArgWriter::new().u32(gl::FRAMEBUFFER).u32(1)).unwrap();
        window.fake_driver().take_log();
        replay(&mut r, draw_arrays, draw()).unwrap();
        assert_eq!(
            window.fake_driver().take_log(),
            vec![
                "viewport(0, 0, 800, 600)".to_string(),
                "scissor(100, 100, 200, 200)".to_string(),
                "draw_arrays(0x4, 0, 3)".to_string(),
            ]
        );
    }

    #[test]
    fn test_draws_wait_for_step_events() {
        let mut opts = options();
        opts.step_draws = 2;
        let (mut r, window) = bound(opts);
        let draw = || ArgWriter::new().u32(gl::TRIANGLES).i32(0).i32(3);

        // Nothing pauses until the platform says it can.
        replay(&mut r, draw_arrays, draw()).unwrap();
        replay(&mut r, draw_arrays, draw()).unwrap();
        assert_eq!(window.step_events(), 0);

        window.enable_stepping();
        let elements = ArgWriter::new().u32(gl::TRIANGLES).i32(3).u32(gl::UNSIGNED_SHORT).u32(0);
        replay(&mut r, draw_elements, elements).unwrap();
        assert_eq!(window.step_events(), 0);
        replay(&mut r, draw_arrays, draw()).unwrap();
        assert_eq!(window.step_events(), 1);
        for _ in 0..3 {
            replay(&mut r, draw_arrays, draw()).unwrap();
        }
        assert_eq!(window.step_events(), 2);
    }

    fn build_program(r: &mut Retracer) {
        replay(r, create_shader, ArgWriter::new().u32(gl::VERTEX_SHADER).u32(1)).unwrap();
        replay(r, create_shader, ArgWriter::new().u32(gl::FRAGMENT_SHADER).u32(2)).unwrap();
        let vs = ["attribute vec4 p;", "void main() { gl_Position = p; }"];
        let fs = ["void main() { gl_FragColor = vec4(1.0); }"];
        replay(r, shader_source, ArgWriter::new().u32(1).str_array(&vs)).unwrap();
        replay(r, shader_source, ArgWriter::new().u32(2).str_array(&fs)).unwrap();
        replay(r, compile_shader, ArgWriter::new().u32(1)).unwrap();
        replay(r, compile_shader, ArgWriter::new().u32(2)).unwrap();
        replay(r, create_program, ArgWriter::new().u32(3)).unwrap();
        replay(r, attach_shader, ArgWriter::new().u32(3).u32(1)).unwrap();
        replay(r, attach_shader, ArgWriter::new().u32(3).u32(2)).unwrap();
    }

    #[test]
    fn test_link_failures() {
        let (mut r, window) = bound(options());
        build_program(&mut r);
        window.fake_driver().set_link_status(0);

        // It failed when recorded, too.
        replay(&mut r, link_program, ArgWriter::new().u32(3).i32(0)).unwrap();
        // Whitelisted.
        r.options.link_error_whitelist = vec![40];
        r.cur_call_no = 40;
        replay(&mut r, link_program, ArgWriter::new().u32(3).i32(1)).unwrap();
        assert!(!r.is_aborted());

        r.cur_call_no = 41;
        let result = replay(&mut r, link_program, ArgWriter::new().u32(3).i32(1));
        assert!(matches!(result, Err(RetraceError::Aborted(_))));
        assert!(r.failed_to_link);
    }

    #[test]
    fn test_link_failure_report() {
        let (mut r, window, results) = fake_retracer(options());
        bind(&mut r, 0xc1);
        build_program(&mut r);
        window.fake_driver().set_link_status(0);
        r.cur_call_no = 9;
        assert!(replay(&mut r, link_program, ArgWriter::new().u32(3).i32(-1)).is_err());
        assert_eq!(
            results.reports(),
            vec![RunReport::error(
                TraceErrorKind::Generic,
                "[c9,f0] Error in linking program 3: fake link log"
            )]
        );
    }

    #[test]
    fn test_compile_failure() {
        let (mut r, window) = bound(options());
        window.fake_driver().set_compile_status(0);
        replay(&mut r, create_shader, ArgWriter::new().u32(gl::VERTEX_SHADER).u32(1)).unwrap();
        replay(&mut r, compile_shader, ArgWriter::new().u32(1)).unwrap();
        assert!(!r.is_aborted());

        r.options.fail_on_shader_error = true;
        assert!(replay(&mut r, compile_shader, ArgWriter::new().u32(1)).is_err());
        assert!(r.is_aborted());
    }

    #[test]
    fn test_shader_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options();
        opts.shader_cache_file = Some(dir.path().join("programs"));

        let (mut r, window) = bound(opts.clone());
        build_program(&mut r);
        window.fake_driver().take_log();
        replay(&mut r, link_program, ArgWriter::new().u32(3).i32(1)).unwrap();
        let log = window.fake_driver().take_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("link_program("));
        assert_eq!(r.shader_cache.as_ref().unwrap().len(), 1);
        drop(r);

        // Same sources in a new run: the binary is loaded, not linked.
        let (mut r, window) = bound(opts);
        build_program(&mut r);
        window.fake_driver().take_log();
        replay(&mut r, link_program, ArgWriter::new().u32(3).i32(1)).unwrap();
        let log = window.fake_driver().take_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("program_binary("));
        assert!(log[0].contains("0x1234"));
    }

    #[test]
    fn test_fences() {
        let mut opts = options();
        opts.skip_fence_ranges.push((0, 0));
        let (mut r, window) = bound(opts);

        let fence = ArgWriter::new().u32(gl::SYNC_GPU_COMMANDS_COMPLETE).u32(0).u32(0x40);
        replay(&mut r, fence_sync, fence).unwrap();
        let wait = || ArgWriter::new().u32(0x40).u32(0).u64(1000).u32(gl::CONDITION_SATISFIED);
        replay(&mut r, client_wait_sync, wait()).unwrap();
        replay(&mut r, wait_sync, ArgWriter::new().u32(0x40).u32(0).u64(0)).unwrap();
        let log = window.fake_driver().take_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("fence_sync("));

        r.cur_frame = 1;
        replay(&mut r, client_wait_sync, wait()).unwrap();
        replay(&mut r, delete_sync, ArgWriter::new().u32(0x40)).unwrap();
        replay(&mut r, delete_sync, ArgWriter::new().u32(0x40)).unwrap();
        let log = window.fake_driver().take_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("client_wait_sync("));
        assert!(log[1].starts_with("delete_sync("));
    }
}
