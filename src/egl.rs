//! Replay functions for EGL calls.
//!
//! The trace names displays, surfaces, contexts and images by the values the
//! recording process saw; these functions create the retracer's own objects
//! through the `WindowSystem` and record the mapping in the `StateRegistry`.
//! Displays and configs are chosen by the window system up front, so calls
//! that only query or choose them are not replayed.
//!
//! Swaps are where frames end. In offscreen mode a swap draws the finished
//! frame into the next mosaic tile instead, and only presents once the
//! mosaic is full.

use gleam::gl;
use log::{debug, info, warn};

use crate::call::{attrib_value, ArgCursor, EGL_NONE};
use crate::config::RetraceOptions;
use crate::driver::has_extension;
use crate::engine::Retracer;
use crate::error::Result;
use crate::offscreen::OffscreenCompositor;
use crate::registry::DispatchTable;
use crate::state::{ContextHandle, Drawable, DrawableHandle, DrawableKind, Rectangle};
use crate::window::Profile;

const EGL_HEIGHT: i32 = 0x3056;
const EGL_WIDTH: i32 = 0x3057;
const EGL_CONTEXT_CLIENT_VERSION: i32 = 0x3098;

const EGL_GL_TEXTURE_2D_KHR: u32 = 0x30B1;
const EGL_NATIVE_BUFFER_ANDROID: u32 = 0x3140;
const EGL_LINUX_DMA_BUF_EXT: u32 = 0x3270;
/// `EGL_IMAGE_CROP_{LEFT,TOP,RIGHT,BOTTOM}_ANDROID`.
const EGL_IMAGE_CROP_ATTRIBS: std::ops::RangeInclusive<i32> = 0x3148..=0x314B;

/// Calls with nothing to replay: the window system picked the display and
/// config before the run started.
const IGNORED: &[&str] = &[
    "eglGetError",
    "eglGetDisplay",
    "eglGetPlatformDisplay",
    "eglGetPlatformDisplayEXT",
    "eglInitialize",
    "eglTerminate",
    "eglQueryString",
    "eglGetConfigs",
    "eglChooseConfig",
    "eglGetConfigAttrib",
    "eglQuerySurface",
    "eglQueryContext",
    "eglBindAPI",
    "eglQueryAPI",
    "eglWaitClient",
    "eglWaitGL",
    "eglWaitNative",
    "eglReleaseThread",
    "eglSwapInterval",
    "eglGetCurrentContext",
    "eglGetCurrentSurface",
    "eglGetCurrentDisplay",
    "eglGetSyncAttribKHR",
];

pub fn register(table: &mut DispatchTable) {
    for &name in IGNORED {
        table.register(name, false, |_, _| Ok(()));
    }

    table.register("eglCreateWindowSurface", false, |r, args| {
        let dpy = args.u64()?;
        let config = args.u64()?;
        let win = args.i32()?;
        let attribs = args.i32_array()?;
        let ret = args.u64()?;
        create_window_surface(r, dpy, config, win, &attribs, ret)
    });
    table.register("eglCreatePbufferSurface", false, create_pbuffer_surface);
    table.register("eglDestroySurface", false, destroy_surface);
    table.register("eglCreateContext", false, create_context);
    table.register("eglDestroyContext", false, destroy_context);
    table.register("eglMakeCurrent", false, |r, args| {
        let dpy = args.u64()?;
        let draw = args.u64()?;
        let read = args.u64()?;
        let ctx = args.u64()?;
        make_current(r, dpy, draw, read, ctx)
    });
    table.register("eglSwapBuffers", false, |r, args| swap_buffers(r, args, false));
    table.register("eglSwapBuffersWithDamageKHR", false, |r, args| {
        swap_buffers(r, args, true)
    });
    table.register("eglSwapBuffersWithDamageEXT", false, |r, args| {
        swap_buffers(r, args, true)
    });
    table.register("eglCreateImageKHR", false, create_image);
    table.register("eglDestroyImageKHR", false, destroy_image);
    table.register("glEGLImageTargetTexture2DOES", true, image_target_texture_2d);
    table.register("eglCreateSyncKHR", false, create_sync);
    table.register("eglClientWaitSyncKHR", false, client_wait_sync);
    table.register("eglDestroySyncKHR", false, destroy_sync);
    table.register("eglSurfaceAttrib", false, surface_attrib);
    table.register(
        "eglQuerySupportedCompressionRatesEXT",
        false,
        query_supported_compression_rates,
    );
}

fn single_window(options: &RetraceOptions) -> bool {
    options.force_single_window && !options.multi_thread
}

/// The size to create window surfaces at.
fn surface_size(options: &RetraceOptions) -> (i32, i32) {
    if options.force_offscreen {
        (options.mosaic.width(), options.mosaic.height())
    } else if options.do_override_resolution {
        (options.override_width, options.override_height)
    } else {
        (options.window_width, options.window_height)
    }
}

/// Create a drawable for recorded window `win`. It has no references yet.
fn create_drawable(r: &mut Retracer, win: i32, attribs: &[i32]) -> Result<DrawableHandle> {
    let (width, height) = surface_size(&r.options);
    debug!(
        "creating {} surface {}x{} for window {}",
        if r.options.pbuffer_rendering { "pbuffer" } else { "window" },
        width,
        height,
        win
    );
    let (native, kind) = if r.options.pbuffer_rendering {
        (r.window.create_pbuffer_surface(width, height), DrawableKind::Pbuffer)
    } else {
        (
            r.window.create_window_surface(win, width, height, attribs),
            DrawableKind::Window { win },
        )
    };
    let native = match native {
        Some(native) => native,
        None => {
            let msg = format!("Failed to create a {}x{} surface", width, height);
            return Err(r.report_and_abort(&msg));
        }
    };

    let mut drawable = Drawable::new(native, kind, r.options.window_width, r.options.window_height);
    if r.options.do_override_resolution {
        drawable.ratio_w = r.options.override_ratio_w;
        drawable.ratio_h = r.options.override_ratio_h;
    }
    Ok(r.state.create_drawable(drawable))
}

pub(crate) fn create_window_surface(
    r: &mut Retracer,
    _dpy: u64,
    _config: u64,
    win: i32,
    attribs: &[i32],
    ret: u64,
) -> Result<()> {
    let tid = r.cur_tid;
    let (width, height) = (r.options.window_width, r.options.window_height);
    let over = r.options.do_override_resolution;
    let (override_width, override_height) = (r.options.override_width, r.options.override_height);
    {
        let slot = r.state.thread_mut(tid)?;
        slot.app_viewport = Rectangle::new(0, 0, width, height);
        slot.app_scissor = slot.app_viewport;
        if over {
            slot.driver_viewport = Rectangle::new(0, 0, override_width, override_height);
            slot.driver_scissor = slot.driver_viewport;
        }
    }

    if ret == 0 {
        debug!("surface creation failed when recorded; nothing to do");
        return Ok(());
    }

    let single = single_window(&r.options);
    let win = if single { 0 } else { win };
    if single {
        if let Some(existing) = r.state.current_drawable(tid).or_else(|| r.state.single_surface()) {
            info!("Ignoring creation of surface {:#x}: forcing a single window", ret);
            let Retracer { state, window, .. } = r;
            state.insert_drawable(ret, existing, &mut **window);
            state.set_window(ret, win);
            return Ok(());
        }
    }

    let handle = create_drawable(r, win, attribs)?;
    let Retracer { state, window, .. } = r;
    state.insert_drawable(ret, handle, &mut **window);
    state.set_window(ret, win);
    if single {
        state.set_single_surface(Some(handle), &mut **window);
    }
    Ok(())
}

fn create_pbuffer_surface(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let _config = args.u64()?;
    let attribs = args.i32_array()?;
    let ret = args.u64()?;
    if ret == 0 {
        return Ok(());
    }

    let width = attrib_value(&attribs, EGL_WIDTH).unwrap_or(0);
    let height = attrib_value(&attribs, EGL_HEIGHT).unwrap_or(0);
    let native = match r.window.create_pbuffer_surface(width, height) {
        Some(native) => native,
        None => {
            let msg = format!("Failed to create a {}x{} pbuffer surface", width, height);
            return Err(r.report_and_abort(&msg));
        }
    };
    let Retracer { state, window, .. } = r;
    let handle = state.create_drawable(Drawable::new(native, DrawableKind::Pbuffer, width, height));
    state.insert_drawable(ret, handle, &mut **window);
    Ok(())
}

fn destroy_surface(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let surface = args.u64()?;
    let tid = r.cur_tid;

    r.on_frame_complete();
    if r.state.current_drawable(tid).is_some() {
        swap_current_drawable(r);
    } else {
        r.driver().flush();
    }

    let single = single_window(&r.options);
    let Retracer { state, window, .. } = r;
    if !state.remove_drawable(surface, &mut **window) {
        debug!("eglDestroySurface: surface {:#x} was never created", surface);
    }
    if single {
        if let Some(handle) = state.single_surface() {
            let orphaned = state.get_draw(handle).is_none();
            if orphaned && state.current_drawable(tid) != Some(handle) {
                state.set_single_surface(None, &mut **window);
            }
        }
    }
    Ok(())
}

pub(crate) fn create_context(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let _config = args.u64()?;
    let share_id = args.u64()?;
    let attribs = args.i32_array()?;
    let ret = args.u64()?;

    let profile = match attrib_value(&attribs, EGL_CONTEXT_CLIENT_VERSION) {
        Some(2) => Profile::from_client_version(r.options.api_version as i32).unwrap_or(Profile::Es2),
        Some(3) => Profile::Es3,
        None | Some(1) => Profile::Es1,
        Some(other) => {
            warn!("unknown EGL_CONTEXT_CLIENT_VERSION {}; using GLES 1", other);
            Profile::Es1
        }
    };

    let share = if share_id == 0 {
        None
    } else {
        let share = r.state.get_context(share_id);
        if share.is_none() {
            warn!("eglCreateContext: share context {:#x} does not exist", share_id);
        }
        share
    };
    let share_native = share.and_then(|h| r.state.context(h)).map(|c| c.native);

    let native = match r.window.create_context(profile, share_native) {
        Some(native) => native,
        None => {
            let msg = format!("Failed to create GLES ({}) context", profile.major_version());
            return Err(r.report_and_abort(&msg));
        }
    };
    let on_screen_fbo = r.options.on_screen_fbo;
    let Retracer { state, window, .. } = r;
    let handle = state.create_context(native, profile, share, on_screen_fbo);
    state.insert_context(ret, handle, &mut **window);
    Ok(())
}

fn destroy_context(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let ctx = args.u64()?;

    if r.options.force_offscreen && r.mosaic_needs_flush {
        let tid = r.cur_tid;
        r.force_render_mosaic_to_screen()?;
        r.cur_tid = tid;
    }

    let Retracer { state, window, .. } = r;
    if !state.remove_context(ctx, &mut **window) {
        warn!("eglDestroyContext: context {:#x} does not exist", ctx);
    }
    Ok(())
}

pub(crate) fn make_current(r: &mut Retracer, _dpy: u64, draw: u64, _read: u64, ctx: u64) -> Result<()> {
    let tid = r.cur_tid;
    let draw = match r.options.single_surface {
        n if n >= 0 && draw != 0 && r.state.get_drawable(n as u64).is_some() => n as u64,
        _ => draw,
    };

    let drawable = if draw == 0 {
        None
    } else if single_window(&r.options) {
        match r.state.single_surface() {
            Some(handle) => Some(handle),
            None => {
                info!(
                    "Creating new surface because the previous one was destroyed, and we are \
                     running in forced single window mode"
                );
                let handle = create_drawable(r, 0, &[EGL_NONE])?;
                let Retracer { state, window, .. } = r;
                state.insert_drawable(draw, handle, &mut **window);
                state.set_window(draw, 0);
                state.set_single_surface(Some(handle), &mut **window);
                Some(handle)
            }
        }
    } else {
        let drawable = r.state.get_drawable(draw);
        if drawable.is_none() {
            warn!("eglMakeCurrent: surface {:#x} does not exist", draw);
        }
        drawable
    };
    let context = if ctx == 0 {
        None
    } else {
        let context = r.state.get_context(ctx);
        if context.is_none() {
            warn!("eglMakeCurrent: context {:#x} does not exist", ctx);
        }
        context
    };

    let old_drawable = r.state.current_drawable(tid);
    let old_context = r.state.current_context(tid);
    if old_drawable == drawable && old_context == context {
        return Ok(());
    }
    if old_drawable.is_some() && old_context.is_some() {
        r.driver().flush();
    }

    let native_surface = drawable.and_then(|h| r.state.drawable(h)).map(|d| d.native);
    let native_context = context.and_then(|h| r.state.context(h)).map(|c| c.native);
    if !r.window.make_current(native_surface, native_context) {
        warn!("eglMakeCurrent({:#x}, {:#x}) failed", draw, ctx);
        return Ok(());
    }

    if let (Some(drawable), Some(context)) = (drawable, context) {
        let visible = r.state.drawable(drawable).map(|d| (d.visible, d.width, d.height));
        if let Some((true, width, height)) = visible {
            r.options.window_width = width;
            r.options.window_height = height;
            let driver = r.window.driver();
            if let Some(offscreen) = r.state.context_mut(context).and_then(|c| c.offscreen.as_mut()) {
                offscreen.resize(driver, width, height)?;
            }
        }

        let first = r.state.context(context).map_or(false, |c| c.first_make_current);
        if first {
            let (width, height) = if r.options.do_override_resolution {
                (r.options.override_width, r.options.override_height)
            } else {
                (r.options.window_width, r.options.window_height)
            };
            r.driver().viewport(0, 0, width, height);
            r.driver().scissor(0, 0, width, height);
            if let Some(c) = r.state.context_mut(context) {
                c.first_make_current = false;
            }
        }

        if r.options.force_offscreen {
            create_offscreen(r, context)?;
        }
    }

    let Retracer { state, window, .. } = r;
    state.set_thread_drawable(tid, drawable, &mut **window)?;
    state.set_thread_context(tid, context, &mut **window)?;
    Ok(())
}

/// Give `context` its offscreen compositor if it has none yet, and bind the
/// offscreen framebuffer in place of the window's.
fn create_offscreen(r: &mut Retracer, context: ContextHandle) -> Result<()> {
    let options = &r.options;
    let driver = r.window.driver();
    let c = match r.state.context_mut(context) {
        Some(c) => c,
        None => return Ok(()),
    };
    if c.offscreen.is_none() {
        let offscreen = OffscreenCompositor::new(
            driver,
            &options.offscreen_config,
            options.window_width,
            options.window_height,
            options.mosaic,
            options.on_screen_fbo,
            c.profile.major_version(),
        )?;
        offscreen.bind_offscreen_fbo(driver, gl::FRAMEBUFFER);
        c.offscreen = Some(offscreen);
    }
    Ok(())
}

/// Present the current thread's drawable. Return false if there is none,
/// or the window system refused.
pub(crate) fn swap_current_drawable(r: &mut Retracer) -> bool {
    let native = r
        .state
        .current_drawable(r.cur_tid)
        .and_then(|handle| r.state.drawable(handle))
        .map(|d| d.native);
    match native {
        Some(native) => r.window.swap_buffers(native),
        None => false,
    }
}

pub(crate) fn swap_buffers(r: &mut Retracer, args: &mut ArgCursor, with_damage: bool) -> Result<()> {
    let _dpy = args.u64()?;
    let surface = args.u64()?;
    let rects = if with_damage { args.i32_array()? } else { Vec::new() };
    let tid = r.cur_tid;

    r.on_frame_complete();

    let drawable = match r.state.current_drawable(tid) {
        Some(drawable) => drawable,
        None => {
            warn!("eglSwapBuffers({:#x}) with no current surface", surface);
            return Ok(());
        }
    };
    if !single_window(&r.options) && r.state.get_drawable(surface) != Some(drawable) {
        debug!("swapping the current surface instead of {:#x}", surface);
    }
    let native = match r.state.drawable(drawable) {
        Some(d) => d.native,
        None => return Ok(()),
    };
    if r.options.finish_before_swap {
        r.driver().finish();
    }

    if !r.options.force_offscreen {
        let swapped = if with_damage {
            r.window.swap_buffers_with_damage(native, &rects)
        } else {
            r.window.swap_buffers(native)
        };
        if !swapped {
            warn!("eglSwapBuffers({:#x}) failed", surface);
        }
        r.present_pending = true;
        r.on_new_frame();
        return Ok(());
    }

    // The depth and stencil of a finished frame are never read back.
    let discard = r.options.api_version >= 3
        || has_extension(&r.driver().get_string(gl::EXTENSIONS), "GL_EXT_discard_framebuffer");
    r.with_offscreen(|offscreen, driver| {
        if discard {
            offscreen.bind_offscreen_fbo(driver, gl::FRAMEBUFFER);
            driver.invalidate_framebuffer(gl::FRAMEBUFFER, &[gl::DEPTH_ATTACHMENT, gl::STENCIL_ATTACHMENT]);
        }
        offscreen.offscreen_to_mosaic(driver);
    });
    if let Some(context) = r.current_context() {
        r.last_non_zero_ctx = r.state.get_ctx(context);
        r.last_non_zero_draw = r.state.get_draw(drawable);
        r.last_swap_tid = Some(tid);
    }

    let full = r
        .with_offscreen(|offscreen, driver| offscreen.mosaic_to_screen_if_needed(driver, false))
        .unwrap_or(false);
    if full {
        if !r.window.swap_buffers(native) {
            warn!("eglSwapBuffers({:#x}) failed", surface);
        }
        r.mosaic_needs_flush = false;
        r.present_pending = true;
    } else {
        r.driver().flush();
        r.mosaic_needs_flush = true;
    }

    r.on_new_frame();

    // Put back whatever the application had bound, or the next offscreen
    // framebuffer if that was the screen.
    let on_screen = r.options.on_screen_fbo;
    let bound = r
        .current_context()
        .and_then(|handle| r.state.context(handle))
        .map(|c| (c.current_framebuffer, c.framebuffers.get(c.current_framebuffer)));
    match bound {
        Some((recorded, live)) if recorded != on_screen => {
            r.driver().bind_framebuffer(gl::FRAMEBUFFER, live);
        }
        _ => {
            r.with_offscreen(|offscreen, driver| offscreen.bind_offscreen_fbo(driver, gl::FRAMEBUFFER));
        }
    }
    Ok(())
}

fn create_image(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let ctx = args.u64()?;
    let target = args.u32()?;
    let buffer = args.u64()?;
    let attribs = args.i32_array()?;
    let ret = args.u64()?;

    let mut kept = Vec::with_capacity(attribs.len());
    for pair in attribs.chunks(2) {
        match pair {
            [key, _] if EGL_IMAGE_CROP_ATTRIBS.contains(key) && target != EGL_NATIVE_BUFFER_ANDROID => {
                debug!(
                    "eglCreateImageKHR: dropping crop attribute {:#x}, which needs \
                     EGL_NATIVE_BUFFER_ANDROID but the target is {:#x}",
                    key, target
                );
            }
            _ => kept.extend_from_slice(pair),
        }
    }

    let (context, buffer) = match target {
        EGL_GL_TEXTURE_2D_KHR => {
            let context = r.state.get_context(ctx);
            let live = context
                .and_then(|handle| r.state.resources(handle))
                .map(|mut res| res.textures().get(buffer as u32));
            let native = context.and_then(|handle| r.state.context(handle)).map(|c| c.native);
            match live {
                Some(live) => (native, u64::from(live)),
                None => {
                    warn!("eglCreateImageKHR: context {:#x} does not exist", ctx);
                    return Ok(());
                }
            }
        }
        EGL_NATIVE_BUFFER_ANDROID | EGL_LINUX_DMA_BUF_EXT => (None, buffer),
        _ => {
            let msg = format!("Invalid buffer type {:#x} for eglCreateImageKHR", target);
            return Err(r.report_and_abort(&msg));
        }
    };

    match r.window.create_image(context, target, buffer, &kept) {
        Some(image) => r.state.insert_image(ret, image),
        None => debug!("eglCreateImageKHR: failed to create image {:#x}", ret),
    }
    Ok(())
}

fn destroy_image(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let image = args.u64()?;
    match r.state.remove_image(image) {
        Some(native) => {
            r.window.destroy_image(native);
        }
        None => debug!("eglDestroyImageKHR: image {:#x} was never created", image),
    }
    Ok(())
}

fn image_target_texture_2d(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let target = args.u32()?;
    let image = args.u64()?;
    match r.state.get_image(image) {
        Some(native) => r.driver().egl_image_target_texture_2d_oes(target, native),
        None => debug!(
            "glEGLImageTargetTexture2DOES: image {:#x} was never created, or failed to create",
            image
        ),
    }
    Ok(())
}

fn create_sync(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let sync_type = args.u32()?;
    let attribs = args.i32_array()?;
    let ret = args.u32()?;

    let context = match r.current_context() {
        Some(context) => context,
        None => {
            warn!("eglCreateSyncKHR with no current context");
            return Ok(());
        }
    };
    match r.window.create_sync(sync_type, &attribs) {
        Some(sync) => {
            if let Some(c) = r.state.context_mut(context) {
                c.egl_syncs.set(ret, sync);
            }
        }
        None => debug!("eglCreateSyncKHR: failed to create sync {:#x}", ret),
    }
    Ok(())
}

fn current_egl_sync(r: &Retracer, sync: u32) -> Option<u64> {
    let context = r.current_context()?;
    let c = r.state.context(context)?;
    if c.egl_syncs.is_live(sync) {
        Some(c.egl_syncs.get(sync))
    } else {
        None
    }
}

fn client_wait_sync(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let sync = args.u32()?;
    let flags = args.i32()?;
    let timeout = args.u64()?;

    if r.options.skip_fence(r.cur_frame) {
        debug!("skipping eglClientWaitSyncKHR in frame {}", r.cur_frame);
        return Ok(());
    }
    match current_egl_sync(r, sync) {
        Some(native) => {
            r.window.client_wait_sync(native, flags, timeout);
        }
        None => debug!("eglClientWaitSyncKHR: sync {:#x} does not exist", sync),
    }
    Ok(())
}

fn destroy_sync(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let sync = args.u32()?;
    let native = match r.current_context() {
        Some(context) => r
            .state
            .context_mut(context)
            .filter(|c| c.egl_syncs.is_live(sync))
            .map(|c| c.egl_syncs.forget(sync)),
        None => None,
    };
    match native {
        Some(native) => {
            r.window.destroy_sync(native);
        }
        None => debug!("eglDestroySyncKHR: sync {:#x} does not exist", sync),
    }
    Ok(())
}

fn surface_attrib(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let surface = args.u64()?;
    let attribute = args.i32()?;
    let value = args.i32()?;
    let native = r
        .state
        .get_drawable(surface)
        .and_then(|handle| r.state.drawable(handle))
        .map(|d| d.native);
    match native {
        Some(native) => {
            if !r.window.set_surface_attribute(native, attribute, value) {
                warn!("eglSurfaceAttrib({:#x}, {:#x}, {}) failed", surface, attribute, value);
            }
        }
        None => warn!("eglSurfaceAttrib: surface {:#x} does not exist", surface),
    }
    Ok(())
}

fn query_supported_compression_rates(r: &mut Retracer, args: &mut ArgCursor) -> Result<()> {
    let _dpy = args.u64()?;
    let _config = args.u64()?;
    let attribs = args.i32_array()?;
    let rates = r.window.query_supported_compression_rates(&attribs);
    debug!("supported compression rates: {:?}", rates);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::ArgWriter;
    use crate::config::MosaicLayout;
    use crate::result::{RunReport, TraceErrorKind};
    use crate::testing::{fake_retracer as retracer, replay as call};

    const DPY: u64 = 0xd1;
    const SURFACE: u64 = 0x5001;
    const CONTEXT: u64 = 0xc001;

    fn sized(width: i32, height: i32) -> RetraceOptions {
        let mut options = RetraceOptions::default();
        options.window_width = width;
        options.window_height = height;
        options
    }

    fn new_context(r: &mut Retracer, ctx: u64, share: u64, version: i32) -> Result<()> {
        let attribs = [EGL_CONTEXT_CLIENT_VERSION, version, EGL_NONE];
        call(
            r,
            create_context,
            ArgWriter::new().u64(DPY).u64(1).u64(share).i32_array(&attribs).u64(ctx),
        )
    }

    fn swap(r: &mut Retracer, surface: u64) {
        call(r, |r, a| swap_buffers(r, a, false), ArgWriter::new().u64(DPY).u64(surface)).unwrap();
    }

    /// Create a window surface and a GLES 2 context, and make them current.
    fn bind(r: &mut Retracer) {
        create_window_surface(r, DPY, 1, 7, &[EGL_NONE], SURFACE).unwrap();
        new_context(r, CONTEXT, 0, 2).unwrap();
        make_current(r, DPY, SURFACE, SURFACE, CONTEXT).unwrap();
    }

    #[test]
    fn test_swap_presents_and_counts_frames() {
        let (mut r, window, _) = retracer(sized(640, 480));
        bind(&mut r);
        assert!(window
            .events()
            .iter()
            .any(|e| e.starts_with("create_window_surface(7, 640x480)")));
        assert_eq!(r.current_context(), r.state.get_context(CONTEXT));

        swap(&mut r, SURFACE);
        swap(&mut r, SURFACE);
        assert_eq!(window.swaps(), 2);
        assert_eq!(r.cur_frame, 2);
        assert!(r.present_pending);

        // A second bind of the same pair is not passed on.
        let binds = window.events().iter().filter(|e| e.starts_with("make_current")).count();
        make_current(&mut r, DPY, SURFACE, SURFACE, CONTEXT).unwrap();
        let again = window.events().iter().filter(|e| e.starts_with("make_current")).count();
        assert_eq!(binds, again);
    }

    #[test]
    fn test_first_make_current_sets_viewport() {
        let mut options = sized(1920, 1080);
        options.do_override_resolution = true;
        options.override_width = 960;
        options.override_height = 540;
        options.update_override_ratio().unwrap();
        let (mut r, window, _) = retracer(options);
        bind(&mut r);

        assert!(window
            .events()
            .iter()
            .any(|e| e.starts_with("create_window_surface(7, 960x540)")));
        let log = window.fake_driver().take_log();
        assert!(log.contains(&"viewport(0, 0, 960, 540)".to_string()));
        assert!(log.contains(&"scissor(0, 0, 960, 540)".to_string()));

        let drawable = r.state.get_drawable(SURFACE).unwrap();
        assert_eq!(r.state.drawable(drawable).unwrap().ratio_w, 0.5);
        let slot = r.state.thread(0).unwrap();
        assert_eq!(slot.app_viewport, Rectangle::new(0, 0, 1920, 1080));
        assert_eq!(slot.driver_viewport, Rectangle::new(0, 0, 960, 540));
    }

    #[test]
    fn test_context_creation_failure_aborts() {
        let (mut r, window, results) = retracer(RetraceOptions::default());
        window.fail_context_creation();
        r.cur_call_no = 12;
        assert!(new_context(&mut r, CONTEXT, 0, 3).is_err());
        assert!(r.is_aborted());
        assert_eq!(
            results.reports(),
            vec![RunReport::error(
                TraceErrorKind::Generic,
                "[c12,f0] Failed to create GLES (3) context"
            )]
        );
    }

    #[test]
    fn test_shared_contexts_share_names() {
        let (mut r, window, _) = retracer(RetraceOptions::default());
        new_context(&mut r, CONTEXT, 0, 3).unwrap();
        new_context(&mut r, CONTEXT + 1, CONTEXT, 3).unwrap();
        let a = r.state.get_context(CONTEXT).unwrap();
        let b = r.state.get_context(CONTEXT + 1).unwrap();
        assert!(r.state.same_share_group(a, b));
        assert!(window.events().iter().any(|e| e.starts_with("create_context(Es3, Some(")));

        // Unknown share contexts are tolerated.
        new_context(&mut r, CONTEXT + 2, 0xdead, 3).unwrap();
        let c = r.state.get_context(CONTEXT + 2).unwrap();
        assert!(!r.state.same_share_group(a, c));
    }

    #[test]
    fn test_destroy_current_context_survives() {
        let (mut r, window, _) = retracer(sized(64, 64));
        bind(&mut r);
        call(&mut r, destroy_context, ArgWriter::new().u64(DPY).u64(CONTEXT)).unwrap();
        assert_eq!(window.destroyed_contexts(), 0);
        assert!(r.current_context().is_some());

        make_current(&mut r, DPY, 0, 0, 0).unwrap();
        assert_eq!(window.destroyed_contexts(), 1);
        assert!(r.current_context().is_none());
    }

    #[test]
    fn test_single_window_reuses_surface() {
        let mut options = sized(320, 200);
        options.force_single_window = true;
        let (mut r, window, _) = retracer(options);
        bind(&mut r);
        create_window_surface(&mut r, DPY, 1, 9, &[EGL_NONE], SURFACE + 1).unwrap();
        assert_eq!(window.created_surfaces(), 1);
        assert_eq!(r.state.get_drawable(SURFACE), r.state.get_drawable(SURFACE + 1));

        // Binding either id binds the one surface.
        make_current(&mut r, DPY, SURFACE + 1, SURFACE + 1, CONTEXT).unwrap();
        assert_eq!(r.state.current_drawable(0), r.state.get_drawable(SURFACE));

        make_current(&mut r, DPY, 0, 0, 0).unwrap();
        call(&mut r, destroy_surface, ArgWriter::new().u64(DPY).u64(SURFACE)).unwrap();
        assert_eq!(window.destroyed_surfaces(), 0);
        call(&mut r, destroy_surface, ArgWriter::new().u64(DPY).u64(SURFACE + 1)).unwrap();
        assert_eq!(window.destroyed_surfaces(), 1);
        assert!(r.state.single_surface().is_none());

        // Binding a fresh id brings a surface back.
        make_current(&mut r, DPY, SURFACE + 2, SURFACE + 2, CONTEXT).unwrap();
        assert_eq!(window.created_surfaces(), 2);
        assert!(r.state.current_drawable(0).is_some());
        assert_eq!(r.state.current_drawable(0), r.state.single_surface());
    }

    #[test]
    fn test_offscreen_mosaic_presents_when_full() {
        let mut options = sized(64, 32);
        options.force_offscreen = true;
        options.mosaic = MosaicLayout {
            tiles_x: 2,
            tiles_y: 1,
            tile_width: 16,
            tile_height: 8,
        };
        let (mut r, window, _) = retracer(options);
        bind(&mut r);
        assert!(window
            .events()
            .iter()
            .any(|e| e.starts_with("create_window_surface(7, 32x8)")));
        assert!(r.current_context().and_then(|c| r.state.context(c)).unwrap().offscreen.is_some());

        swap(&mut r, SURFACE);
        assert_eq!(window.swaps(), 0);
        assert!(r.mosaic_needs_flush);
        assert_eq!(r.cur_frame, 1);
        assert_eq!(r.last_non_zero_ctx, Some(CONTEXT));
        assert_eq!(r.last_non_zero_draw, Some(SURFACE));

        swap(&mut r, SURFACE);
        assert_eq!(window.swaps(), 1);
        assert!(!r.mosaic_needs_flush);

        // A half-full mosaic is presented at the end of the run.
        swap(&mut r, SURFACE);
        assert_eq!(window.swaps(), 1);
        r.force_render_mosaic_to_screen().unwrap();
        assert_eq!(window.swaps(), 2);
        assert!(!r.mosaic_needs_flush);
    }

    #[test]
    fn test_images() {
        let (mut r, window, _) = retracer(sized(64, 64));
        bind(&mut r);
        r.current_resources().unwrap().textures().set(5, 55);

        let attribs = [0x3148, 0, 0x30D2, 0, EGL_NONE];
        call(
            &mut r,
            create_image,
            ArgWriter::new()
                .u64(DPY)
                .u64(CONTEXT)
                .u32(EGL_GL_TEXTURE_2D_KHR)
                .u64(5)
                .i32_array(&attribs)
                .u64(0x1a),
        )
        .unwrap();
        assert!(window.events().iter().any(|e| e.starts_with("create_image(0x30b1, 55)")));

        window.fake_driver().take_log();
        call(&mut r, image_target_texture_2d, ArgWriter::new().u32(gl::TEXTURE_2D).u64(0x1a)).unwrap();
        call(&mut r, image_target_texture_2d, ArgWriter::new().u32(gl::TEXTURE_2D).u64(0x2b)).unwrap();
        let log = window.fake_driver().take_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("egl_image_target_texture_2d_oes(0xde1, "));

        call(&mut r, destroy_image, ArgWriter::new().u64(DPY).u64(0x1a)).unwrap();
        assert_eq!(r.state.get_image(0x1a), None);
        assert!(window.events().iter().any(|e| e.starts_with("destroy_image(")));
    }

    #[test]
    fn test_sync_wait_skipped_in_fence_range() {
        let mut options = sized(64, 64);
        options.skip_fence_ranges.push((0, 0));
        let (mut r, window, _) = retracer(options);
        bind(&mut r);

        let create = ArgWriter::new().u64(DPY).u32(0x30F9).i32_array(&[EGL_NONE]).u32(0x77);
        call(&mut r, create_sync, create).unwrap();
        let wait = || ArgWriter::new().u64(DPY).u32(0x77).i32(0).u64(1000);
        call(&mut r, client_wait_sync, wait()).unwrap();
        assert!(!window.events().iter().any(|e| e.starts_with("client_wait_sync")));

        swap(&mut r, SURFACE);
        call(&mut r, client_wait_sync, wait()).unwrap();
        assert!(window.events().iter().any(|e| e.starts_with("client_wait_sync")));

        call(&mut r, destroy_sync, ArgWriter::new().u64(DPY).u32(0x77)).unwrap();
        assert!(window.events().iter().any(|e| e.starts_with("destroy_sync")));
        // Destroying it again finds nothing.
        call(&mut r, destroy_sync, ArgWriter::new().u64(DPY).u32(0x77)).unwrap();
        assert_eq!(window.events().iter().filter(|e| e.starts_with("destroy_sync")).count(), 1);
    }

    #[test]
    fn test_swap_without_surface_is_harmless() {
        let (mut r, window, _) = retracer(RetraceOptions::default());
        swap(&mut r, SURFACE);
        assert_eq!(window.swaps(), 0);
        assert_eq!(r.cur_frame, 0);
    }
}
