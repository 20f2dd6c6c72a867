//! Rendering frames offscreen and presenting them as a mosaic.
//!
//! In offscreen mode, the application's on-screen framebuffer is replaced by
//! one of two offscreen framebuffers, used alternately. At each swap, the
//! frame just finished is scaled down into one tile of a mosaic texture; only
//! when every tile has been filled is the mosaic drawn to the real screen and
//! presented. This keeps presentation cost, vsync and display resolution out
//! of the measurement, while still showing something of every frame.
//!
//! The compositor's GL objects live in the context it was created in, so all
//! of its methods must be called with that context current.

use gleam::gl::{self, GLenum, GLuint};
use log::{debug, info};

use crate::config::{EglConfigInfo, MosaicLayout};
use crate::driver::{has_extension, Driver};
use crate::error::{Result, RetraceError};
use crate::quad::Quad;
use crate::resource::Namespace;

/// `GL_DEPTH24_STENCIL8_OES`, the same value as ES3's `GL_DEPTH24_STENCIL8`.
const DEPTH24_STENCIL8: GLenum = 0x88F0;
/// `GL_DEPTH_COMPONENT24_OES`.
const DEPTH_COMPONENT24: GLenum = 0x81A6;

/// Texture and renderbuffer formats for the offscreen framebuffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffscreenFormat {
    /// `format` and `type` arguments for the color texture's `glTexImage2D`.
    pub color_format: GLenum,
    pub color_type: GLenum,
    /// Renderbuffer format for depth, or combined depth and stencil.
    pub depth_format: Option<GLenum>,
    /// Renderbuffer format for a separate stencil buffer.
    pub stencil_format: Option<GLenum>,
    pub depth_stencil: bool,
    pub msaa_samples: i32,
}

/// Work out the offscreen formats for `config`.
///
/// `gles_version` is the major version of the context the compositor lives
/// in, and `extensions` its `GL_EXTENSIONS` string.
pub fn derive_format(
    config: &EglConfigInfo,
    gles_version: u32,
    extensions: &str,
) -> Result<OffscreenFormat> {
    let (color_format, color_type) = match (config.red, config.green, config.blue, config.alpha) {
        (8, 8, 8, 0) => (gl::RGB, gl::UNSIGNED_BYTE),
        (5, 6, 5, 0) => (gl::RGB, gl::UNSIGNED_SHORT_5_6_5),
        (8, 8, 8, 8) => (gl::RGBA, gl::UNSIGNED_BYTE),
        (4, 4, 4, 4) => (gl::RGBA, gl::UNSIGNED_SHORT_4_4_4_4),
        (5, 5, 5, 1) => (gl::RGBA, gl::UNSIGNED_SHORT_5_5_5_1),
        (r, g, b, a) => {
            return Err(RetraceError::UnsupportedFormat(format!(
                "red={}, green={}, blue={}, alpha={}",
                r, g, b, a
            )))
        }
    };

    let mut depth_format = match config.depth {
        0 => None,
        16 => Some(gl::DEPTH_COMPONENT16),
        24 => {
            if gles_version < 3 && !has_extension(extensions, "GL_OES_depth24") {
                debug!("GL_OES_depth24 is not supported in runtime environment");
            }
            Some(DEPTH_COMPONENT24)
        }
        depth => {
            return Err(RetraceError::UnsupportedFormat(format!("depth={}", depth)));
        }
    };

    let mut stencil_format = match config.stencil {
        0 => None,
        8 => Some(gl::STENCIL_INDEX8),
        stencil => {
            return Err(RetraceError::UnsupportedFormat(format!("stencil={}", stencil)));
        }
    };

    // Drivers handle a packed depth-stencil buffer much better than two
    // separate ones.
    let depth_stencil = depth_format.is_some() && stencil_format.is_some();
    if depth_stencil {
        depth_format = Some(DEPTH24_STENCIL8);
        stencil_format = None;
    }

    let msaa_samples = config.msaa_samples.max(0);
    if msaa_samples > 0 && !has_extension(extensions, "GL_EXT_multisampled_render_to_texture") {
        return Err(RetraceError::UnsupportedFormat(format!(
            "MSAA = {} requires GL_EXT_multisampled_render_to_texture, \
             which this driver doesn't support",
            msaa_samples
        )));
    }

    Ok(OffscreenFormat {
        color_format,
        color_type,
        depth_format,
        stencil_format,
        depth_stencil,
        msaa_samples,
    })
}

/// Toggles the compositor turns off while drawing, and restores afterwards.
const SAVED_TOGGLES: [GLenum; 4] = [gl::SCISSOR_TEST, gl::BLEND, gl::STENCIL_TEST, gl::CULL_FACE];

struct SavedState {
    viewport: [i32; 4],
    toggles: [bool; 4],
}

impl SavedState {
    fn save(driver: &dyn Driver) -> SavedState {
        let mut viewport = [0; 4];
        driver.get_integer_v(gl::VIEWPORT, &mut viewport);
        let mut toggles = [false; 4];
        for (saved, &cap) in toggles.iter_mut().zip(SAVED_TOGGLES.iter()) {
            *saved = driver.is_enabled(cap);
            driver.disable(cap);
        }
        SavedState { viewport, toggles }
    }

    fn restore(&self, driver: &dyn Driver) {
        let [x, y, w, h] = self.viewport;
        driver.viewport(x, y, w, h);
        for (&saved, &cap) in self.toggles.iter().zip(SAVED_TOGGLES.iter()) {
            if saved {
                driver.enable(cap);
            } else {
                driver.disable(cap);
            }
        }
    }
}

pub struct OffscreenCompositor {
    format: OffscreenFormat,
    width: i32,
    height: i32,
    layout: MosaicLayout,
    tiles: u32,
    on_screen_fbo: GLuint,

    framebuffers: [GLuint; 2],
    textures: [GLuint; 2],
    depth_buffers: [GLuint; 2],
    stencil_buffers: [GLuint; 2],
    mosaic_framebuffer: GLuint,
    mosaic_texture: GLuint,
    quad: Quad,

    mosaic_idx: u32,
    owns_gl_objects: bool,
}

impl OffscreenCompositor {
    /// Create the offscreen and mosaic framebuffers in the current context.
    pub fn new(
        driver: &dyn Driver,
        config: &EglConfigInfo,
        width: i32,
        height: i32,
        layout: MosaicLayout,
        on_screen_fbo: GLuint,
        gles_version: u32,
    ) -> Result<OffscreenCompositor> {
        let tiles = layout.tile_count()?;
        let format = derive_format(config, gles_version, &driver.get_string(gl::EXTENSIONS))?;
        info!(
            "offscreen framebuffer {}x{} using {}{}{}{} color, {} depth, {} stencil",
            width,
            height,
            config.red,
            config.green,
            config.blue,
            config.alpha,
            config.depth,
            config.stencil
        );

        let mut compositor = OffscreenCompositor {
            format,
            width,
            height,
            layout,
            tiles,
            on_screen_fbo,
            framebuffers: [0; 2],
            textures: [0; 2],
            depth_buffers: [0; 2],
            stencil_buffers: [0; 2],
            mosaic_framebuffer: 0,
            mosaic_texture: 0,
            quad: Quad::new(driver, gles_version),
            mosaic_idx: 0,
            owns_gl_objects: true,
        };
        compositor.create_framebuffers(driver)?;
        Ok(compositor)
    }

    fn create_framebuffers(&mut self, driver: &dyn Driver) -> Result<()> {
        gen_pair(driver, Namespace::Framebuffer, &mut self.framebuffers);
        gen_pair(driver, Namespace::Texture, &mut self.textures);
        if self.format.depth_format.is_some() {
            gen_pair(driver, Namespace::Renderbuffer, &mut self.depth_buffers);
        }
        if self.format.stencil_format.is_some() {
            gen_pair(driver, Namespace::Renderbuffer, &mut self.stencil_buffers);
        }
        self.allocate_offscreen_storage(driver)?;

        let mut mosaic = [0; 2];
        gen_pair(driver, Namespace::Framebuffer, &mut mosaic[..1]);
        self.mosaic_framebuffer = mosaic[0];
        gen_pair(driver, Namespace::Texture, &mut mosaic[..1]);
        self.mosaic_texture = mosaic[0];

        driver.bind_framebuffer(gl::FRAMEBUFFER, self.mosaic_framebuffer);
        bind_texture_nearest(driver, self.mosaic_texture);
        driver.tex_image_2d(
            gl::TEXTURE_2D,
            0,
            gl::RGB as i32,
            self.layout.width(),
            self.layout.height(),
            0,
            gl::RGB,
            gl::UNSIGNED_SHORT_5_6_5,
            None,
        );
        driver.framebuffer_texture_2d(
            gl::FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            self.mosaic_texture,
            0,
        );
        let status = driver.check_frame_buffer_status(gl::FRAMEBUFFER);
        if status != gl::FRAMEBUFFER_COMPLETE {
            return Err(RetraceError::Platform(format!(
                "mosaic framebuffer {} ({}x{}) incomplete, status {:#06x}",
                self.mosaic_framebuffer,
                self.layout.width(),
                self.layout.height(),
                status
            )));
        }
        driver.bind_framebuffer(gl::FRAMEBUFFER, self.on_screen_fbo);
        Ok(())
    }

    fn allocate_offscreen_storage(&mut self, driver: &dyn Driver) -> Result<()> {
        let format = self.format;
        for i in 0..2 {
            driver.bind_framebuffer(gl::FRAMEBUFFER, self.framebuffers[i]);

            bind_texture_nearest(driver, self.textures[i]);
            driver.tex_image_2d(
                gl::TEXTURE_2D,
                0,
                format.color_format as i32,
                self.width,
                self.height,
                0,
                format.color_format,
                format.color_type,
                None,
            );
            if format.msaa_samples == 0 {
                driver.framebuffer_texture_2d(
                    gl::FRAMEBUFFER,
                    gl::COLOR_ATTACHMENT0,
                    gl::TEXTURE_2D,
                    self.textures[i],
                    0,
                );
            } else {
                driver.framebuffer_texture_2d_multisample(
                    gl::FRAMEBUFFER,
                    gl::COLOR_ATTACHMENT0,
                    gl::TEXTURE_2D,
                    self.textures[i],
                    0,
                    format.msaa_samples,
                );
            }

            if let Some(depth_format) = format.depth_format {
                self.attach_renderbuffer(driver, self.depth_buffers[i], depth_format, gl::DEPTH_ATTACHMENT);
                if format.depth_stencil {
                    driver.framebuffer_renderbuffer(
                        gl::FRAMEBUFFER,
                        gl::STENCIL_ATTACHMENT,
                        gl::RENDERBUFFER,
                        self.depth_buffers[i],
                    );
                }
            }
            if let Some(stencil_format) = format.stencil_format {
                self.attach_renderbuffer(
                    driver,
                    self.stencil_buffers[i],
                    stencil_format,
                    gl::STENCIL_ATTACHMENT,
                );
            }

            let status = driver.check_frame_buffer_status(gl::FRAMEBUFFER);
            if status != gl::FRAMEBUFFER_COMPLETE {
                return Err(RetraceError::Platform(format!(
                    "offscreen framebuffer {} ({}x{}, format {:?}) incomplete, status {:#06x}",
                    self.framebuffers[i], self.width, self.height, format, status
                )));
            }
        }
        Ok(())
    }

    fn attach_renderbuffer(
        &self,
        driver: &dyn Driver,
        renderbuffer: GLuint,
        internal_format: GLenum,
        attachment: GLenum,
    ) {
        driver.bind_renderbuffer(gl::RENDERBUFFER, renderbuffer);
        if self.format.msaa_samples == 0 {
            driver.renderbuffer_storage(gl::RENDERBUFFER, internal_format, self.width, self.height);
        } else {
            driver.renderbuffer_storage_multisample(
                gl::RENDERBUFFER,
                self.format.msaa_samples,
                internal_format,
                self.width,
                self.height,
            );
        }
        driver.framebuffer_renderbuffer(gl::FRAMEBUFFER, attachment, gl::RENDERBUFFER, renderbuffer);
        driver.bind_renderbuffer(gl::RENDERBUFFER, 0);
    }

    /// Reallocate the offscreen framebuffers at a new size.
    pub fn resize(&mut self, driver: &dyn Driver, width: i32, height: i32) -> Result<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        self.width = width;
        self.height = height;
        self.allocate_offscreen_storage(driver)?;
        driver.bind_framebuffer(gl::FRAMEBUFFER, self.on_screen_fbo);
        Ok(())
    }

    pub fn format(&self) -> &OffscreenFormat {
        &self.format
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn mosaic_index(&self) -> u32 {
        self.mosaic_idx
    }

    /// True if some tiles have been drawn since the mosaic was last shown.
    pub fn needs_flush(&self) -> bool {
        self.mosaic_idx != 0
    }

    /// The offscreen framebuffer that stands in for the screen this frame.
    pub fn offscreen_framebuffer(&self) -> GLuint {
        self.framebuffers[(self.mosaic_idx % 2) as usize]
    }

    fn offscreen_texture(&self) -> GLuint {
        self.textures[(self.mosaic_idx % 2) as usize]
    }

    pub fn bind_offscreen_fbo(&self, driver: &dyn Driver, target: GLenum) {
        driver.bind_framebuffer(target, self.offscreen_framebuffer());
    }

    pub fn bind_offscreen_read_fbo(&self, driver: &dyn Driver) {
        driver.bind_framebuffer(gl::READ_FRAMEBUFFER, self.offscreen_framebuffer());
    }

    /// Draw the frame just finished into the next mosaic tile.
    ///
    /// The framebuffer binding is not restored: the caller binds the next
    /// offscreen framebuffer right after.
    pub fn offscreen_to_mosaic(&mut self, driver: &dyn Driver) {
        let saved = SavedState::save(driver);

        driver.bind_framebuffer(gl::FRAMEBUFFER, self.mosaic_framebuffer);
        let x = (self.mosaic_idx % self.layout.tiles_x) as i32;
        let y = (self.mosaic_idx / self.layout.tiles_x) as i32;
        if self.mosaic_idx == 0 {
            driver.clear(gl::COLOR_BUFFER_BIT);
        }
        driver.viewport(
            x * self.layout.tile_width,
            y * self.layout.tile_height,
            self.layout.tile_width,
            self.layout.tile_height,
        );
        self.quad.draw_texture(driver, self.offscreen_texture());

        saved.restore(driver);
        self.mosaic_idx = (self.mosaic_idx + 1) % self.tiles;
    }

    /// If the mosaic is full, or `force` is set, draw it to the screen and
    /// return true: the caller should present now.
    pub fn mosaic_to_screen_if_needed(&mut self, driver: &dyn Driver, force: bool) -> bool {
        if self.mosaic_idx != 0 && !force {
            return false;
        }

        let saved = SavedState::save(driver);
        let mut clear_color = [0.0; 4];
        driver.get_float_v(gl::COLOR_CLEAR_VALUE, &mut clear_color);

        driver.bind_framebuffer(gl::FRAMEBUFFER, self.on_screen_fbo);
        driver.clear_color(0.3, 0.3, 0.3, 1.0);
        driver.viewport(0, 0, self.layout.width(), self.layout.height());
        driver.clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
        self.quad.draw_texture(driver, self.mosaic_texture);

        saved.restore(driver);
        let [r, g, b, a] = clear_color;
        driver.clear_color(r, g, b, a);
        true
    }

    /// Stop owning our GL objects, so `destroy` leaves them alone. Call this
    /// when the context they live in is going away regardless.
    pub fn release_ownership_of_gl_objects(&mut self) {
        self.owns_gl_objects = false;
        self.quad.release_ownership_of_gl_objects();
    }

    pub fn destroy(&mut self, driver: &dyn Driver) {
        if self.owns_gl_objects {
            driver.delete_names(Namespace::Framebuffer, &self.framebuffers);
            driver.delete_names(Namespace::Texture, &self.textures);
            if self.format.depth_format.is_some() {
                driver.delete_names(Namespace::Renderbuffer, &self.depth_buffers);
            }
            if self.format.stencil_format.is_some() {
                driver.delete_names(Namespace::Renderbuffer, &self.stencil_buffers);
            }
            driver.delete_names(Namespace::Framebuffer, &[self.mosaic_framebuffer]);
            driver.delete_names(Namespace::Texture, &[self.mosaic_texture]);
        }
        self.quad.destroy(driver);
        self.framebuffers = [0; 2];
        self.textures = [0; 2];
        self.depth_buffers = [0; 2];
        self.stencil_buffers = [0; 2];
        self.mosaic_framebuffer = 0;
        self.mosaic_texture = 0;
    }
}

fn gen_pair(driver: &dyn Driver, namespace: Namespace, names: &mut [GLuint]) {
    let fresh = driver.gen_names(namespace, names.len() as i32);
    for (name, fresh) in names.iter_mut().zip(fresh) {
        *name = fresh;
    }
}

fn bind_texture_nearest(driver: &dyn Driver, texture: GLuint) {
    driver.bind_texture(gl::TEXTURE_2D, texture);
    driver.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::NEAREST as i32);
    driver.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::NEAREST as i32);
    driver.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
    driver.tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDriver;

    #[test]
    fn test_derive_format() {
        fn check(rgba: (i32, i32, i32, i32), expected: Option<(GLenum, GLenum)>) {
            let config = EglConfigInfo::new(rgba.0, rgba.1, rgba.2, rgba.3, 0, 0);
            let derived = derive_format(&config, 3, "").ok();
            assert_eq!(derived.map(|f| (f.color_format, f.color_type)), expected);
        }

        check((8, 8, 8, 0), Some((gl::RGB, gl::UNSIGNED_BYTE)));
        check((5, 6, 5, 0), Some((gl::RGB, gl::UNSIGNED_SHORT_5_6_5)));
        check((8, 8, 8, 8), Some((gl::RGBA, gl::UNSIGNED_BYTE)));
        check((4, 4, 4, 4), Some((gl::RGBA, gl::UNSIGNED_SHORT_4_4_4_4)));
        check((5, 5, 5, 1), Some((gl::RGBA, gl::UNSIGNED_SHORT_5_5_5_1)));
        check((6, 6, 6, 0), None);
        check((8, 8, 8, 4), None);
    }

    #[test]
    fn test_derive_depth_stencil() {
        let combined = derive_format(&EglConfigInfo::new(8, 8, 8, 8, 16, 8), 2, "").unwrap();
        assert!(combined.depth_stencil);
        assert_eq!(combined.depth_format, Some(DEPTH24_STENCIL8));
        assert_eq!(combined.stencil_format, None);

        let separate = derive_format(&EglConfigInfo::new(8, 8, 8, 8, 0, 8), 2, "").unwrap();
        assert!(!separate.depth_stencil);
        assert_eq!(separate.depth_format, None);
        assert_eq!(separate.stencil_format, Some(gl::STENCIL_INDEX8));

        // Missing GL_OES_depth24 on ES2 is only logged.
        let depth = derive_format(&EglConfigInfo::new(8, 8, 8, 8, 24, 0), 2, "").unwrap();
        assert_eq!(depth.depth_format, Some(DEPTH_COMPONENT24));

        assert!(derive_format(&EglConfigInfo::new(8, 8, 8, 8, 32, 0), 3, "").is_err());
        assert!(derive_format(&EglConfigInfo::new(8, 8, 8, 8, 24, 4), 3, "").is_err());

        let mut msaa = EglConfigInfo::new(8, 8, 8, 8, 24, 8);
        msaa.msaa_samples = 4;
        assert!(matches!(
            derive_format(&msaa, 3, "GL_OES_depth24"),
            Err(RetraceError::UnsupportedFormat(_))
        ));
        let format = derive_format(&msaa, 3, "GL_EXT_multisampled_render_to_texture").unwrap();
        assert_eq!(format.msaa_samples, 4);
    }

    fn compositor(driver: &FakeDriver, tiles_x: u32, tiles_y: u32) -> OffscreenCompositor {
        let layout = MosaicLayout {
            tiles_x,
            tiles_y,
            tile_width: 16,
            tile_height: 9,
        };
        OffscreenCompositor::new(driver, &EglConfigInfo::new(8, 8, 8, 8, 24, 8), 320, 180, layout, 0, 3)
            .unwrap()
    }

    #[test]
    fn test_mosaic_cycle() {
        let driver = FakeDriver::new();
        let mut compositor = compositor(&driver, 3, 2);
        let tiles = 6;

        for i in 1..=tiles {
            let before = compositor.offscreen_framebuffer();
            compositor.offscreen_to_mosaic(&driver);
            // Ping-pong between the two offscreen framebuffers.
            assert_ne!(compositor.offscreen_framebuffer(), before);
            let presented = compositor.mosaic_to_screen_if_needed(&driver, false);
            assert_eq!(presented, i == tiles, "tile {}", i);
        }
        assert_eq!(compositor.mosaic_index(), 0);

        // A partial mosaic only goes to the screen when forced.
        compositor.offscreen_to_mosaic(&driver);
        assert!(compositor.needs_flush());
        assert!(!compositor.mosaic_to_screen_if_needed(&driver, false));
        assert!(compositor.mosaic_to_screen_if_needed(&driver, true));
    }

    #[test]
    fn test_tile_placement_restores_state() {
        let driver = FakeDriver::new();
        let mut compositor = compositor(&driver, 3, 2);
        driver.viewport(1, 2, 300, 200);
        driver.enable(gl::BLEND);

        for _ in 0..4 {
            compositor.offscreen_to_mosaic(&driver);
        }
        let log = driver.take_log();
        // The fourth tile is the first of the second row.
        assert!(log.contains(&"viewport(0, 9, 16, 9)".to_string()));
        assert!(log.contains(&"viewport(32, 0, 16, 9)".to_string()));
        // The mosaic is cleared only before its first tile.
        assert_eq!(log.iter().filter(|call| call.starts_with("clear(")).count(), 1);
        assert_eq!(log.last(), Some(&format!("disable({:#x})", gl::CULL_FACE)));
        assert_eq!(driver.viewport_state(), [1, 2, 300, 200]);
        assert!(driver.is_enabled(gl::BLEND));
    }

    #[test]
    fn test_release_ownership() {
        let driver = FakeDriver::new();
        let mut owned = compositor(&driver, 2, 2);
        owned.destroy(&driver);
        let log = driver.take_log();
        assert!(log.iter().any(|call| call.starts_with("delete_names(Framebuffer")));
        assert!(log.iter().any(|call| call.starts_with("delete_program")));

        let mut released = compositor(&driver, 2, 2);
        driver.take_log();
        released.release_ownership_of_gl_objects();
        released.destroy(&driver);
        assert!(driver.take_log().is_empty());
    }

    #[test]
    fn test_incomplete_framebuffer() {
        let driver = FakeDriver::new();
        driver.set_framebuffer_status(gl::FRAMEBUFFER_UNSUPPORTED);
        let result = OffscreenCompositor::new(
            &driver,
            &EglConfigInfo::new(8, 8, 8, 0, 0, 0),
            64,
            64,
            MosaicLayout::default(),
            0,
            3,
        );
        assert!(matches!(result, Err(RetraceError::Platform(_))));
    }
}
