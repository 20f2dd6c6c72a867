//! The window system the retracer runs on.
//!
//! Creating windows, EGL surfaces and contexts is platform glue the retracer
//! doesn't know how to do. It asks a `WindowSystem` instead, and refers to the
//! results by opaque integer handles.
//!
//! `HeadlessWindowSystem` is the implementation used when there is no platform
//! glue at all: it hands out fresh handles, always succeeds, and presents
//! nothing. Paired with a driver that does no GPU work, it replays a trace's
//! bookkeeping only, which is enough to validate a trace or measure the
//! retracer's own overhead.

use log::debug;

use crate::config::EglConfigInfo;
use crate::driver::Driver;

pub type NativeContext = u64;
pub type NativeSurface = u64;
pub type NativeImage = u64;
pub type NativeSync = u64;

/// The client API version a context is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Profile {
    Es1,
    Es2,
    Es3,
}

impl Profile {
    /// Map an `EGL_CONTEXT_CLIENT_VERSION` value to a profile.
    pub fn from_client_version(version: i32) -> Option<Profile> {
        match version {
            1 => Some(Profile::Es1),
            2 => Some(Profile::Es2),
            3 => Some(Profile::Es3),
            _ => None,
        }
    }

    pub fn major_version(self) -> u32 {
        match self {
            Profile::Es1 => 1,
            Profile::Es2 => 2,
            Profile::Es3 => 3,
        }
    }
}

pub trait WindowSystem: Send {
    /// The GL driver for whatever context is current on this thread.
    fn driver(&self) -> &dyn Driver;

    /// The framebuffer configuration actually selected for on-screen surfaces.
    fn selected_config(&self) -> EglConfigInfo {
        EglConfigInfo::default()
    }

    fn create_window_surface(
        &mut self,
        window: i32,
        width: i32,
        height: i32,
        attribs: &[i32],
    ) -> Option<NativeSurface>;
    fn create_pbuffer_surface(&mut self, width: i32, height: i32) -> Option<NativeSurface>;
    fn destroy_surface(&mut self, surface: NativeSurface);
    /// Resize the window backing `surface`, if it has one.
    fn resize_window(&mut self, _surface: NativeSurface, _width: i32, _height: i32) {}

    fn create_context(
        &mut self,
        profile: Profile,
        share: Option<NativeContext>,
    ) -> Option<NativeContext>;
    fn destroy_context(&mut self, context: NativeContext);
    fn make_current(
        &mut self,
        surface: Option<NativeSurface>,
        context: Option<NativeContext>,
    ) -> bool;

    fn swap_buffers(&mut self, surface: NativeSurface) -> bool;
    fn swap_buffers_with_damage(&mut self, surface: NativeSurface, _rects: &[i32]) -> bool {
        self.swap_buffers(surface)
    }

    fn create_image(
        &mut self,
        context: Option<NativeContext>,
        target: u32,
        buffer: u64,
        attribs: &[i32],
    ) -> Option<NativeImage>;
    fn destroy_image(&mut self, image: NativeImage) -> bool;

    fn create_sync(&mut self, sync_type: u32, attribs: &[i32]) -> Option<NativeSync>;
    fn client_wait_sync(&mut self, sync: NativeSync, flags: i32, timeout: u64) -> i32;
    fn destroy_sync(&mut self, sync: NativeSync) -> bool;

    fn set_surface_attribute(&mut self, surface: NativeSurface, attribute: i32, value: i32)
        -> bool;
    fn query_supported_compression_rates(&mut self, _attribs: &[i32]) -> Vec<i32> {
        Vec::new()
    }

    /// True if the platform can pause replay between frames or draws.
    fn steppable(&self) -> bool {
        false
    }

    /// Block until the user asks for the next step.
    fn process_step_event(&mut self) {}

    /// Release platform resources at the end of a run.
    fn cleanup(&mut self) {}
}

/// `EGL_CONDITION_SATISFIED_KHR`.
pub const EGL_CONDITION_SATISFIED: i32 = 0x30F6;

pub struct HeadlessWindowSystem {
    driver: Box<dyn Driver + Send>,
    next_handle: u64,
}

impl HeadlessWindowSystem {
    pub fn new(driver: Box<dyn Driver + Send>) -> HeadlessWindowSystem {
        HeadlessWindowSystem {
            driver,
            next_handle: 1,
        }
    }

    fn fresh(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }
}

impl WindowSystem for HeadlessWindowSystem {
    fn driver(&self) -> &dyn Driver {
        &*self.driver
    }

    fn create_window_surface(
        &mut self,
        window: i32,
        width: i32,
        height: i32,
        _attribs: &[i32],
    ) -> Option<NativeSurface> {
        let surface = self.fresh();
        debug!("headless window {} surface {} ({}x{})", window, surface, width, height);
        Some(surface)
    }

    fn create_pbuffer_surface(&mut self, _width: i32, _height: i32) -> Option<NativeSurface> {
        Some(self.fresh())
    }

    fn destroy_surface(&mut self, _surface: NativeSurface) {}

    fn create_context(
        &mut self,
        _profile: Profile,
        _share: Option<NativeContext>,
    ) -> Option<NativeContext> {
        Some(self.fresh())
    }

    fn destroy_context(&mut self, _context: NativeContext) {}

    fn make_current(
        &mut self,
        _surface: Option<NativeSurface>,
        _context: Option<NativeContext>,
    ) -> bool {
        true
    }

    fn swap_buffers(&mut self, _surface: NativeSurface) -> bool {
        true
    }

    fn create_image(
        &mut self,
        _context: Option<NativeContext>,
        _target: u32,
        _buffer: u64,
        _attribs: &[i32],
    ) -> Option<NativeImage> {
        Some(self.fresh())
    }

    fn destroy_image(&mut self, _image: NativeImage) -> bool {
        true
    }

    fn create_sync(&mut self, _sync_type: u32, _attribs: &[i32]) -> Option<NativeSync> {
        Some(self.fresh())
    }

    fn client_wait_sync(&mut self, _sync: NativeSync, _flags: i32, _timeout: u64) -> i32 {
        EGL_CONDITION_SATISFIED
    }

    fn destroy_sync(&mut self, _sync: NativeSync) -> bool {
        true
    }

    fn set_surface_attribute(
        &mut self,
        _surface: NativeSurface,
        _attribute: i32,
        _value: i32,
    ) -> bool {
        true
    }
}
