//! Every live context and drawable, and what each recorded thread has bound.
//!
//! The trace refers to EGL contexts and surfaces by the handle values the
//! recording process saw. The `StateRegistry` maps those to the objects the
//! retracer created for them.
//!
//! Contexts, drawables and share groups live in `Arena`s and are reference
//! counted. Each place that holds a handle holds one reference: a recorded-id
//! map entry, a thread slot's current context or drawable, the single-surface
//! slot, and (for share groups) each member context. An object is torn down
//! when its last reference goes, so removing a recorded id from a map never
//! destroys an object some thread still has current, or that another recorded
//! id still maps to because of single-window forcing.

use std::collections::HashMap;

use log::{debug, warn};

use crate::arena::{Arena, Handle};
use crate::error::{Result, RetraceError};
use crate::resource::{ResourceContext, Resources, SharedNamespaces};
use crate::window::{NativeContext, NativeImage, NativeSurface, Profile, WindowSystem};

/// The largest recorded thread id we have a slot for, plus one.
pub const THREAD_LIMIT: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Rectangle {
        Rectangle {
            x,
            y,
            width,
            height,
        }
    }

    /// Scale this rectangle by the given ratios, rounding to the nearest pixel.
    pub fn stretch(&self, ratio_w: f32, ratio_h: f32) -> Rectangle {
        Rectangle {
            x: (self.x as f32 * ratio_w).round() as i32,
            y: (self.y as f32 * ratio_h).round() as i32,
            width: (self.width as f32 * ratio_w).round() as i32,
            height: (self.height as f32 * ratio_h).round() as i32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawableKind {
    /// Backed by a native window. `win` is the recorded window id.
    Window { win: i32 },
    Pbuffer,
}

pub struct Drawable {
    pub native: NativeSurface,
    pub kind: DrawableKind,
    /// The size the application asked for, at recording resolution.
    pub width: i32,
    pub height: i32,
    pub visible: bool,
    pub ratio_w: f32,
    pub ratio_h: f32,
}

impl Drawable {
    pub fn new(native: NativeSurface, kind: DrawableKind, width: i32, height: i32) -> Drawable {
        Drawable {
            native,
            kind,
            width,
            height,
            visible: kind != DrawableKind::Pbuffer,
            ratio_w: 1.0,
            ratio_h: 1.0,
        }
    }

    fn retire(self, window: &mut dyn WindowSystem) {
        debug!("destroying surface {:#x}", self.native);
        window.destroy_surface(self.native);
    }
}

pub type ContextHandle = Handle<ResourceContext>;
pub type DrawableHandle = Handle<Drawable>;

/// What one recorded thread has bound.
#[derive(Clone, Debug, Default)]
pub struct ThreadSlot {
    pub context: Option<ContextHandle>,
    pub drawable: Option<DrawableHandle>,

    /// The viewport and scissor the application last set.
    pub app_viewport: Rectangle,
    pub app_scissor: Rectangle,
    /// The viewport and scissor we last passed to the driver.
    pub driver_viewport: Rectangle,
    pub driver_scissor: Rectangle,
}

#[derive(Default)]
pub struct StateRegistry {
    contexts: Arena<ResourceContext>,
    share_groups: Arena<SharedNamespaces>,
    drawables: Arena<Drawable>,

    context_map: HashMap<u64, ContextHandle>,
    drawable_map: HashMap<u64, DrawableHandle>,
    image_map: HashMap<u64, NativeImage>,
    /// Recorded surface id to the recorded window it was created for.
    window_map: HashMap<u64, i32>,
    /// With single-surface rendering, the drawable every window surface
    /// is redirected to.
    single_surface: Option<DrawableHandle>,

    threads: Vec<ThreadSlot>,
}

fn bad_tid(tid: u32) -> RetraceError {
    RetraceError::invalid_trace(format!(
        "thread id {} is beyond the limit of {} threads",
        tid, THREAD_LIMIT
    ))
}

impl StateRegistry {
    pub fn new() -> StateRegistry {
        StateRegistry {
            threads: vec![ThreadSlot::default(); THREAD_LIMIT],
            ..StateRegistry::default()
        }
    }

    /// Create a context object for `native`. If `share` is given, the new
    /// context joins its share group; otherwise it starts a new one.
    ///
    /// The new context has no references yet: store it somewhere with
    /// `insert_context` or `set_thread_context`.
    pub fn create_context(
        &mut self,
        native: NativeContext,
        profile: Profile,
        share: Option<ContextHandle>,
        on_screen_fbo: u32,
    ) -> ContextHandle {
        let group = match share.and_then(|share| self.contexts.get(share)) {
            Some(share) => share.share_group(),
            None => self.share_groups.insert(SharedNamespaces::default()),
        };
        self.share_groups.retain(group);
        self.contexts
            .insert(ResourceContext::new(native, profile, group, on_screen_fbo))
    }

    pub fn context(&self, handle: ContextHandle) -> Option<&ResourceContext> {
        self.contexts.get(handle)
    }

    pub fn context_mut(&mut self, handle: ContextHandle) -> Option<&mut ResourceContext> {
        self.contexts.get_mut(handle)
    }

    /// Return `handle`'s namespaces, private and shared together.
    pub fn resources(&mut self, handle: ContextHandle) -> Option<Resources<'_>> {
        let context = self.contexts.get_mut(handle)?;
        let shared = self.share_groups.get_mut(context.share_group())?;
        Some(Resources { context, shared })
    }

    pub fn same_share_group(&self, a: ContextHandle, b: ContextHandle) -> bool {
        match (self.contexts.get(a), self.contexts.get(b)) {
            (Some(a), Some(b)) => a.share_group() == b.share_group(),
            _ => false,
        }
    }

    fn release_context(&mut self, handle: ContextHandle, window: &mut dyn WindowSystem) {
        if let Some(context) = self.contexts.release(handle) {
            let group = context.share_group();
            context.retire(window);
            if self.share_groups.release(group).is_some() {
                debug!("share group {:?} has no more contexts", group);
            }
        }
    }

    fn release_drawable(&mut self, handle: DrawableHandle, window: &mut dyn WindowSystem) {
        if let Some(drawable) = self.drawables.release(handle) {
            drawable.retire(window);
        }
    }

    /// Map recorded context `id` to `handle`, replacing any earlier mapping.
    pub fn insert_context(&mut self, id: u64, handle: ContextHandle, window: &mut dyn WindowSystem) {
        self.contexts.retain(handle);
        if let Some(old) = self.context_map.insert(id, handle) {
            self.release_context(old, window);
        }
    }

    pub fn get_context(&self, id: u64) -> Option<ContextHandle> {
        self.context_map.get(&id).cloned()
    }

    /// Forget recorded context `id`. The context itself survives as long as
    /// some thread still has it current.
    pub fn remove_context(&mut self, id: u64, window: &mut dyn WindowSystem) -> bool {
        match self.context_map.remove(&id) {
            Some(handle) => {
                self.release_context(handle, window);
                true
            }
            None => false,
        }
    }

    /// The recorded id under which `handle` is registered.
    pub fn get_ctx(&self, handle: ContextHandle) -> Option<u64> {
        self.context_map
            .iter()
            .find(|&(_, &h)| h == handle)
            .map(|(&id, _)| id)
    }

    pub fn create_drawable(&mut self, drawable: Drawable) -> DrawableHandle {
        self.drawables.insert(drawable)
    }

    pub fn drawable(&self, handle: DrawableHandle) -> Option<&Drawable> {
        self.drawables.get(handle)
    }

    pub fn drawable_mut(&mut self, handle: DrawableHandle) -> Option<&mut Drawable> {
        self.drawables.get_mut(handle)
    }

    pub fn insert_drawable(
        &mut self,
        id: u64,
        handle: DrawableHandle,
        window: &mut dyn WindowSystem,
    ) {
        self.drawables.retain(handle);
        if let Some(old) = self.drawable_map.insert(id, handle) {
            self.release_drawable(old, window);
        }
    }

    pub fn get_drawable(&self, id: u64) -> Option<DrawableHandle> {
        self.drawable_map.get(&id).cloned()
    }

    pub fn remove_drawable(&mut self, id: u64, window: &mut dyn WindowSystem) -> bool {
        match self.drawable_map.remove(&id) {
            Some(handle) => {
                self.release_drawable(handle, window);
                true
            }
            None => false,
        }
    }

    /// The recorded id under which `handle` is registered. When single-window
    /// forcing maps several ids to one drawable, the lowest is returned.
    pub fn get_draw(&self, handle: DrawableHandle) -> Option<u64> {
        self.drawable_map
            .iter()
            .filter(|&(_, &h)| h == handle)
            .map(|(&id, _)| id)
            .min()
    }

    pub fn single_surface(&self) -> Option<DrawableHandle> {
        self.single_surface
    }

    pub fn set_single_surface(&mut self, handle: Option<DrawableHandle>, window: &mut dyn WindowSystem) {
        if let Some(new) = handle {
            self.drawables.retain(new);
        }
        if let Some(old) = std::mem::replace(&mut self.single_surface, handle) {
            self.release_drawable(old, window);
        }
    }

    pub fn insert_image(&mut self, id: u64, image: NativeImage) {
        if self.image_map.insert(id, image).is_some() {
            warn!("image {:#x} recreated without being destroyed", id);
        }
    }

    pub fn get_image(&self, id: u64) -> Option<NativeImage> {
        self.image_map.get(&id).cloned()
    }

    pub fn remove_image(&mut self, id: u64) -> Option<NativeImage> {
        self.image_map.remove(&id)
    }

    pub fn set_window(&mut self, surface_id: u64, win: i32) {
        self.window_map.insert(surface_id, win);
    }

    pub fn window_of(&self, surface_id: u64) -> Option<i32> {
        self.window_map.get(&surface_id).cloned()
    }

    pub fn thread(&self, tid: u32) -> Result<&ThreadSlot> {
        self.threads.get(tid as usize).ok_or_else(|| bad_tid(tid))
    }

    pub fn thread_mut(&mut self, tid: u32) -> Result<&mut ThreadSlot> {
        self.threads.get_mut(tid as usize).ok_or_else(|| bad_tid(tid))
    }

    /// Make `context` current on thread `tid`, releasing whatever was.
    pub fn set_thread_context(
        &mut self,
        tid: u32,
        context: Option<ContextHandle>,
        window: &mut dyn WindowSystem,
    ) -> Result<()> {
        self.thread(tid)?;
        if let Some(new) = context {
            if !self.contexts.retain(new) {
                warn!("thread {} made a destroyed context current", tid);
                return Err(RetraceError::invalid_trace(format!(
                    "context {:?} made current on thread {} no longer exists",
                    new, tid
                )));
            }
        }
        let old = std::mem::replace(&mut self.thread_mut(tid)?.context, context);
        if let Some(old) = old {
            self.release_context(old, window);
        }
        Ok(())
    }

    pub fn set_thread_drawable(
        &mut self,
        tid: u32,
        drawable: Option<DrawableHandle>,
        window: &mut dyn WindowSystem,
    ) -> Result<()> {
        self.thread(tid)?;
        if let Some(new) = drawable {
            if !self.drawables.retain(new) {
                warn!("thread {} made a destroyed surface current", tid);
                return Err(RetraceError::invalid_trace(format!(
                    "surface {:?} made current on thread {} no longer exists",
                    new, tid
                )));
            }
        }
        let old = std::mem::replace(&mut self.thread_mut(tid)?.drawable, drawable);
        if let Some(old) = old {
            self.release_drawable(old, window);
        }
        Ok(())
    }

    /// The context current on `tid`, if it's still alive.
    pub fn current_context(&self, tid: u32) -> Option<ContextHandle> {
        self.threads
            .get(tid as usize)
            .and_then(|slot| slot.context)
            .filter(|&handle| self.contexts.contains(handle))
    }

    pub fn current_drawable(&self, tid: u32) -> Option<DrawableHandle> {
        self.threads
            .get(tid as usize)
            .and_then(|slot| slot.drawable)
            .filter(|&handle| self.drawables.contains(handle))
    }

    /// The namespaces of the context current on `tid`.
    pub fn current_resources(&mut self, tid: u32) -> Option<Resources<'_>> {
        let handle = self.current_context(tid)?;
        self.resources(handle)
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn live_drawables(&self) -> usize {
        self.drawables.len()
    }

    /// Drop every reference we hold, destroying all contexts and drawables.
    pub fn reset(&mut self, window: &mut dyn WindowSystem) {
        for tid in 0..self.threads.len() {
            let slot = std::mem::take(&mut self.threads[tid]);
            if let Some(context) = slot.context {
                self.release_context(context, window);
            }
            if let Some(drawable) = slot.drawable {
                self.release_drawable(drawable, window);
            }
        }
        self.set_single_surface(None, window);

        let mut contexts: Vec<_> = self.context_map.drain().collect();
        contexts.sort_by_key(|&(id, _)| id);
        for (_, handle) in contexts {
            self.release_context(handle, window);
        }
        let mut drawables: Vec<_> = self.drawable_map.drain().collect();
        drawables.sort_by_key(|&(id, _)| id);
        for (_, handle) in drawables {
            self.release_drawable(handle, window);
        }

        self.image_map.clear();
        self.window_map.clear();
        debug_assert!(self.contexts.is_empty() && self.drawables.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWindowSystem;

    #[test]
    fn test_stretch() {
        let rect = Rectangle::new(10, 20, 100, 50);
        assert_eq!(rect.stretch(1.0, 1.0), rect);
        assert_eq!(rect.stretch(0.5, 2.0), Rectangle::new(5, 40, 50, 100));
        assert_eq!(Rectangle::new(1, 1, 3, 3).stretch(0.5, 0.5), Rectangle::new(1, 1, 2, 2));
    }

    #[test]
    fn test_context_survives_while_current() {
        let mut window = FakeWindowSystem::new();
        let mut state = StateRegistry::new();

        let ctx = state.create_context(0x10, Profile::Es2, None, 0);
        state.insert_context(0xc0, ctx, &mut window);
        state.set_thread_context(1, Some(ctx), &mut window).unwrap();
        state.set_thread_context(2, Some(ctx), &mut window).unwrap();

        // eglDestroyContext while still current on two threads.
        assert!(state.remove_context(0xc0, &mut window));
        assert!(!state.remove_context(0xc0, &mut window));
        assert_eq!(window.destroyed_contexts(), 0);
        assert!(state.context(ctx).is_some());

        state.set_thread_context(1, None, &mut window).unwrap();
        assert_eq!(window.destroyed_contexts(), 0);
        state.set_thread_context(2, None, &mut window).unwrap();
        assert_eq!(window.destroyed_contexts(), 1);
        assert!(state.context(ctx).is_none());

        // Nothing left to destroy twice.
        state.reset(&mut window);
        assert_eq!(window.destroyed_contexts(), 1);
    }

    #[test]
    fn test_share_groups() {
        let mut window = FakeWindowSystem::new();
        let mut state = StateRegistry::new();

        let a = state.create_context(1, Profile::Es3, None, 0);
        state.insert_context(1, a, &mut window);
        let b = state.create_context(2, Profile::Es3, Some(a), 0);
        state.insert_context(2, b, &mut window);
        let c = state.create_context(3, Profile::Es3, Some(b), 0);
        state.insert_context(3, c, &mut window);
        let lone = state.create_context(4, Profile::Es3, None, 0);
        state.insert_context(4, lone, &mut window);
        assert!(state.same_share_group(a, c));
        assert!(!state.same_share_group(a, lone));

        state.resources(a).unwrap().textures().set(5, 50);
        state.resources(a).unwrap().context.framebuffers.set(5, 51);
        assert_eq!(state.resources(c).unwrap().textures().get(5), 50);
        assert_eq!(state.resources(c).unwrap().context.framebuffers.get(5), 0);
        assert_eq!(state.resources(lone).unwrap().textures().get(5), 0);

        // The group's namespaces outlive the context that created them.
        state.remove_context(1, &mut window);
        assert_eq!(state.resources(b).unwrap().textures().get(5), 50);
        state.remove_context(2, &mut window);
        state.remove_context(3, &mut window);
        assert_eq!(state.share_groups.len(), 1);
        assert_eq!(window.destroyed_contexts(), 3);
    }

    #[test]
    fn test_single_window_drawables() {
        let mut window = FakeWindowSystem::new();
        let mut state = StateRegistry::new();

        let draw = state.create_drawable(Drawable::new(7, DrawableKind::Window { win: 1 }, 64, 64));
        state.insert_drawable(0x100, draw, &mut window);
        // A second recorded surface forced onto the same window.
        state.insert_drawable(0x200, draw, &mut window);
        state.set_thread_drawable(0, Some(draw), &mut window).unwrap();
        assert_eq!(state.get_draw(draw), Some(0x100));

        state.remove_drawable(0x100, &mut window);
        state.set_thread_drawable(0, None, &mut window).unwrap();
        assert_eq!(window.destroyed_surfaces(), 0);
        assert_eq!(state.get_draw(draw), Some(0x200));
        state.remove_drawable(0x200, &mut window);
        assert_eq!(window.destroyed_surfaces(), 1);
        assert_eq!(state.live_drawables(), 0);
    }

    #[test]
    fn test_stale_handles_are_not_made_current() {
        let mut window = FakeWindowSystem::new();
        let mut state = StateRegistry::new();

        let ctx = state.create_context(0x10, Profile::Es2, None, 0);
        state.insert_context(0xc0, ctx, &mut window);
        let draw = state.create_drawable(Drawable::new(7, DrawableKind::Window { win: 1 }, 64, 64));
        state.insert_drawable(0x100, draw, &mut window);
        state.set_thread_context(1, Some(ctx), &mut window).unwrap();
        state.set_thread_drawable(1, Some(draw), &mut window).unwrap();
        state.set_thread_context(1, None, &mut window).unwrap();
        state.set_thread_drawable(1, None, &mut window).unwrap();
        assert!(state.remove_context(0xc0, &mut window));
        state.remove_drawable(0x100, &mut window);
        assert_eq!((window.destroyed_contexts(), window.destroyed_surfaces()), (1, 1));

        assert!(matches!(
            state.set_thread_context(2, Some(ctx), &mut window),
            Err(RetraceError::InvalidTrace(_))
        ));
        assert!(matches!(
            state.set_thread_drawable(2, Some(draw), &mut window),
            Err(RetraceError::InvalidTrace(_))
        ));
        assert_eq!(state.thread(2).unwrap().context, None);
        assert_eq!(state.thread(2).unwrap().drawable, None);

        // Nothing was retained, so tearing down releases nothing twice.
        state.reset(&mut window);
        assert_eq!((window.destroyed_contexts(), window.destroyed_surfaces()), (1, 1));
    }

    #[test]
    fn test_thread_limit() {
        let mut window = FakeWindowSystem::new();
        let mut state = StateRegistry::new();
        assert!(state.thread(THREAD_LIMIT as u32 - 1).is_ok());
        assert!(matches!(
            state.set_thread_context(THREAD_LIMIT as u32, None, &mut window),
            Err(RetraceError::InvalidTrace(_))
        ));
    }
}
