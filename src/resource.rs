//! Per-context object namespaces.
//!
//! Every live GL context gets a `ResourceContext`, holding one `HandleMap` per
//! object namespace that GL keeps private to a context. The namespaces that a
//! share group has in common live in a single `SharedNamespaces`, stored in the
//! `StateRegistry` and reference-counted by the contexts in the group; each
//! context just holds a handle to it. Which namespaces are shared is a fixed
//! property of the namespace: `Resources::map` knows where each one lives.

use std::collections::HashMap;

use log::debug;

use crate::arena::Handle;
use crate::handle_map::HandleMap;
use crate::offscreen::OffscreenCompositor;
use crate::window::{NativeContext, Profile, WindowSystem};

/// The kinds of GL object whose names the retracer remaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Texture,
    Buffer,
    Program,
    Shader,
    Renderbuffer,
    Sampler,
    Framebuffer,
    VertexArray,
    TransformFeedback,
    Query,
    Pipeline,
}

/// The namespaces shared by every context in a share group.
#[derive(Default)]
pub struct SharedNamespaces {
    pub textures: HandleMap<u32>,
    pub buffers: HandleMap<u32>,
    pub programs: HandleMap<u32>,
    pub shaders: HandleMap<u32>,
    pub renderbuffers: HandleMap<u32>,
    pub samplers: HandleMap<u32>,
    /// Sync objects are pointers on the driver side.
    pub syncs: HandleMap<u64>,
    /// Source text of each live shader, for shader cache lookups.
    pub shader_sources: HashMap<u32, String>,
    /// Live shaders attached to each live program, in attachment order.
    pub program_shaders: HashMap<u32, Vec<u32>>,
}

impl SharedNamespaces {
    /// The source texts of the shaders attached to `program`.
    pub fn program_sources(&self, program: u32) -> Vec<&str> {
        self.program_shaders
            .get(&program)
            .map(|shaders| {
                shaders
                    .iter()
                    .filter_map(|shader| self.shader_sources.get(shader))
                    .map(|source| source.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub type ShareGroup = Handle<SharedNamespaces>;

/// The retracer's view of one live GL context.
pub struct ResourceContext {
    pub native: NativeContext,
    pub profile: Profile,
    share_group: ShareGroup,

    pub framebuffers: HandleMap<u32>,
    pub vertex_arrays: HandleMap<u32>,
    pub transform_feedbacks: HandleMap<u32>,
    pub queries: HandleMap<u32>,
    pub pipelines: HandleMap<u32>,
    /// EGL sync objects created while this context was current.
    pub egl_syncs: HandleMap<u64>,

    pub current_program: u32,
    /// The recorded name of the framebuffer the trace last bound.
    pub current_framebuffer: u32,
    pub first_make_current: bool,

    /// Created lazily on first make-current in offscreen mode.
    pub offscreen: Option<OffscreenCompositor>,
}

impl ResourceContext {
    /// Return a new context in `share_group`. `on_screen_fbo` is the live name
    /// of the window system framebuffer; recorded framebuffer 0 maps to it.
    pub fn new(
        native: NativeContext,
        profile: Profile,
        share_group: ShareGroup,
        on_screen_fbo: u32,
    ) -> ResourceContext {
        let mut framebuffers = HandleMap::default();
        framebuffers.set(0, on_screen_fbo);
        ResourceContext {
            native,
            profile,
            share_group,
            framebuffers,
            vertex_arrays: HandleMap::default(),
            transform_feedbacks: HandleMap::default(),
            queries: HandleMap::default(),
            pipelines: HandleMap::default(),
            egl_syncs: HandleMap::default(),
            current_program: 0,
            current_framebuffer: 0,
            first_make_current: true,
            offscreen: None,
        }
    }

    pub fn share_group(&self) -> ShareGroup {
        self.share_group
    }

    /// Tear down a context whose last reference has been released.
    ///
    /// The compositor gives up its GL objects first: destroying the context
    /// reclaims them, and deleting them afterwards would name objects that no
    /// longer exist.
    pub fn retire(mut self, window: &mut dyn WindowSystem) {
        if let Some(mut offscreen) = self.offscreen.take() {
            offscreen.release_ownership_of_gl_objects();
            offscreen.destroy(window.driver());
        }
        debug!("destroying context {:#x}", self.native);
        window.destroy_context(self.native);
    }
}

/// A context's private namespaces together with its share group's.
pub struct Resources<'a> {
    pub context: &'a mut ResourceContext,
    pub shared: &'a mut SharedNamespaces,
}

impl<'a> Resources<'a> {
    /// The name map for `namespace`, whether private or shared.
    pub fn map(&mut self, namespace: Namespace) -> &mut HandleMap<u32> {
        match namespace {
            Namespace::Texture => &mut self.shared.textures,
            Namespace::Buffer => &mut self.shared.buffers,
            Namespace::Program => &mut self.shared.programs,
            Namespace::Shader => &mut self.shared.shaders,
            Namespace::Renderbuffer => &mut self.shared.renderbuffers,
            Namespace::Sampler => &mut self.shared.samplers,
            Namespace::Framebuffer => &mut self.context.framebuffers,
            Namespace::VertexArray => &mut self.context.vertex_arrays,
            Namespace::TransformFeedback => &mut self.context.transform_feedbacks,
            Namespace::Query => &mut self.context.queries,
            Namespace::Pipeline => &mut self.context.pipelines,
        }
    }

    pub fn textures(&mut self) -> &mut HandleMap<u32> {
        self.map(Namespace::Texture)
    }

    pub fn buffers(&mut self) -> &mut HandleMap<u32> {
        self.map(Namespace::Buffer)
    }

    pub fn programs(&mut self) -> &mut HandleMap<u32> {
        self.map(Namespace::Program)
    }

    pub fn shaders(&mut self) -> &mut HandleMap<u32> {
        self.map(Namespace::Shader)
    }

    pub fn syncs(&mut self) -> &mut HandleMap<u64> {
        &mut self.shared.syncs
    }
}
