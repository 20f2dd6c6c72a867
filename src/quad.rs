//! Drawing a texture over the whole viewport.

use gleam::gl::{self, GLuint};
use log::warn;

use crate::driver::Driver;
use crate::resource::Namespace;

const VERTEX_SHADER: &str = "\
#ifdef GL_ES
precision highp float;
#endif
attribute vec2 position;
attribute vec2 tex_coord;
varying vec2 v_tex_coord;
void main()
{
    gl_Position = vec4(position, 0.0, 1.0);
    v_tex_coord = tex_coord;
}
";

const FRAGMENT_SHADER: &str = "\
#ifdef GL_ES
precision mediump float;
#endif
uniform sampler2D tex;
varying vec2 v_tex_coord;
void main()
{
    gl_FragColor = texture2D(tex, v_tex_coord);
}
";

/// Four corners as a triangle fan: positions, then texture coordinates.
const VERTICES: [f32; 16] = [
    -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, //
    0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0,
];

pub struct Quad {
    program: GLuint,
    tex_location: i32,
    vao: GLuint,
    vbo: GLuint,
    owns_gl_objects: bool,
}

impl Quad {
    /// Build the program and vertex state for drawing textured quads in the
    /// current context. ES1 contexts have no shaders, so the quad can't draw
    /// there.
    pub fn new(driver: &dyn Driver, gles_major_version: u32) -> Quad {
        let mut quad = Quad {
            program: 0,
            tex_location: -1,
            vao: 0,
            vbo: 0,
            owns_gl_objects: true,
        };
        if gles_major_version < 2 {
            warn!("offscreen quad needs GLES 2 or later; compositing is disabled");
            return quad;
        }

        let vs = driver.create_shader(gl::VERTEX_SHADER);
        driver.shader_source(vs, VERTEX_SHADER);
        driver.compile_shader(vs);
        let fs = driver.create_shader(gl::FRAGMENT_SHADER);
        driver.shader_source(fs, FRAGMENT_SHADER);
        driver.compile_shader(fs);

        quad.program = driver.create_program();
        driver.attach_shader(quad.program, vs);
        driver.attach_shader(quad.program, fs);
        driver.bind_attrib_location(quad.program, 0, "position");
        driver.bind_attrib_location(quad.program, 1, "tex_coord");
        driver.link_program(quad.program);
        if driver.get_program_iv(quad.program, gl::LINK_STATUS) == 0 {
            warn!(
                "offscreen quad program failed to link: {}",
                driver.get_program_info_log(quad.program)
            );
        }
        quad.tex_location = driver.get_uniform_location(quad.program, "tex");
        driver.delete_shader(vs);
        driver.delete_shader(fs);

        let saved_buffer = driver.get_integer(gl::ARRAY_BUFFER_BINDING) as GLuint;
        quad.vao = first_name(driver.gen_names(Namespace::VertexArray, 1));
        driver.bind_vertex_array(quad.vao);
        quad.vbo = first_name(driver.gen_names(Namespace::Buffer, 1));
        driver.bind_buffer(gl::ARRAY_BUFFER, quad.vbo);
        driver.buffer_data_f32(gl::ARRAY_BUFFER, &VERTICES, gl::STATIC_DRAW);
        driver.enable_vertex_attrib_array(0);
        driver.vertex_attrib_pointer(0, 2, gl::FLOAT, false, 0, 0);
        driver.enable_vertex_attrib_array(1);
        driver.vertex_attrib_pointer(1, 2, gl::FLOAT, false, 0, 8 * 4);
        driver.bind_vertex_array(0);
        driver.bind_buffer(gl::ARRAY_BUFFER, saved_buffer);

        quad
    }

    pub fn can_draw(&self) -> bool {
        self.program != 0
    }

    /// Draw `texture` over the current viewport. Depth testing is off while
    /// drawing; the texture, program and vertex array bindings are restored
    /// afterwards.
    pub fn draw_texture(&self, driver: &dyn Driver, texture: GLuint) {
        if !self.can_draw() {
            return;
        }

        let depth_test = driver.is_enabled(gl::DEPTH_TEST);
        let active_texture = driver.get_integer(gl::ACTIVE_TEXTURE) as u32;
        let program = driver.get_integer(gl::CURRENT_PROGRAM) as GLuint;
        let vao = driver.get_integer(gl::VERTEX_ARRAY_BINDING) as GLuint;

        driver.disable(gl::DEPTH_TEST);
        driver.use_program(self.program);
        driver.active_texture(gl::TEXTURE0);
        let bound_texture = driver.get_integer(gl::TEXTURE_BINDING_2D) as GLuint;
        driver.bind_texture(gl::TEXTURE_2D, texture);
        driver.uniform_1i(self.tex_location, 0);
        driver.bind_vertex_array(self.vao);
        driver.draw_arrays(gl::TRIANGLE_FAN, 0, 4);

        driver.bind_vertex_array(vao);
        driver.bind_texture(gl::TEXTURE_2D, bound_texture);
        driver.active_texture(if active_texture == 0 { gl::TEXTURE0 } else { active_texture });
        driver.use_program(program);
        if depth_test {
            driver.enable(gl::DEPTH_TEST);
        }
    }

    /// Stop owning our GL objects: `destroy` will leave them alone. Used when
    /// the context they live in is about to be destroyed anyway.
    pub fn release_ownership_of_gl_objects(&mut self) {
        self.owns_gl_objects = false;
    }

    pub fn destroy(&mut self, driver: &dyn Driver) {
        if self.owns_gl_objects {
            if self.vbo != 0 {
                driver.delete_names(Namespace::Buffer, &[self.vbo]);
            }
            if self.vao != 0 {
                driver.delete_names(Namespace::VertexArray, &[self.vao]);
            }
            if self.program != 0 {
                driver.delete_program(self.program);
            }
        }
        self.vbo = 0;
        self.vao = 0;
        self.program = 0;
    }
}

fn first_name(names: Vec<GLuint>) -> GLuint {
    names.first().cloned().unwrap_or(0)
}
