use std::ffi::c_void;
use std::rc::Rc;

use gl::types::{GLchar, GLenum, GLint, GLuint};
use log::warn;

use crate::backend::{FramebufferId, Filter, GlBackend, ShaderState, TextureId};
use crate::dmabuf::DmaBuf;
use crate::error::{Error, Result};
use crate::geometry::{BlitRect, Rect, Viewport};
use crate::render::egl::EglDisplay;
use crate::surface::{upload_order, DisplaySurface, UploadOrder};

// EGL extensions for dmabuf import
const EGL_LINUX_DMA_BUF_EXT: u32 = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: i32 = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: i32 = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: i32 = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: i32 = 0x3274;
const EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT: i32 = 0x3443;
const EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT: i32 = 0x3444;
const EGL_WIDTH: i32 = 0x3057;
const EGL_HEIGHT: i32 = 0x3056;
const EGL_NONE: i32 = 0x3038;

type CreateImageKhr = unsafe extern "C" fn(
    *mut c_void, // EGLDisplay
    *mut c_void, // EGLContext
    u32,
    *mut c_void,
    *const i32,
) -> *mut c_void;
type DestroyImageKhr = unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32;
type ImageTargetTexture2DOes = unsafe extern "C" fn(u32, *mut c_void);

const VERTEX_SHADER: &str = r#"
    #version 100
    attribute vec2 pos;
    attribute vec2 tex;
    varying vec2 v_tex;
    void main() {
        gl_Position = vec4(pos, 0.0, 1.0);
        v_tex = tex;
    }
"#;

const FRAGMENT_SHADER: &str = r#"
    #version 100
    precision mediump float;
    varying vec2 v_tex;
    uniform sampler2D u_texture;
    void main() {
        gl_FragColor = texture2D(u_texture, v_tex);
    }
"#;

fn upload_format(surface: &DisplaySurface) -> GLenum {
    match upload_order(surface.format()) {
        Some(UploadOrder::Rgba) => gl::RGBA,
        _ => gl::BGRA,
    }
}

/// Cast a looked-up entry point to its real signature.
///
/// `T` must be a function pointer type matching the entry point.
unsafe fn resolve<T>(name: &str, proc_address: Option<extern "system" fn()>) -> Result<T> {
    let f = proc_address.ok_or_else(|| Error::Egl(format!("{} not found", name)))?;
    Ok(std::mem::transmute_copy::<extern "system" fn(), T>(&f))
}

unsafe fn compile_shader(shader_type: GLenum, source: &str) -> Result<GLuint> {
    let shader = gl::CreateShader(shader_type);
    let source_ptr = source.as_ptr() as *const GLchar;
    let source_len = source.len() as GLint;
    gl::ShaderSource(shader, 1, &source_ptr, &source_len);
    gl::CompileShader(shader);

    let mut status = 0;
    gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);
    if status == 0 {
        let mut len = 0;
        gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
        let mut buf = vec![0u8; len.max(1) as usize];
        gl::GetShaderInfoLog(
            shader,
            len,
            std::ptr::null_mut(),
            buf.as_mut_ptr() as *mut GLchar,
        );
        gl::DeleteShader(shader);
        return Err(Error::Shader(format!(
            "compile error: {}",
            String::from_utf8_lossy(&buf).trim_end_matches('\0')
        )));
    }

    Ok(shader)
}

/// OpenGL ES 3 implementation of the present primitives.
///
/// GL entry points must already be loaded (`EglDisplay::load_gl`) and the
/// output's context current for every call.
pub struct GlesBackend {
    display: Rc<EglDisplay>,
}

impl GlesBackend {
    pub fn new(display: Rc<EglDisplay>) -> Self {
        Self { display }
    }

    /// Read back the default framebuffer as tightly packed RGBA rows, bottom
    /// row first.
    pub fn read_pixels(&self, width: u32, height: u32) -> Vec<u8> {
        let mut pixels = vec![0u8; (width * height * 4) as usize];
        unsafe {
            gl::BindFramebuffer(gl::READ_FRAMEBUFFER, 0);
            gl::PixelStorei(gl::PACK_ALIGNMENT, 1);
            gl::ReadPixels(
                0,
                0,
                width as i32,
                height as i32,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                pixels.as_mut_ptr() as *mut c_void,
            );
        }
        pixels
    }

    /// Fill a texture with a solid color by rendering into it.
    pub fn clear_texture(&mut self, texture: TextureId, width: u32, height: u32, rgba: [f32; 4]) {
        unsafe {
            let mut fb = 0;
            gl::GenFramebuffers(1, &mut fb);
            gl::BindFramebuffer(gl::FRAMEBUFFER, fb);
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                texture.0,
                0,
            );
            gl::Viewport(0, 0, width as i32, height as i32);
            gl::ClearColor(rgba[0], rgba[1], rgba[2], rgba[3]);
            gl::Clear(gl::COLOR_BUFFER_BIT);
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
            gl::DeleteFramebuffers(1, &fb);
        }
    }

    unsafe fn image_procs(&self) -> Result<(CreateImageKhr, DestroyImageKhr, ImageTargetTexture2DOes)> {
        let lookup = |name: &str| self.display.proc_address(name);
        Ok((
            resolve("eglCreateImageKHR", lookup("eglCreateImageKHR"))?,
            resolve("eglDestroyImageKHR", lookup("eglDestroyImageKHR"))?,
            resolve(
                "glEGLImageTargetTexture2DOES",
                lookup("glEGLImageTargetTexture2DOES"),
            )?,
        ))
    }
}

impl GlBackend for GlesBackend {
    fn init_shader(&mut self) -> Result<ShaderState> {
        unsafe {
            let vs = compile_shader(gl::VERTEX_SHADER, VERTEX_SHADER)?;
            let fs = match compile_shader(gl::FRAGMENT_SHADER, FRAGMENT_SHADER) {
                Ok(fs) => fs,
                Err(e) => {
                    gl::DeleteShader(vs);
                    return Err(e);
                }
            };

            let program = gl::CreateProgram();
            gl::AttachShader(program, vs);
            gl::AttachShader(program, fs);
            gl::LinkProgram(program);
            gl::DeleteShader(vs);
            gl::DeleteShader(fs);

            let mut status = 0;
            gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);
            if status == 0 {
                gl::DeleteProgram(program);
                return Err(Error::Shader("failed to link shader program".into()));
            }

            let mut vao = 0;
            gl::GenVertexArrays(1, &mut vao);
            gl::BindVertexArray(vao);

            // Full screen quad
            let vertices: [f32; 16] = [
                // pos      // tex
                -1.0, -1.0, 0.0, 1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0,
            ];

            let mut vbo = 0;
            gl::GenBuffers(1, &mut vbo);
            gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                std::mem::size_of_val(&vertices) as isize,
                vertices.as_ptr() as *const c_void,
                gl::STATIC_DRAW,
            );

            let stride = (4 * std::mem::size_of::<f32>()) as i32;
            let pos_loc = gl::GetAttribLocation(program, b"pos\0".as_ptr() as *const GLchar);
            let tex_loc = gl::GetAttribLocation(program, b"tex\0".as_ptr() as *const GLchar);

            gl::EnableVertexAttribArray(pos_loc as u32);
            gl::VertexAttribPointer(pos_loc as u32, 2, gl::FLOAT, gl::FALSE, stride, std::ptr::null());

            gl::EnableVertexAttribArray(tex_loc as u32);
            gl::VertexAttribPointer(
                tex_loc as u32,
                2,
                gl::FLOAT,
                gl::FALSE,
                stride,
                (2 * std::mem::size_of::<f32>()) as *const c_void,
            );

            gl::UseProgram(program);
            let sampler = gl::GetUniformLocation(program, b"u_texture\0".as_ptr() as *const GLchar);
            gl::Uniform1i(sampler, 0);

            gl::BindVertexArray(0);

            Ok(ShaderState { program, vao, vbo })
        }
    }

    fn destroy_shader(&mut self, shader: ShaderState) {
        unsafe {
            gl::DeleteProgram(shader.program);
            gl::DeleteVertexArrays(1, &shader.vao);
            gl::DeleteBuffers(1, &shader.vbo);
        }
    }

    fn create_surface_texture(&mut self, surface: &DisplaySurface) -> TextureId {
        let format = upload_format(surface);
        let pixels = surface.pixels();
        unsafe {
            let mut texture = 0;
            gl::GenTextures(1, &mut texture);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);

            gl::PixelStorei(
                gl::UNPACK_ROW_LENGTH,
                (surface.stride() / DisplaySurface::BYTES_PER_PIXEL) as i32,
            );
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                format as i32,
                surface.width() as i32,
                surface.height() as i32,
                0,
                format,
                gl::UNSIGNED_BYTE,
                pixels.as_ptr() as *const c_void,
            );
            gl::PixelStorei(gl::UNPACK_ROW_LENGTH, 0);
            TextureId(texture)
        }
    }

    fn update_surface_texture(&mut self, texture: TextureId, surface: &DisplaySurface, rect: Rect) {
        let format = upload_format(surface);
        let pixels = surface.pixels();
        let start = surface.offset_of(rect.x as u32, rect.y as u32);
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, texture.0);
            gl::PixelStorei(
                gl::UNPACK_ROW_LENGTH,
                (surface.stride() / DisplaySurface::BYTES_PER_PIXEL) as i32,
            );
            gl::TexSubImage2D(
                gl::TEXTURE_2D,
                0,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                format,
                gl::UNSIGNED_BYTE,
                pixels[start..].as_ptr() as *const c_void,
            );
            gl::PixelStorei(gl::UNPACK_ROW_LENGTH, 0);
        }
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        unsafe {
            gl::DeleteTextures(1, &texture.0);
        }
    }

    fn render_surface_texture(
        &mut self,
        shader: &ShaderState,
        texture: TextureId,
        surface: &DisplaySurface,
        target: FramebufferId,
        window: (u32, u32),
    ) {
        let fit = Viewport::fit(window, surface.size(), 1);
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, target.0);
            gl::ClearColor(0.0, 0.0, 0.0, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);
            gl::Viewport(fit.offset_x, fit.offset_y, fit.width, fit.height);

            gl::UseProgram(shader.program);
            gl::ActiveTexture(gl::TEXTURE0);
            gl::BindTexture(gl::TEXTURE_2D, texture.0);
            gl::BindVertexArray(shader.vao);
            gl::DrawArrays(gl::TRIANGLE_STRIP, 0, 4);
            gl::BindVertexArray(0);
        }
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let mut fb = 0;
        unsafe {
            gl::GenFramebuffers(1, &mut fb);
        }
        FramebufferId(fb)
    }

    fn attach_texture(&mut self, framebuffer: FramebufferId, texture: TextureId) {
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer.0);
            gl::FramebufferTexture2D(
                gl::FRAMEBUFFER,
                gl::COLOR_ATTACHMENT0,
                gl::TEXTURE_2D,
                texture.0,
                0,
            );
            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);
            if status != gl::FRAMEBUFFER_COMPLETE {
                warn!(
                    "Framebuffer {:?} incomplete with texture {:?}: 0x{:x}",
                    framebuffer, texture, status
                );
            }
            gl::BindFramebuffer(gl::FRAMEBUFFER, 0);
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        unsafe {
            gl::DeleteFramebuffers(1, &framebuffer.0);
        }
    }

    fn set_viewport(&mut self, rect: Rect) {
        unsafe {
            gl::Viewport(rect.x, rect.y, rect.width, rect.height);
        }
    }

    fn blit(
        &mut self,
        read: FramebufferId,
        draw: FramebufferId,
        src: BlitRect,
        dst: BlitRect,
        filter: Filter,
    ) {
        let filter = match filter {
            Filter::Nearest => gl::NEAREST,
            Filter::Linear => gl::LINEAR,
        };
        unsafe {
            gl::BindFramebuffer(gl::DRAW_FRAMEBUFFER, draw.0);
            // letterbox bars
            gl::ClearColor(0.0, 0.0, 0.0, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);

            gl::BindFramebuffer(gl::READ_FRAMEBUFFER, read.0);
            gl::BlitFramebuffer(
                src.x0,
                src.y0,
                src.x1,
                src.y1,
                dst.x0,
                dst.y0,
                dst.x1,
                dst.y1,
                gl::COLOR_BUFFER_BIT,
                filter,
            );
        }
    }

    fn flush(&mut self) {
        unsafe {
            gl::Flush();
        }
    }

    fn import_dmabuf(&mut self, dmabuf: &DmaBuf) -> Option<TextureId> {
        let mut attribs = vec![
            EGL_WIDTH,
            dmabuf.width as i32,
            EGL_HEIGHT,
            dmabuf.height as i32,
            EGL_LINUX_DRM_FOURCC_EXT,
            dmabuf.fourcc as u32 as i32,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            dmabuf.fd(),
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            dmabuf.offset as i32,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            dmabuf.stride as i32,
        ];
        if let Some((hi, lo)) = dmabuf.modifier_parts() {
            attribs.extend_from_slice(&[
                EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT,
                lo as i32,
                EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT,
                hi as i32,
            ]);
        }
        attribs.push(EGL_NONE);

        unsafe {
            let (create_image, destroy_image, image_target) = match self.image_procs() {
                Ok(procs) => procs,
                Err(e) => {
                    warn!("Dmabuf import unavailable: {}", e);
                    return None;
                }
            };

            let display = self.display.display.as_ptr();
            let image = create_image(
                display,
                std::ptr::null_mut(),
                EGL_LINUX_DMA_BUF_EXT,
                std::ptr::null_mut(),
                attribs.as_ptr(),
            );
            if image.is_null() {
                warn!("eglCreateImageKHR rejected dmabuf fd {}", dmabuf.fd());
                return None;
            }

            let mut texture = 0;
            gl::GenTextures(1, &mut texture);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::NEAREST as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::NEAREST as i32);
            image_target(gl::TEXTURE_2D, image);

            // The texture keeps its own reference to the buffer.
            destroy_image(display, image);

            Some(TextureId(texture))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "system" fn entry_point() {}

    #[test]
    fn test_resolve_names_missing_entry_point() {
        let err = unsafe { resolve::<extern "system" fn()>("eglCreateImageKHR", None) }.unwrap_err();
        assert_eq!(err.to_string(), "EGL error: eglCreateImageKHR not found");
    }

    #[test]
    fn test_resolve_casts_entry_point() {
        let f: extern "system" fn() =
            unsafe { resolve("eglDestroyImageKHR", Some(entry_point as extern "system" fn())) }
                .unwrap();
        assert_eq!(f as usize, entry_point as usize);
    }
}
