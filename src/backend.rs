//! Seams between the output core and the things it drives.
//!
//! `Window` is the toolkit side: the drawable an output presents into, its
//! GL context, and any extra contexts the guest renderer asks for.
//! `GlBackend` is the handful of GL primitives the present pipeline needs.
//! Every `GlBackend` call assumes the output's window context is current.

use serde::Deserialize;

use crate::dmabuf::DmaBuf;
use crate::error::Result;
use crate::geometry::{BlitRect, Rect};
use crate::surface::DisplaySurface;

/// GL texture name. Zero is "no texture".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureId(pub u32);

impl TextureId {
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// GL framebuffer name. Zero is the window's default framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferId(pub u32);

impl FramebufferId {
    pub const DEFAULT: Self = Self(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Handle for a context created on behalf of the guest renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

/// Requested GL context version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct GlVersion {
    pub major: u8,
    pub minor: u8,
}

impl GlVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl Default for GlVersion {
    fn default() -> Self {
        Self::new(3, 0)
    }
}

/// Program and vertex state used to draw the surface texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderState {
    pub program: u32,
    pub vao: u32,
    pub vbo: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

pub trait Window {
    type Context;

    /// Whether the drawable exists yet; GL setup waits until it does.
    fn is_realized(&self) -> bool;

    /// Integer device scale factor (backing pixels per logical pixel).
    fn scale_factor(&self) -> u32;

    /// Bind the window's own context to the calling thread.
    fn make_current(&self) -> Result<()>;

    /// Framebuffer the present pipeline draws into.
    fn draw_target(&self) -> FramebufferId;

    /// Create and realize a context sharing objects with the window context.
    fn create_context(&self, version: GlVersion) -> Result<Self::Context>;

    fn destroy_context(&self, context: Self::Context);

    fn make_context_current(&self, context: &Self::Context) -> Result<()>;
}

pub trait GlBackend {
    fn init_shader(&mut self) -> Result<ShaderState>;

    fn destroy_shader(&mut self, shader: ShaderState);

    /// Create a texture holding the whole surface.
    fn create_surface_texture(&mut self, surface: &DisplaySurface) -> TextureId;

    /// Re-upload `rect` of the surface into `texture`.
    fn update_surface_texture(&mut self, texture: TextureId, surface: &DisplaySurface, rect: Rect);

    fn destroy_texture(&mut self, texture: TextureId);

    /// Draw the surface texture into `target`, fitted inside a window of the
    /// given size.
    fn render_surface_texture(
        &mut self,
        shader: &ShaderState,
        texture: TextureId,
        surface: &DisplaySurface,
        target: FramebufferId,
        window: (u32, u32),
    );

    fn create_framebuffer(&mut self) -> FramebufferId;

    /// Attach `texture` as the framebuffer's color attachment.
    fn attach_texture(&mut self, framebuffer: FramebufferId, texture: TextureId);

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn set_viewport(&mut self, rect: Rect);

    fn blit(
        &mut self,
        read: FramebufferId,
        draw: FramebufferId,
        src: BlitRect,
        dst: BlitRect,
        filter: Filter,
    );

    fn flush(&mut self);

    /// Import an external buffer as a texture without copying. `None` when
    /// the driver rejects the descriptor.
    fn import_dmabuf(&mut self, dmabuf: &DmaBuf) -> Option<TextureId>;
}
