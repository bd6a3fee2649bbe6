//! Per-output present pipeline.
//!
//! An `Output` owns everything one displayed virtual console needs on the GL
//! side: the window it presents into, the surface texture, the scanout
//! framebuffer, the shader, and any guest contexts. It switches between
//! surface mode (upload the guest's CPU framebuffer) and scanout mode (blit a
//! texture the guest rendered on the GPU).

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, trace, warn};

use crate::backend::{
    ContextId, FramebufferId, Filter, GlBackend, GlVersion, ShaderState, TextureId, Window,
};
use crate::dmabuf::{DmaBuf, ImportOwner};
use crate::error::{Error, Result};
use crate::geometry::{BlitRect, Rect, Viewport};
use crate::surface::DisplaySurface;

/// Notifications for the display loop, drained with `take_events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Schedule a draw. At most one is outstanding until the next draw.
    RedrawRequested,
    /// A present completed; the guest may reuse its buffer.
    BufferConsumed,
    /// The guest surface changed size; the window should follow.
    ResizeWindow { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoRenderer,
    NoFramebuffer,
    NoSurface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Presented,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Surface,
    Scanout,
}

/// Framebuffer object wrapping the guest's scanout texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestFramebuffer {
    pub framebuffer: FramebufferId,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
struct Scanout {
    framebuffer: GuestFramebuffer,
    y0_top: bool,
    region: Rect,
}

#[derive(Debug)]
enum Mode {
    Surface,
    Scanout(Scanout),
}

#[derive(Debug, Clone, Copy)]
struct ScanoutTarget {
    texture: TextureId,
    backing: (u32, u32),
    y0_top: bool,
    region: Rect,
}

static NEXT_IMPORT_OWNER: AtomicU64 = AtomicU64::new(1);

struct BoundSurface {
    surface: Rc<DisplaySurface>,
    // None until the shader exists
    texture: Option<TextureId>,
}

pub struct Output<W: Window, G: GlBackend> {
    window: W,
    gl: G,
    import_owner: ImportOwner,
    mode: Mode,
    surface: Option<BoundSurface>,
    shader: Option<ShaderState>,
    contexts: HashMap<ContextId, W::Context>,
    next_context: u32,
    window_size: (u32, u32),
    source_size: (u32, u32),
    viewport: Option<Viewport>,
    pending_updates: u32,
    redraw_queued: bool,
    events: Vec<DisplayEvent>,
    torn_down: bool,
}

impl<W: Window, G: GlBackend> Output<W, G> {
    pub fn new(window: W, gl: G) -> Self {
        Self {
            window,
            gl,
            import_owner: ImportOwner(NEXT_IMPORT_OWNER.fetch_add(1, Ordering::Relaxed)),
            mode: Mode::Surface,
            surface: None,
            shader: None,
            contexts: HashMap::new(),
            next_context: 1,
            window_size: (1, 1),
            source_size: (0, 0),
            viewport: None,
            pending_updates: 0,
            redraw_queued: false,
            events: Vec::new(),
            torn_down: false,
        }
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn gl(&self) -> &G {
        &self.gl
    }

    pub fn gl_mut(&mut self) -> &mut G {
        &mut self.gl
    }

    pub fn mode(&self) -> ModeKind {
        match self.mode {
            Mode::Surface => ModeKind::Surface,
            Mode::Scanout(_) => ModeKind::Scanout,
        }
    }

    pub fn guest_framebuffer(&self) -> Option<GuestFramebuffer> {
        match &self.mode {
            Mode::Scanout(scanout) => Some(scanout.framebuffer),
            Mode::Surface => None,
        }
    }

    /// Row order of the scanout texture, when scanning out.
    pub fn y0_top(&self) -> Option<bool> {
        match &self.mode {
            Mode::Scanout(scanout) => Some(scanout.y0_top),
            Mode::Surface => None,
        }
    }

    pub fn surface(&self) -> Option<&Rc<DisplaySurface>> {
        self.surface.as_ref().map(|bound| &bound.surface)
    }

    pub fn surface_texture(&self) -> Option<TextureId> {
        self.surface.as_ref().and_then(|bound| bound.texture)
    }

    pub fn has_renderer(&self) -> bool {
        self.shader.is_some()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    pub fn pending_updates(&self) -> u32 {
        self.pending_updates
    }

    /// Texture this output imported `dmabuf` as, if any.
    pub fn imported_texture(&self, dmabuf: &DmaBuf) -> Option<TextureId> {
        dmabuf.import_for(self.import_owner)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn take_events(&mut self) -> Vec<DisplayEvent> {
        std::mem::take(&mut self.events)
    }

    fn request_redraw(&mut self) {
        if !self.redraw_queued {
            self.redraw_queued = true;
            self.events.push(DisplayEvent::RedrawRequested);
        }
    }

    fn refresh_source_size(&mut self) {
        self.source_size = match &self.mode {
            Mode::Scanout(scanout) => (scanout.region.width as u32, scanout.region.height as u32),
            Mode::Surface => self
                .surface
                .as_ref()
                .map(|bound| bound.surface.size())
                .unwrap_or((0, 0)),
        };
        self.recompute_viewport();
    }

    fn recompute_viewport(&mut self) {
        let (sw, sh) = self.source_size;
        if sw == 0 || sh == 0 {
            self.viewport = None;
            return;
        }
        let viewport = Viewport::fit(self.window_size, self.source_size, self.window.scale_factor());
        trace!(
            "viewport {}x{}+{}+{} scale {:.3}",
            viewport.width,
            viewport.height,
            viewport.offset_x,
            viewport.offset_y,
            viewport.scale
        );
        self.viewport = Some(viewport);
    }

    fn recreate_surface_texture(&mut self) {
        let Some(bound) = self.surface.as_mut() else {
            return;
        };
        // New name first, so the driver cannot hand the old one back.
        if let Some(old) = bound.texture.take() {
            let texture = self.gl.create_surface_texture(&bound.surface);
            self.gl.destroy_texture(old);
            bound.texture = Some(texture);
            debug!("Recreated surface texture {:?} -> {:?}", old, texture);
        }
    }

    /// The only place the guest framebuffer is created or destroyed.
    /// Requesting the current mode again does nothing.
    fn set_scanout_mode(&mut self, target: Option<ScanoutTarget>) {
        match target {
            None => {
                let Mode::Scanout(scanout) = std::mem::replace(&mut self.mode, Mode::Surface)
                else {
                    return;
                };
                debug!("Leaving scanout mode, texture {:?}", scanout.framebuffer.texture);
                if !scanout.framebuffer.framebuffer.is_none() {
                    self.gl.destroy_framebuffer(scanout.framebuffer.framebuffer);
                }
                self.recreate_surface_texture();
            }
            Some(target) => {
                let (framebuffer, attached) = match &self.mode {
                    Mode::Scanout(current) if !current.framebuffer.framebuffer.is_none() => {
                        let fb = current.framebuffer;
                        if fb.texture == target.texture
                            && (fb.width, fb.height) == target.backing
                            && current.y0_top == target.y0_top
                            && current.region == target.region
                        {
                            return;
                        }
                        (fb.framebuffer, fb.texture)
                    }
                    _ => {
                        debug!(
                            "Entering scanout mode, texture {:?} {}x{}",
                            target.texture, target.backing.0, target.backing.1
                        );
                        (self.gl.create_framebuffer(), TextureId::default())
                    }
                };

                if framebuffer.is_none() {
                    warn!("No framebuffer for scanout texture {:?}", target.texture);
                } else if attached != target.texture {
                    self.gl.attach_texture(framebuffer, target.texture);
                }

                self.mode = Mode::Scanout(Scanout {
                    framebuffer: GuestFramebuffer {
                        framebuffer,
                        texture: target.texture,
                        width: target.backing.0,
                        height: target.backing.1,
                    },
                    y0_top: target.y0_top,
                    region: target.region,
                });
            }
        }
        self.refresh_source_size();
    }

    /// Window pixel size changed.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
        self.recompute_viewport();
    }

    /// Replace the guest surface.
    pub fn switch(&mut self, surface: Rc<DisplaySurface>) -> Result<()> {
        debug!("switch {}x{}", surface.width(), surface.height());

        let resized = match &self.surface {
            Some(bound) => bound.surface.size() != surface.size(),
            None => true,
        };

        if self.shader.is_some() {
            self.window.make_current()?;
        }
        let old = self.surface.take().and_then(|bound| bound.texture);
        let texture = if self.shader.is_some() {
            let texture = self.gl.create_surface_texture(&surface);
            if let Some(old) = old {
                self.gl.destroy_texture(old);
            }
            Some(texture)
        } else {
            None
        };

        let (width, height) = surface.size();
        self.surface = Some(BoundSurface { surface, texture });

        if resized {
            self.events.push(DisplayEvent::ResizeWindow { width, height });
        }
        self.refresh_source_size();
        Ok(())
    }

    /// The guest touched `rect` of its surface.
    pub fn update(&mut self, rect: Rect) -> Result<()> {
        let (Some(_), Some(bound)) = (&self.shader, &self.surface) else {
            return Ok(());
        };
        let Some(texture) = bound.texture else {
            return Ok(());
        };

        self.window.make_current()?;
        let rect = bound.surface.clip(rect);
        if !rect.is_empty() {
            self.gl.update_surface_texture(texture, &bound.surface, rect);
        }
        self.pending_updates += 1;
        Ok(())
    }

    /// Periodic tick. Sets up the renderer once the window is realized, lets
    /// the guest push updates through `hw_update`, and falls back to surface
    /// mode if the guest drew to its CPU surface since the last tick.
    pub fn refresh<F>(&mut self, hw_update: F) -> Result<()>
    where
        F: FnOnce(&mut Self),
    {
        if self.shader.is_none() {
            if !self.window.is_realized() {
                return Ok(());
            }
            self.window.make_current()?;
            let shader = self.gl.init_shader().map_err(|e| {
                error!("Renderer setup failed: {}", e);
                e
            })?;
            self.shader = Some(shader);
            if let Some(bound) = self.surface.as_mut() {
                bound.texture = Some(self.gl.create_surface_texture(&bound.surface));
            }
            debug!("Renderer initialized");
        }

        hw_update(self);

        if self.pending_updates > 0 {
            self.pending_updates = 0;
            self.window.make_current()?;
            self.set_scanout_mode(None);
            self.request_redraw();
        }
        Ok(())
    }

    /// Present the current frame. Skips silently when there is nothing to
    /// present yet.
    pub fn draw(&mut self) -> Result<DrawOutcome> {
        self.redraw_queued = false;

        let Some(shader) = self.shader else {
            return Ok(DrawOutcome::Skipped(SkipReason::NoRenderer));
        };

        self.window.make_current()?;
        let target = self.window.draw_target();
        let (ww, wh) = self.window_size;

        match &self.mode {
            Mode::Scanout(scanout) => {
                let fb = scanout.framebuffer;
                if fb.framebuffer.is_none() {
                    return Ok(DrawOutcome::Skipped(SkipReason::NoFramebuffer));
                }

                let dst = self
                    .viewport
                    .map(|vp| vp.rect())
                    .unwrap_or_else(|| Rect::new(0, 0, ww as i32, wh as i32));
                let region = scanout.region;
                let (top, bottom) = (region.y, region.y + region.height);
                let (y0, y1) = if scanout.y0_top { (top, bottom) } else { (bottom, top) };
                let src = BlitRect {
                    x0: region.x,
                    y0,
                    x1: region.x + region.width,
                    y1,
                };
                let dst_corners = BlitRect {
                    x0: dst.x,
                    y0: dst.y,
                    x1: dst.x + dst.width,
                    y1: dst.y + dst.height,
                };

                self.gl.set_viewport(dst);
                self.gl
                    .blit(fb.framebuffer, target, src, dst_corners, Filter::Nearest);
            }
            Mode::Surface => {
                let Some(bound) = &self.surface else {
                    return Ok(DrawOutcome::Skipped(SkipReason::NoSurface));
                };
                let Some(texture) = bound.texture else {
                    return Ok(DrawOutcome::Skipped(SkipReason::NoSurface));
                };

                self.gl.set_viewport(Rect::new(0, 0, ww as i32, wh as i32));
                self.gl
                    .render_surface_texture(&shader, texture, &bound.surface, target, self.window_size);
            }
        }

        self.gl.flush();
        self.events.push(DisplayEvent::BufferConsumed);
        Ok(DrawOutcome::Presented)
    }

    /// Present a guest texture directly.
    pub fn scanout_texture(
        &mut self,
        texture: TextureId,
        y0_top: bool,
        backing_width: u32,
        backing_height: u32,
        region: Rect,
    ) -> Result<()> {
        self.window.make_current()?;
        self.apply_scanout(texture, y0_top, (backing_width, backing_height), region);
        Ok(())
    }

    fn apply_scanout(&mut self, texture: TextureId, y0_top: bool, backing: (u32, u32), region: Rect) {
        if texture.is_none() || region.is_empty() || backing.0 == 0 || backing.1 == 0 {
            debug!("Degenerate scanout {:?} {:?}, using surface", texture, region);
            self.set_scanout_mode(None);
            return;
        }
        self.set_scanout_mode(Some(ScanoutTarget {
            texture,
            backing,
            y0_top,
            region,
        }));
    }

    pub fn scanout_disable(&mut self) -> Result<()> {
        if matches!(self.mode, Mode::Scanout(_)) {
            self.window.make_current()?;
        }
        self.set_scanout_mode(None);
        Ok(())
    }

    /// The guest finished rendering into `_region` of the scanout texture.
    pub fn scanout_flush(&mut self, _region: Rect) {
        self.request_redraw();
    }

    /// Import an external buffer and scan it out. Import failure keeps the
    /// previous frame on screen.
    pub fn scanout_dmabuf(&mut self, dmabuf: &mut DmaBuf) -> Result<()> {
        self.window.make_current()?;

        let texture = match dmabuf.import_for(self.import_owner) {
            Some(texture) => texture,
            None => {
                if !dmabuf.is_valid() {
                    warn!("Ignoring invalid dmabuf descriptor fd {}", dmabuf.fd());
                    return Ok(());
                }
                match self.gl.import_dmabuf(dmabuf) {
                    Some(texture) if !texture.is_none() => {
                        debug!(
                            "Imported dmabuf fd {} {}x{} as {:?}",
                            dmabuf.fd(),
                            dmabuf.width,
                            dmabuf.height,
                            texture
                        );
                        dmabuf.cache_import(self.import_owner, texture);
                        texture
                    }
                    _ => {
                        warn!("Failed to import dmabuf fd {}", dmabuf.fd());
                        return Ok(());
                    }
                }
            }
        };

        let (width, height) = (dmabuf.width, dmabuf.height);
        self.apply_scanout(
            texture,
            false,
            (width, height),
            Rect::new(0, 0, width as i32, height as i32),
        );
        Ok(())
    }

    /// The buffer's owner is retiring it; drop this output's import. Imports
    /// made by other outputs are left alone.
    pub fn release_dmabuf(&mut self, dmabuf: &mut DmaBuf) -> Result<()> {
        if dmabuf.import_for(self.import_owner).is_none() {
            return Ok(());
        }
        self.window.make_current()?;
        let Some(texture) = dmabuf.take_import(self.import_owner) else {
            return Ok(());
        };

        if matches!(&self.mode, Mode::Scanout(scanout) if scanout.framebuffer.texture == texture) {
            self.set_scanout_mode(None);
        }
        self.gl.destroy_texture(texture);
        debug!("Released dmabuf texture {:?}", texture);
        Ok(())
    }

    pub fn create_context(&mut self, version: GlVersion) -> Result<ContextId> {
        self.window.make_current()?;
        let context = self.window.create_context(version).map_err(|e| {
            error!("{}", e);
            e
        })?;

        let id = ContextId(self.next_context);
        self.next_context += 1;
        self.contexts.insert(id, context);
        debug!("Created gl context {:?} ({}.{})", id, version.major, version.minor);
        Ok(id)
    }

    pub fn destroy_context(&mut self, id: ContextId) -> Result<()> {
        let context = self.contexts.remove(&id).ok_or(Error::UnknownContext(id))?;
        self.window.destroy_context(context);
        debug!("Destroyed gl context {:?}", id);
        Ok(())
    }

    pub fn make_context_current(&mut self, id: ContextId) -> Result<()> {
        let context = self.contexts.get(&id).ok_or(Error::UnknownContext(id))?;
        self.window.make_context_current(context)
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Err(e) = self.window.make_current() {
            warn!("Tearing down output without a current context: {}", e);
        }
        if let Some(texture) = self.surface.as_mut().and_then(|bound| bound.texture.take()) {
            self.gl.destroy_texture(texture);
        }
        self.set_scanout_mode(None);
        if let Some(shader) = self.shader.take() {
            self.gl.destroy_shader(shader);
        }
        for (_, context) in self.contexts.drain() {
            self.window.destroy_context(context);
        }
    }
}

impl<W: Window, G: GlBackend> Drop for Output<W, G> {
    fn drop(&mut self) {
        self.teardown();
    }
}
