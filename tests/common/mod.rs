//! Recording mock of the window and GL seams.
//!
//! Every call is logged, and live GL objects are tracked so tests can catch
//! leaks and double frees.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::File;
use std::rc::Rc;

use drm_fourcc::DrmFourcc;
use gl_scanout::{
    BlitRect, DisplaySurface, DmaBuf, Error, Filter, FramebufferId, GlBackend, GlVersion, Rect,
    Result, ShaderState, TextureId, Window,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    MakeCurrent,
    InitShader,
    DestroyShader,
    CreateTexture(TextureId),
    UpdateTexture(TextureId, Rect),
    DestroyTexture(TextureId),
    RenderSurface {
        texture: TextureId,
        target: FramebufferId,
        window: (u32, u32),
    },
    CreateFramebuffer(FramebufferId),
    AttachTexture(FramebufferId, TextureId),
    DestroyFramebuffer(FramebufferId),
    Viewport(Rect),
    Blit {
        read: FramebufferId,
        draw: FramebufferId,
        src: BlitRect,
        dst: BlitRect,
        filter: Filter,
    },
    Flush,
    ImportDmabuf(TextureId),
    CreateContext(u32, GlVersion),
    DestroyContext(u32),
    MakeContextCurrent(u32),
}

pub struct Recorder {
    pub calls: Vec<Call>,
    next_name: u32,
    pub realized: bool,
    pub scale_factor: u32,
    pub fail_shader: bool,
    pub empty_framebuffer: bool,
    pub fail_import: bool,
    pub fail_context: bool,
    pub textures: HashSet<TextureId>,
    // freed texture names, handed out again like a GL driver does
    freed_textures: Vec<u32>,
    pub framebuffers: HashSet<FramebufferId>,
    pub contexts: HashSet<u32>,
    pub shader_alive: bool,
}

impl Recorder {
    fn new() -> Self {
        Self {
            calls: Vec::new(),
            next_name: 1,
            realized: true,
            scale_factor: 1,
            fail_shader: false,
            empty_framebuffer: false,
            fail_import: false,
            fail_context: false,
            textures: HashSet::new(),
            freed_textures: Vec::new(),
            framebuffers: HashSet::new(),
            contexts: HashSet::new(),
            shader_alive: false,
        }
    }

    fn name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    /// Calls since the last take, without the make-current noise.
    pub fn take_gl_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .filter(|c| *c != Call::MakeCurrent)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn nothing_alive(&self) -> bool {
        self.textures.is_empty()
            && self.framebuffers.is_empty()
            && self.contexts.is_empty()
            && !self.shader_alive
    }
}

pub type Shared = Rc<RefCell<Recorder>>;

pub struct MockWindow(pub Shared);
pub struct MockGl(pub Shared);

pub fn mock() -> (Shared, MockWindow, MockGl) {
    let shared = Rc::new(RefCell::new(Recorder::new()));
    (shared.clone(), MockWindow(shared.clone()), MockGl(shared))
}

pub fn surface(width: u32, height: u32) -> Rc<DisplaySurface> {
    Rc::new(DisplaySurface::new(width, height, DrmFourcc::Xrgb8888).unwrap())
}

pub fn dmabuf(width: u32, height: u32) -> DmaBuf {
    let fd = File::open("/dev/null").unwrap().into();
    DmaBuf::new(fd, width, height, width * 4, DrmFourcc::Xrgb8888)
}

impl Window for MockWindow {
    type Context = u32;

    fn is_realized(&self) -> bool {
        self.0.borrow().realized
    }

    fn scale_factor(&self) -> u32 {
        self.0.borrow().scale_factor
    }

    fn make_current(&self) -> Result<()> {
        self.0.borrow_mut().calls.push(Call::MakeCurrent);
        Ok(())
    }

    fn draw_target(&self) -> FramebufferId {
        FramebufferId::DEFAULT
    }

    fn create_context(&self, version: GlVersion) -> Result<u32> {
        let mut rec = self.0.borrow_mut();
        if rec.fail_context {
            return Err(Error::ContextCreation("no suitable config".into()));
        }
        let name = rec.name();
        rec.contexts.insert(name);
        rec.calls.push(Call::CreateContext(name, version));
        Ok(name)
    }

    fn destroy_context(&self, context: u32) {
        let mut rec = self.0.borrow_mut();
        assert!(rec.contexts.remove(&context), "double free of context {}", context);
        rec.calls.push(Call::DestroyContext(context));
    }

    fn make_context_current(&self, context: &u32) -> Result<()> {
        self.0.borrow_mut().calls.push(Call::MakeContextCurrent(*context));
        Ok(())
    }
}

impl GlBackend for MockGl {
    fn init_shader(&mut self) -> Result<ShaderState> {
        let mut rec = self.0.borrow_mut();
        if rec.fail_shader {
            return Err(Error::Shader("compile error".into()));
        }
        rec.shader_alive = true;
        rec.calls.push(Call::InitShader);
        Ok(ShaderState {
            program: 1,
            vao: 2,
            vbo: 3,
        })
    }

    fn destroy_shader(&mut self, _shader: ShaderState) {
        let mut rec = self.0.borrow_mut();
        assert!(rec.shader_alive, "shader destroyed twice");
        rec.shader_alive = false;
        rec.calls.push(Call::DestroyShader);
    }

    fn create_surface_texture(&mut self, _surface: &DisplaySurface) -> TextureId {
        let mut rec = self.0.borrow_mut();
        let name = match rec.freed_textures.pop() {
            Some(name) => name,
            None => rec.name(),
        };
        let texture = TextureId(name);
        rec.textures.insert(texture);
        rec.calls.push(Call::CreateTexture(texture));
        texture
    }

    fn update_surface_texture(&mut self, texture: TextureId, _surface: &DisplaySurface, rect: Rect) {
        let mut rec = self.0.borrow_mut();
        assert!(rec.textures.contains(&texture), "update of dead texture");
        rec.calls.push(Call::UpdateTexture(texture, rect));
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        let mut rec = self.0.borrow_mut();
        assert!(rec.textures.remove(&texture), "double free of {:?}", texture);
        rec.freed_textures.push(texture.0);
        rec.calls.push(Call::DestroyTexture(texture));
    }

    fn render_surface_texture(
        &mut self,
        _shader: &ShaderState,
        texture: TextureId,
        _surface: &DisplaySurface,
        target: FramebufferId,
        window: (u32, u32),
    ) {
        self.0.borrow_mut().calls.push(Call::RenderSurface {
            texture,
            target,
            window,
        });
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let mut rec = self.0.borrow_mut();
        let fb = if rec.empty_framebuffer {
            FramebufferId(0)
        } else {
            FramebufferId(rec.name())
        };
        if !fb.is_none() {
            rec.framebuffers.insert(fb);
        }
        rec.calls.push(Call::CreateFramebuffer(fb));
        fb
    }

    fn attach_texture(&mut self, framebuffer: FramebufferId, texture: TextureId) {
        let mut rec = self.0.borrow_mut();
        assert!(rec.framebuffers.contains(&framebuffer));
        assert!(rec.textures.contains(&texture), "attach of dead texture");
        rec.calls.push(Call::AttachTexture(framebuffer, texture));
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        let mut rec = self.0.borrow_mut();
        assert!(
            rec.framebuffers.remove(&framebuffer),
            "double free of {:?}",
            framebuffer
        );
        rec.calls.push(Call::DestroyFramebuffer(framebuffer));
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.0.borrow_mut().calls.push(Call::Viewport(rect));
    }

    fn blit(
        &mut self,
        read: FramebufferId,
        draw: FramebufferId,
        src: BlitRect,
        dst: BlitRect,
        filter: Filter,
    ) {
        self.0.borrow_mut().calls.push(Call::Blit {
            read,
            draw,
            src,
            dst,
            filter,
        });
    }

    fn flush(&mut self) {
        self.0.borrow_mut().calls.push(Call::Flush);
    }

    fn import_dmabuf(&mut self, _dmabuf: &DmaBuf) -> Option<TextureId> {
        let mut rec = self.0.borrow_mut();
        if rec.fail_import {
            return None;
        }
        let texture = TextureId(rec.name());
        rec.textures.insert(texture);
        rec.calls.push(Call::ImportDmabuf(texture));
        Some(texture)
    }
}

/// A guest scanout texture owned by the mock GL, as virgl would hand over.
pub fn guest_texture(shared: &Shared) -> TextureId {
    let mut rec = shared.borrow_mut();
    let texture = TextureId(rec.name());
    rec.textures.insert(texture);
    texture
}
