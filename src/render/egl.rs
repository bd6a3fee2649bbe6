use std::ffi::c_void;
use std::rc::Rc;

use khronos_egl as egl;
use log::{debug, warn};

use crate::backend::{FramebufferId, GlVersion, Window};
use crate::error::{Error, Result};

const EGL_OPENGL_ES3_BIT: egl::Int = 0x0040;

/// An initialized EGL display with a config suitable for GLES 3 pbuffers.
pub struct EglDisplay {
    pub egl: egl::DynamicInstance<egl::EGL1_5>,
    pub display: egl::Display,
    pub config: egl::Config,
}

impl EglDisplay {
    /// Open the platform's default display for off-screen rendering.
    pub fn new() -> Result<Self> {
        let egl = unsafe { egl::DynamicInstance::<egl::EGL1_5>::load_required() }
            .map_err(|e| Error::Egl(format!("Failed to load EGL: {}", e)))?;

        let display = unsafe { egl.get_display(std::ptr::null_mut()) }
            .ok_or_else(|| Error::Egl("Failed to get EGL display".into()))?;

        let (major, minor) = egl
            .initialize(display)
            .map_err(|e| Error::Egl(format!("Failed to initialize EGL: {}", e)))?;
        debug!("EGL {}.{} initialized", major, minor);

        let config_attribs = [
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::ALPHA_SIZE,
            8,
            egl::RENDERABLE_TYPE,
            EGL_OPENGL_ES3_BIT,
            egl::NONE,
        ];

        let config = egl
            .choose_first_config(display, &config_attribs)
            .map_err(|e| Error::Egl(format!("Failed to choose EGL config: {}", e)))?
            .ok_or_else(|| Error::Egl("No suitable EGL config found".into()))?;

        egl.bind_api(egl::OPENGL_ES_API)
            .map_err(|e| Error::Egl(format!("Failed to bind OpenGL ES API: {}", e)))?;

        Ok(Self {
            egl,
            display,
            config,
        })
    }

    pub fn create_context(
        &self,
        version: GlVersion,
        share: Option<egl::Context>,
    ) -> Result<egl::Context> {
        let context_attribs = [
            egl::CONTEXT_MAJOR_VERSION,
            version.major as egl::Int,
            egl::CONTEXT_MINOR_VERSION,
            version.minor as egl::Int,
            egl::NONE,
        ];

        self.egl
            .create_context(self.display, self.config, share, &context_attribs)
            .map_err(|e| Error::ContextCreation(e.to_string()))
    }

    pub fn destroy_context(&self, context: egl::Context) {
        if let Err(e) = self.egl.destroy_context(self.display, context) {
            warn!("Failed to destroy EGL context: {}", e);
        }
    }

    pub fn create_pbuffer(&self, width: u32, height: u32) -> Result<egl::Surface> {
        let attribs = [
            egl::WIDTH,
            width as egl::Int,
            egl::HEIGHT,
            height as egl::Int,
            egl::NONE,
        ];
        self.egl
            .create_pbuffer_surface(self.display, self.config, &attribs)
            .map_err(|e| Error::Egl(format!("Failed to create pbuffer surface: {}", e)))
    }

    pub fn make_current(
        &self,
        surface: Option<egl::Surface>,
        context: Option<egl::Context>,
    ) -> Result<(), egl::Error> {
        self.egl
            .make_current(self.display, surface, surface, context)
    }

    /// Load GL entry points. Needs a current context on some drivers.
    pub fn load_gl(&self) {
        gl::load_with(|s| {
            self.egl
                .get_proc_address(s)
                .map(|p| p as *const c_void)
                .unwrap_or(std::ptr::null())
        });
    }

    pub fn proc_address(&self, name: &str) -> Option<extern "system" fn()> {
        self.egl.get_proc_address(name)
    }
}

impl Drop for EglDisplay {
    fn drop(&mut self) {
        let _ = self.egl.make_current(self.display, None, None, None);
        let _ = self.egl.terminate(self.display);
    }
}

/// Bind a fresh context once so driver-side setup errors surface now
/// instead of on the guest's first make-current, then rebind the window's
/// own context. The context is destroyed if either step fails.
fn realize<C: Copy>(
    context: C,
    bind: impl FnOnce(C) -> Result<()>,
    restore: impl FnOnce() -> Result<()>,
    destroy: impl FnOnce(C),
) -> Result<C> {
    match bind(context).and_then(|()| restore()) {
        Ok(()) => Ok(context),
        Err(e) => {
            destroy(context);
            Err(e)
        }
    }
}

/// Off-screen drawable standing in for a toolkit GL widget.
pub struct EglWindow {
    display: Rc<EglDisplay>,
    surface: egl::Surface,
    context: egl::Context,
    width: u32,
    height: u32,
    scale_factor: u32,
}

impl EglWindow {
    pub fn new(
        display: Rc<EglDisplay>,
        width: u32,
        height: u32,
        version: GlVersion,
        scale_factor: u32,
    ) -> Result<Self> {
        let context = display.create_context(version, None)?;
        let surface = match display.create_pbuffer(width, height) {
            Ok(surface) => surface,
            Err(e) => {
                display.destroy_context(context);
                return Err(e);
            }
        };

        Ok(Self {
            display,
            surface,
            context,
            width,
            height,
            scale_factor,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn display(&self) -> &Rc<EglDisplay> {
        &self.display
    }
}

impl Window for EglWindow {
    type Context = egl::Context;

    fn is_realized(&self) -> bool {
        true
    }

    fn scale_factor(&self) -> u32 {
        self.scale_factor
    }

    fn make_current(&self) -> Result<()> {
        self.display
            .make_current(Some(self.surface), Some(self.context))
            .map_err(|e| Error::MakeCurrent(e.to_string()))
    }

    fn draw_target(&self) -> FramebufferId {
        FramebufferId::DEFAULT
    }

    fn create_context(&self, version: GlVersion) -> Result<egl::Context> {
        let context = self.display.create_context(version, Some(self.context))?;
        realize(
            context,
            |c| {
                self.display
                    .make_current(Some(self.surface), Some(c))
                    .map_err(|e| Error::ContextRealize(e.to_string()))
            },
            || self.make_current(),
            |c| self.display.destroy_context(c),
        )
    }

    fn destroy_context(&self, context: egl::Context) {
        self.display.destroy_context(context);
    }

    fn make_context_current(&self, context: &egl::Context) -> Result<()> {
        self.display
            .make_current(Some(self.surface), Some(*context))
            .map_err(|e| Error::MakeCurrent(e.to_string()))
    }
}

impl Drop for EglWindow {
    fn drop(&mut self) {
        let _ = self.display.make_current(None, None);
        let _ = self
            .display
            .egl
            .destroy_surface(self.display.display, self.surface);
        self.display.destroy_context(self.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_realize_keeps_bound_context() {
        let destroyed = RefCell::new(Vec::new());
        let ctx = realize(7, |_| Ok(()), || Ok(()), |c| destroyed.borrow_mut().push(c)).unwrap();
        assert_eq!(ctx, 7);
        assert!(destroyed.borrow().is_empty());
    }

    #[test]
    fn test_realize_destroys_context_on_failure() {
        let destroyed = RefCell::new(Vec::new());
        let err = realize(
            7,
            |_| Err(Error::ContextRealize("bad config".into())),
            || Ok(()),
            |c| destroyed.borrow_mut().push(c),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ContextRealize(_)));
        assert_eq!(*destroyed.borrow(), vec![7]);

        // bind worked but the window context could not be restored
        let err = realize(
            8,
            |_| Ok(()),
            || Err(Error::MakeCurrent("lost surface".into())),
            |c| destroyed.borrow_mut().push(c),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MakeCurrent(_)));
        assert_eq!(*destroyed.borrow(), vec![7, 8]);
    }
}
