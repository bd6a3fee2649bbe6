//! GL scanout and present core for virtual machine display outputs.
//!
//! A display loop registers one [`Output`] per guest console and forwards
//! guest and window events to it. Each output presents either the guest's
//! CPU framebuffer (surface mode) or a GPU texture the guest rendered
//! directly (scanout mode), letterboxed into its window.

pub mod backend;
pub mod config;
pub mod display;
pub mod dmabuf;
pub mod error;
pub mod geometry;
pub mod output;
pub mod render;
pub mod surface;

pub use backend::{ContextId, Filter, FramebufferId, GlBackend, GlVersion, ShaderState, TextureId, Window};
pub use config::DisplayConfig;
pub use display::{Display, OutputId};
pub use dmabuf::{DmaBuf, ImportOwner};
pub use error::{Error, Result};
pub use geometry::{BlitRect, Rect, Viewport};
pub use output::{DisplayEvent, DrawOutcome, GuestFramebuffer, ModeKind, Output, SkipReason};
pub use surface::DisplaySurface;
