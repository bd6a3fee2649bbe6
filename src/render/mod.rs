//! EGL/GLES implementations of the output seams.

pub mod egl;
pub mod gles;

pub use egl::{EglDisplay, EglWindow};
pub use gles::GlesBackend;
