use drm_fourcc::DrmFourcc;
use thiserror::Error;

use crate::backend::ContextId;
use crate::display::OutputId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Create gl context failed: {0}")]
    ContextCreation(String),

    #[error("Realize gl context failed: {0}")]
    ContextRealize(String),

    #[error("Failed to make gl context current: {0}")]
    MakeCurrent(String),

    #[error("Shader setup failed: {0}")]
    Shader(String),

    #[error("EGL error: {0}")]
    Egl(String),

    #[error("Unknown output {0}")]
    UnknownOutput(OutputId),

    #[error("Unknown gl context {0:?}")]
    UnknownContext(ContextId),

    #[error("Unsupported pixel format {0:?}")]
    UnsupportedFormat(DrmFourcc),

    #[error("Surface {width}x{height} with stride {stride} is too large")]
    SurfaceTooLarge { width: u32, height: u32, stride: u32 },

    #[error("Surface buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
