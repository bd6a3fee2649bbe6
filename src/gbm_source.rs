use anyhow::{Context, Result};
use drm_fourcc::DrmFourcc;
use gbm::{BufferObject, BufferObjectFlags, Device};
use std::fs::{File, OpenOptions};
use std::path::Path;

use gl_scanout::dmabuf::DRM_FORMAT_MOD_LINEAR;
use gl_scanout::render::{EglWindow, GlesBackend};
use gl_scanout::{DmaBuf, Output, Rect};

/// A linear GBM buffer exported as a dmabuf, standing in for a 3D guest's
/// scanout buffer.
pub struct GbmScanout {
    pub dmabuf: DmaBuf,
    _bo: BufferObject<()>,
    _device: Device<File>,
}

impl GbmScanout {
    pub fn allocate(render_node: &Path, width: u32, height: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(render_node)
            .with_context(|| format!("Failed to open {}", render_node.display()))?;

        let device = Device::new(file).context("Failed to create GBM device")?;
        let bo = device
            .create_buffer_object::<()>(
                width,
                height,
                DrmFourcc::Xrgb8888,
                BufferObjectFlags::RENDERING | BufferObjectFlags::LINEAR,
            )
            .context("Failed to allocate GBM buffer")?;

        let fd = bo
            .fd()
            .map_err(|e| anyhow::anyhow!("Failed to export dmabuf: {:?}", e))?;
        let dmabuf = DmaBuf::new(fd, width, height, bo.stride(), DrmFourcc::Xrgb8888)
            .with_modifier(DRM_FORMAT_MOD_LINEAR);

        Ok(Self {
            dmabuf,
            _bo: bo,
            _device: device,
        })
    }

    pub fn region(&self) -> Rect {
        Rect::new(0, 0, self.dmabuf.width as i32, self.dmabuf.height as i32)
    }

    /// Draw into the buffer the way a GPU guest would: on the GPU, no copy.
    pub fn render(&self, output: &mut Output<EglWindow, GlesBackend>, frame: u64) {
        let Some(texture) = output.imported_texture(&self.dmabuf) else {
            return;
        };
        let phase = (frame % 120) as f32 / 120.0;
        output.gl_mut().clear_texture(
            texture,
            self.dmabuf.width,
            self.dmabuf.height,
            [phase, 0.3, 1.0 - phase, 1.0],
        );
    }
}
