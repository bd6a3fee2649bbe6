use std::cell::{Ref, RefCell, RefMut};

use drm_fourcc::DrmFourcc;

use crate::error::{Error, Result};
use crate::geometry::Rect;

/// Byte order of a 32-bit guest pixel as seen by a GL upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOrder {
    /// Bytes in memory are [B, G, R, A/X]
    Bgra,
    /// Bytes in memory are [R, G, B, A/X]
    Rgba,
}

/// Map a DRM fourcc to the byte order used for texture upload.
///
/// DRM names describe the little-endian 32-bit word, so `XRGB8888` is
/// stored as [B, G, R, X].
pub fn upload_order(format: DrmFourcc) -> Option<UploadOrder> {
    match format {
        DrmFourcc::Xrgb8888 | DrmFourcc::Argb8888 => Some(UploadOrder::Bgra),
        DrmFourcc::Xbgr8888 | DrmFourcc::Abgr8888 => Some(UploadOrder::Rgba),
        _ => None,
    }
}

/// The guest's CPU-side framebuffer.
///
/// Shared with the guest through `Rc`; the guest writes pixels and then
/// reports the dirty area with an update.
#[derive(Debug)]
pub struct DisplaySurface {
    width: u32,
    height: u32,
    stride: u32,
    format: DrmFourcc,
    data: RefCell<Vec<u8>>,
}

impl DisplaySurface {
    pub const BYTES_PER_PIXEL: u32 = 4;

    /// Allocate a zeroed surface with a tightly packed stride.
    pub fn new(width: u32, height: u32, format: DrmFourcc) -> Result<Self> {
        let too_large = |stride| Error::SurfaceTooLarge {
            width,
            height,
            stride,
        };
        let stride = width
            .checked_mul(Self::BYTES_PER_PIXEL)
            .ok_or_else(|| too_large(0))?;
        let len = (stride as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| too_large(stride))?;
        Self::from_data(vec![0u8; len], width, height, stride, format)
    }

    /// Wrap existing pixel data. `stride` may include row padding.
    pub fn from_data(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
        format: DrmFourcc,
    ) -> Result<Self> {
        if upload_order(format).is_none() {
            return Err(Error::UnsupportedFormat(format));
        }

        let too_large = Error::SurfaceTooLarge {
            width,
            height,
            stride,
        };
        let row = (width as usize)
            .checked_mul(Self::BYTES_PER_PIXEL as usize)
            .filter(|row| u32::try_from(*row).is_ok())
            .ok_or(too_large)?;
        // The last row needs no padding.
        let needed = match (height as usize).checked_sub(1) {
            None => 0,
            Some(rows) => (stride as usize)
                .checked_mul(rows)
                .and_then(|n| n.checked_add(row))
                .ok_or(Error::SurfaceTooLarge {
                    width,
                    height,
                    stride,
                })?,
        };
        if (stride as usize) < row || data.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            stride,
            format,
            data: RefCell::new(data),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> DrmFourcc {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> Ref<'_, Vec<u8>> {
        self.data.borrow()
    }

    pub fn pixels_mut(&self) -> RefMut<'_, Vec<u8>> {
        self.data.borrow_mut()
    }

    /// Byte offset of pixel (x, y).
    pub fn offset_of(&self, x: u32, y: u32) -> usize {
        y as usize * self.stride as usize + x as usize * Self::BYTES_PER_PIXEL as usize
    }

    /// Clamp `rect` to the surface bounds. Any guest-supplied rect is
    /// accepted, including ones whose far edge overflows `i32`.
    pub fn clip(&self, rect: Rect) -> Rect {
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        let x0 = i64::from(rect.x).clamp(0, w);
        let y0 = i64::from(rect.y).clamp(0, h);
        let x1 = (i64::from(rect.x) + i64::from(rect.width)).clamp(x0, w);
        let y1 = (i64::from(rect.y) + i64::from(rect.height)).clamp(y0, h);
        Rect::new(x0 as i32, y0 as i32, (x1 - x0) as i32, (y1 - y0) as i32)
    }

    /// Fill a rectangle with one 32-bit pixel value in the surface's byte order.
    pub fn fill(&self, rect: Rect, pixel: [u8; 4]) {
        let rect = self.clip(rect);
        let mut data = self.data.borrow_mut();
        for y in rect.y..rect.y + rect.height {
            let start = self.offset_of(rect.x as u32, y as u32);
            let end = start + rect.width as usize * Self::BYTES_PER_PIXEL as usize;
            for px in data[start..end].chunks_exact_mut(4) {
                px.copy_from_slice(&pixel);
            }
        }
    }
}
