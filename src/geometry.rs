/// A rectangle in window or surface pixels, origin at the lower-left for GL targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Corner-to-corner rectangle as taken by `glBlitFramebuffer`. The y pair may
/// be inverted to flip the copy vertically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

/// Where scaled guest content lands inside the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Content scale in logical pixels (device scale factor divided out).
    pub scale: f64,
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    /// Fit `source` into `window` preserving aspect ratio (letterbox/pillarbox).
    ///
    /// The caller guarantees non-zero source dimensions. A `scale_factor` of 0
    /// is treated as 1.
    pub fn fit(window: (u32, u32), source: (u32, u32), scale_factor: u32) -> Self {
        let (ww, wh) = (window.0 as f64, window.1 as f64);
        let (sw, sh) = (source.0 as f64, source.1 as f64);

        let (scale_x, scale_y) = (ww / sw, wh / sh);
        let scale = scale_x.min(scale_y);
        let width = (sw * scale) as i32;
        let height = (sh * scale) as i32;

        // Compare the ratios, not the truncated size, so a one pixel rounding
        // loss never flips the padded axis.
        let (offset_x, offset_y) = if scale_x > scale_y {
            ((window.0 as i32 - width) / 2, 0)
        } else {
            (0, (window.1 as i32 - height) / 2)
        };

        Self {
            scale: scale / scale_factor.max(1) as f64,
            offset_x,
            offset_y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.offset_x, self.offset_y, self.width, self.height)
    }

    pub fn blit_target(&self) -> BlitRect {
        BlitRect {
            x0: self.offset_x,
            y0: self.offset_y,
            x1: self.offset_x + self.width,
            y1: self.offset_y + self.height,
        }
    }
}
