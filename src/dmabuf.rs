use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use drm_fourcc::DrmFourcc;

use crate::backend::TextureId;

/// Linear modifier (no tiling)
pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
/// Modifier left to the driver
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// Identifies the output whose GL context holds an imported texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImportOwner(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Import {
    pub(crate) owner: ImportOwner,
    pub(crate) texture: TextureId,
}

/// A single-plane GPU buffer exported by another process or driver.
///
/// The owner keeps the fd alive. Each output that scans the buffer out
/// imports it into its own context; those textures are cached in the
/// descriptor until the owner releases the buffer on that output.
#[derive(Debug)]
pub struct DmaBuf {
    fd: OwnedFd,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub offset: u32,
    pub fourcc: DrmFourcc,
    pub modifier: u64,
    imports: Vec<Import>,
}

impl DmaBuf {
    pub fn new(fd: OwnedFd, width: u32, height: u32, stride: u32, fourcc: DrmFourcc) -> Self {
        Self {
            fd,
            width,
            height,
            stride,
            offset: 0,
            fourcc,
            modifier: DRM_FORMAT_MOD_INVALID,
            imports: Vec::new(),
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_modifier(mut self, modifier: u64) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Whether any output still holds an import of this buffer.
    pub fn is_imported(&self) -> bool {
        !self.imports.is_empty()
    }

    pub(crate) fn import_for(&self, owner: ImportOwner) -> Option<TextureId> {
        self.imports
            .iter()
            .find(|import| import.owner == owner)
            .map(|import| import.texture)
    }

    pub(crate) fn cache_import(&mut self, owner: ImportOwner, texture: TextureId) {
        self.imports.retain(|import| import.owner != owner);
        self.imports.push(Import { owner, texture });
    }

    pub(crate) fn take_import(&mut self, owner: ImportOwner) -> Option<TextureId> {
        let index = self.imports.iter().position(|import| import.owner == owner)?;
        Some(self.imports.swap_remove(index).texture)
    }

    /// Cheap sanity check before handing the descriptor to the driver.
    pub fn is_valid(&self) -> bool {
        self.fd.as_raw_fd() >= 0 && self.width > 0 && self.height > 0 && self.stride > 0
    }

    /// Split the modifier into the hi/lo halves EGL expects.
    pub fn modifier_parts(&self) -> Option<(u32, u32)> {
        if self.modifier == DRM_FORMAT_MOD_INVALID {
            None
        } else {
            Some(((self.modifier >> 32) as u32, self.modifier as u32))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn some_fd() -> OwnedFd {
        File::open("/dev/null").unwrap().into()
    }

    #[test]
    fn test_validity() {
        let buf = DmaBuf::new(some_fd(), 64, 32, 256, DrmFourcc::Xrgb8888);
        assert!(buf.is_valid());
        assert!(!buf.is_imported());

        let buf = DmaBuf::new(some_fd(), 0, 32, 256, DrmFourcc::Xrgb8888);
        assert!(!buf.is_valid());
    }

    #[test]
    fn test_modifier_parts() {
        let buf = DmaBuf::new(some_fd(), 64, 32, 256, DrmFourcc::Xrgb8888);
        assert_eq!(buf.modifier_parts(), None);

        let buf = buf.with_modifier(0x0100_0000_0000_0001);
        assert_eq!(buf.modifier_parts(), Some((0x0100_0000, 1)));

        let buf = buf.with_modifier(DRM_FORMAT_MOD_LINEAR);
        assert_eq!(buf.modifier_parts(), Some((0, 0)));
    }

    #[test]
    fn test_imports_are_kept_per_owner() {
        let mut buf = DmaBuf::new(some_fd(), 64, 32, 256, DrmFourcc::Xrgb8888);
        let (a, b) = (ImportOwner(1), ImportOwner(2));

        buf.cache_import(a, TextureId(7));
        assert_eq!(buf.import_for(a), Some(TextureId(7)));
        assert_eq!(buf.import_for(b), None);

        buf.cache_import(b, TextureId(7));
        assert_eq!(buf.take_import(a), Some(TextureId(7)));
        assert_eq!(buf.take_import(a), None);
        assert!(buf.is_imported());
        assert_eq!(buf.take_import(b), Some(TextureId(7)));
        assert!(!buf.is_imported());
    }
}
