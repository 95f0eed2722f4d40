//! Staging layouts.
//!
//! A [`StagingLayout`] splits one upload into *atoms*: contiguous byte ranges
//! that are read from the source data, placed into the staging area, and
//! copied into one region of the target. Buffers produce a single atom.
//! Images produce one atom per (layer, mip), layer-major, with every atom
//! starting on a [`STAGING_ALIGNMENT`] boundary in the staging area.

use crate::backend::ImageCopyRegion;
use crate::errors::{DeviceError, Result};
use crate::object::desc::ImageDesc;

/// Alignment of every atom inside a staging area.
pub const STAGING_ALIGNMENT: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;

/// Part of a target an upload writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CopyRange {
    Buffer {
        offset: u64,
        size: u64,
    },
    Image {
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    },
}

impl CopyRange {
    #[must_use]
    pub fn buffer(offset: u64, size: u64) -> Self {
        Self::Buffer { offset, size }
    }

    /// Every mip and layer of `image`.
    #[must_use]
    pub fn whole_image(image: &ImageDesc) -> Self {
        Self::Image {
            base_mip: 0,
            mip_count: image.mip_level_count,
            base_layer: 0,
            layer_count: image.array_layers,
        }
    }
}

/// Destination of one atom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AtomRegion {
    Buffer { dst_offset: u64 },
    Image(ImageCopyRegion),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StagingAtom {
    /// Offset of the atom's bytes in the source data.
    pub source_offset: u64,
    /// Offset of the atom's bytes in the staging area.
    pub staging_offset: u64,
    pub size: u64,
    pub region: AtomRegion,
}

impl StagingAtom {
    #[inline]
    #[must_use]
    pub fn staging_range(&self) -> std::ops::Range<usize> {
        self.staging_offset as usize..(self.staging_offset + self.size) as usize
    }

    #[inline]
    #[must_use]
    pub fn source_range(&self) -> std::ops::Range<usize> {
        self.source_offset as usize..(self.source_offset + self.size) as usize
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StagingLayout {
    pub atoms: Vec<StagingAtom>,
    /// Bytes the source data must provide.
    pub source_size: u64,
    /// Bytes of staging memory the upload needs.
    pub staging_size: u64,
}

impl StagingLayout {
    /// Single-atom layout writing `size` bytes at `offset` of a buffer of
    /// `buffer_size` bytes.
    pub fn buffer(buffer_size: u64, offset: u64, size: u64) -> Result<Self> {
        let end = offset
            .checked_add(size)
            .ok_or_else(|| DeviceError::InvalidCopyRange("buffer range overflows".into()))?;
        if size == 0 || end > buffer_size {
            return Err(DeviceError::InvalidCopyRange(format!(
                "bytes {offset}..{end} outside buffer of {buffer_size} bytes"
            )));
        }

        Ok(Self {
            atoms: vec![StagingAtom {
                source_offset: 0,
                staging_offset: 0,
                size,
                region: AtomRegion::Buffer { dst_offset: offset },
            }],
            source_size: size,
            staging_size: size,
        })
    }

    /// One atom per (layer, mip) of the selected image range. Source data is
    /// expected tightly packed in the same order.
    pub fn image(
        desc: &ImageDesc,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<Self> {
        let mips_fit = base_mip
            .checked_add(mip_count)
            .is_some_and(|end| end <= desc.mip_level_count);
        let layers_fit = base_layer
            .checked_add(layer_count)
            .is_some_and(|end| end <= desc.array_layers);
        if mip_count == 0 || layer_count == 0 || !mips_fit || !layers_fit {
            return Err(DeviceError::InvalidCopyRange(format!(
                "mips {base_mip}+{mip_count}, layers {base_layer}+{layer_count} outside image \
                 with {} mips and {} layers",
                desc.mip_level_count, desc.array_layers
            )));
        }
        if desc.sample_count > 1 {
            return Err(DeviceError::InvalidCopyRange(
                "multisampled images cannot be uploaded".into(),
            ));
        }

        let mut layout = Self::default();
        for layer in base_layer..base_layer + layer_count {
            for mip in base_mip..base_mip + mip_count {
                let (bytes_per_row, rows) = desc.mip_pitch(mip).ok_or_else(|| {
                    DeviceError::InvalidCopyRange(format!(
                        "format {:?} has no single copyable aspect",
                        desc.format
                    ))
                })?;
                let (width, height, depth) = desc.mip_extent(mip);
                let size = bytes_per_row * u64::from(rows) * u64::from(depth);

                let staging_offset = layout.staging_size.next_multiple_of(STAGING_ALIGNMENT);
                layout.atoms.push(StagingAtom {
                    source_offset: layout.source_size,
                    staging_offset,
                    size,
                    region: AtomRegion::Image(ImageCopyRegion {
                        mip,
                        layer,
                        width,
                        height,
                        depth,
                        bytes_per_row,
                        rows_per_image: rows,
                    }),
                });

                layout.source_size += size;
                layout.staging_size = staging_offset + size;
            }
        }

        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_layout() {
        let layout = StagingLayout::buffer(1024, 128, 64).unwrap();
        assert_eq!(layout.atoms.len(), 1);
        assert_eq!(layout.source_size, 64);
        assert_eq!(
            layout.atoms[0].region,
            AtomRegion::Buffer { dst_offset: 128 }
        );
    }

    #[test]
    fn test_buffer_layout_rejects_out_of_range() {
        assert!(StagingLayout::buffer(100, 90, 20).is_err());
        assert!(StagingLayout::buffer(100, 0, 0).is_err());
        assert!(StagingLayout::buffer(100, u64::MAX, 2).is_err());
    }

    #[test]
    fn test_image_layout_is_layer_major_and_aligned() {
        let desc = ImageDesc::new_2d(
            "layered",
            8,
            8,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::COPY_DST,
        )
        .with_mips(2)
        .with_layers(2);

        let layout = StagingLayout::image(&desc, 0, 2, 0, 2).unwrap();
        let order: Vec<_> = layout
            .atoms
            .iter()
            .map(|a| match a.region {
                AtomRegion::Image(r) => (r.layer, r.mip),
                AtomRegion::Buffer { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        // 8x8 rgba = 256 bytes, 4x4 = 64 bytes
        let sizes: Vec<_> = layout.atoms.iter().map(|a| a.size).collect();
        assert_eq!(sizes, vec![256, 64, 256, 64]);
        assert_eq!(layout.source_size, 640);

        for atom in &layout.atoms {
            assert_eq!(atom.staging_offset % STAGING_ALIGNMENT, 0);
        }
        assert_eq!(layout.atoms[1].staging_offset, 256);
        assert_eq!(layout.atoms[2].staging_offset, 512);
        assert_eq!(layout.staging_size, 768 + 64);
    }

    #[test]
    fn test_image_layout_rejects_bad_range() {
        let desc = ImageDesc::new_2d(
            "single",
            4,
            4,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::COPY_DST,
        );
        assert!(StagingLayout::image(&desc, 1, 1, 0, 1).is_err());
        assert!(StagingLayout::image(&desc.clone().with_samples(4), 0, 1, 0, 1).is_err());
        // ranges whose end does not fit in u32 are rejected, not wrapped
        assert!(StagingLayout::image(&desc, u32::MAX, 1, 0, 1).is_err());
        assert!(StagingLayout::image(&desc, 0, 1, 1, u32::MAX).is_err());
    }
}
