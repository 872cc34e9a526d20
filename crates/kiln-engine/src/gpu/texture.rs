use crate::error::{RenderError, RenderResult};

/// Row pitch alignment of a copyable texture footprint, in bytes.
pub const ROW_PITCH_ALIGNMENT: u32 = 256;

/// Alignment of each subresource inside a copyable footprint, in bytes.
pub const PLACEMENT_ALIGNMENT: u64 = 512;

/// Texel formats understood by the pipeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rg8Unorm,
    R8Unorm,
    Rgb10a2Unorm,
    R32Float,
}

impl TextureFormat {
    /// Bytes per texel.
    pub const fn pixel_size(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Rgb10a2Unorm
            | TextureFormat::R32Float => 4,
            TextureFormat::Rg8Unorm => 2,
            TextureFormat::R8Unorm => 1,
        }
    }

    /// Encodes a linear RGBA color into one texel of this format.
    ///
    /// Returns `None` for formats the clear path does not support.
    pub fn encode_color(self, color: [f32; 4]) -> Option<Vec<u8>> {
        let [r, g, b, a] = color.map(unorm8);
        match self {
            TextureFormat::Rgba8Unorm => Some(vec![r, g, b, a]),
            TextureFormat::Bgra8Unorm => Some(vec![b, g, r, a]),
            TextureFormat::Rg8Unorm => Some(vec![r, g]),
            TextureFormat::R8Unorm => Some(vec![r]),
            TextureFormat::R32Float => Some(color[0].to_le_bytes().to_vec()),
            TextureFormat::Rgb10a2Unorm => None,
        }
    }
}

/// Converts a normalized float channel to an 8-bit unorm value (round half up).
pub fn unorm8(channel: f32) -> u8 {
    (channel.clamp(0.0, 1.0) * f32::from(u8::MAX) + 0.5) as u8
}

/// Block compression applied by the content pipeline. Carried as metadata only.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum CompressionMode {
    None,
    Hardware,
    #[default]
    HardwareWithDithering,
}

/// Plain-value description of a texture.
///
/// Subresources are indexed array-major: `array_slice * mip_count + mip`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TextureInfo {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub array_count: u32,
    pub is_cubemap: bool,
    pub compression: CompressionMode,
}

impl TextureInfo {
    pub const MAX_ARRAY_COUNT: u32 = u8::MAX as u32;
    pub const MAX_DIMENSION: u32 = 16384;

    /// A single-mip 2D texture.
    pub fn new(format: TextureFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            mip_count: 1,
            array_count: 1,
            is_cubemap: false,
            compression: CompressionMode::None,
        }
    }

    /// A square texture with a full mip chain.
    pub fn square(format: TextureFormat, size: u32) -> Self {
        Self::new(format, size, size).with_full_mips()
    }

    pub fn with_full_mips(mut self) -> Self {
        self.mip_count = full_mip_count(self.width.max(self.height));
        self
    }

    pub fn with_array(mut self, array_count: u32) -> Self {
        self.array_count = array_count;
        self
    }

    /// Marks the texture as a cube map (six faces per cube).
    pub fn cubemap(mut self, cube_count: u32) -> Self {
        self.is_cubemap = true;
        self.array_count = cube_count * 6;
        self
    }

    pub fn with_compression(mut self, compression: CompressionMode) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::usage("texture has zero size"));
        }
        if self.width > Self::MAX_DIMENSION || self.height > Self::MAX_DIMENSION {
            return Err(RenderError::usage(format!(
                "texture {}x{} exceeds the {} texel limit",
                self.width,
                self.height,
                Self::MAX_DIMENSION
            )));
        }
        if self.array_count == 0 || self.array_count > Self::MAX_ARRAY_COUNT {
            return Err(RenderError::usage(format!(
                "texture array count {} outside 1..={}",
                self.array_count,
                Self::MAX_ARRAY_COUNT
            )));
        }
        let max_mips = full_mip_count(self.width.max(self.height));
        if self.mip_count == 0 || self.mip_count > max_mips {
            return Err(RenderError::usage(format!(
                "texture mip count {} outside 1..={max_mips}",
                self.mip_count
            )));
        }
        if self.is_cubemap && self.array_count % 6 != 0 {
            return Err(RenderError::usage("cube map array count must be a multiple of 6"));
        }
        Ok(())
    }

    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    pub fn subresource_index(&self, mip: u32, array_slice: u32) -> u32 {
        array_slice * self.mip_count + mip
    }

    /// Tightly packed size of one mip level of one array slice.
    pub fn packed_mip_size(&self, mip: u32) -> u64 {
        let (w, h) = self.mip_extent(mip);
        u64::from(w) * u64::from(h) * u64::from(self.format.pixel_size())
    }

    /// Tightly packed size of one array slice including its mip chain.
    ///
    /// This is the layout callers hand to `write_texture`.
    pub fn packed_slice_size(&self) -> u64 {
        (0..self.mip_count).map(|mip| self.packed_mip_size(mip)).sum()
    }

    /// Copyable layout of one array slice (all mips) inside a linear buffer.
    pub fn slice_layout(&self) -> SliceLayout {
        let pixel = self.format.pixel_size();
        let mut footprints = Vec::with_capacity(self.mip_count as usize);
        let mut offset = 0u64;
        for mip in 0..self.mip_count {
            let (width, height) = self.mip_extent(mip);
            let packed_row_size = width * pixel;
            let row_pitch = align_up(u64::from(packed_row_size), u64::from(ROW_PITCH_ALIGNMENT)) as u32;
            footprints.push(SubresourceFootprint {
                mip_level: mip,
                offset,
                width,
                height,
                row_pitch,
                packed_row_size,
            });
            offset = align_up(offset + u64::from(row_pitch) * u64::from(height), PLACEMENT_ALIGNMENT);
        }
        SliceLayout {
            footprints,
            size: offset,
        }
    }
}

/// Placement of one mip level inside a linear staging or readback buffer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SubresourceFootprint {
    pub mip_level: u32,
    /// Byte offset relative to the start of the array slice.
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
    pub packed_row_size: u32,
}

impl SubresourceFootprint {
    pub fn size(&self) -> u64 {
        u64::from(self.row_pitch) * u64::from(self.height)
    }

    pub fn shifted(mut self, base: u64) -> Self {
        self.offset += base;
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SliceLayout {
    pub footprints: Vec<SubresourceFootprint>,
    /// Total bytes of one slice, padded to the placement alignment.
    pub size: u64,
}

impl SliceLayout {
    /// Re-pitches tightly packed mip data into this layout.
    ///
    /// `dst` must be at least `self.size` bytes; `src` must hold every mip level
    /// packed back to back.
    pub fn scatter_rows(&self, src: &[u8], dst: &mut [u8]) {
        let mut cursor = 0usize;
        for fp in &self.footprints {
            let row = fp.packed_row_size as usize;
            for y in 0..fp.height as usize {
                let at = fp.offset as usize + y * fp.row_pitch as usize;
                dst[at..at + row].copy_from_slice(&src[cursor..cursor + row]);
                cursor += row;
            }
        }
    }

    /// Inverse of [`scatter_rows`](Self::scatter_rows): packs pitched rows back together.
    pub fn gather_rows(&self, src: &[u8], dst: &mut [u8]) {
        let mut cursor = 0usize;
        for fp in &self.footprints {
            let row = fp.packed_row_size as usize;
            for y in 0..fp.height as usize {
                let at = fp.offset as usize + y * fp.row_pitch as usize;
                dst[cursor..cursor + row].copy_from_slice(&src[at..at + row]);
                cursor += row;
            }
        }
    }
}

pub fn full_mip_count(extent: u32) -> u32 {
    u32::BITS - extent.max(1).leading_zeros()
}

pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mip_chain_counts_down_to_one_texel() {
        assert_eq!(full_mip_count(1), 1);
        assert_eq!(full_mip_count(2), 2);
        assert_eq!(full_mip_count(512), 10);
        assert_eq!(full_mip_count(300), 9);
        assert_eq!(TextureInfo::square(TextureFormat::Rgba8Unorm, 512).mip_count, 10);
    }

    #[test]
    fn footprints_align_row_pitch_and_placement() {
        let info = TextureInfo::square(TextureFormat::R8Unorm, 16);
        let layout = info.slice_layout();
        assert_eq!(layout.footprints.len(), 5);
        for fp in &layout.footprints {
            assert_eq!(fp.row_pitch % ROW_PITCH_ALIGNMENT, 0);
            assert_eq!(fp.offset % PLACEMENT_ALIGNMENT, 0);
        }
        // 16 rows of 256 bytes, then the next mip starts on a 512 boundary.
        assert_eq!(layout.footprints[0].size(), 16 * 256);
        assert_eq!(layout.footprints[1].offset, 4096);
        assert_eq!(layout.footprints[4].width, 1);
        assert_eq!(layout.size % PLACEMENT_ALIGNMENT, 0);
    }

    #[test]
    fn scatter_rows_places_each_row_at_its_pitch() {
        let info = TextureInfo::new(TextureFormat::Rg8Unorm, 2, 2);
        let layout = info.slice_layout();
        let src: Vec<u8> = (1..=8).collect();
        let mut dst = vec![0u8; layout.size as usize];
        layout.scatter_rows(&src, &mut dst);
        assert_eq!(&dst[0..4], &[1, 2, 3, 4]);
        assert!(dst[4..256].iter().all(|&b| b == 0));
        assert_eq!(&dst[256..260], &[5, 6, 7, 8]);
    }

    #[test]
    fn subresource_index_is_array_major() {
        let info = TextureInfo::square(TextureFormat::Rgba8Unorm, 8).with_array(3);
        assert_eq!(info.mip_count, 4);
        assert_eq!(info.subresource_index(0, 0), 0);
        assert_eq!(info.subresource_index(2, 1), 6);
        assert_eq!(info.subresource_index(3, 2), 11);
    }

    #[test]
    fn validate_rejects_bad_descriptions() {
        assert!(TextureInfo::new(TextureFormat::R8Unorm, 0, 4).validate().is_err());
        assert!(TextureInfo::new(TextureFormat::R8Unorm, 4, 4).with_array(0).validate().is_err());
        let mut too_many_mips = TextureInfo::new(TextureFormat::R8Unorm, 4, 4);
        too_many_mips.mip_count = 4;
        assert!(too_many_mips.validate().is_err());
        let mut broken_cube = TextureInfo::square(TextureFormat::R8Unorm, 4).cubemap(1);
        broken_cube.array_count = 5;
        assert!(broken_cube.validate().is_err());
        assert!(TextureInfo::square(TextureFormat::R8Unorm, 4).cubemap(2).validate().is_ok());
    }

    #[test]
    fn color_encoding_rounds_half_up() {
        assert_eq!(unorm8(0.2), 51);
        assert_eq!(unorm8(1.0), 255);
        assert_eq!(unorm8(-1.0), 0);
        assert_eq!(
            TextureFormat::Bgra8Unorm.encode_color([1.0, 0.5, 0.0, 1.0]),
            Some(vec![0, 128, 255, 255])
        );
        assert_eq!(TextureFormat::Rgb10a2Unorm.encode_color([0.0; 4]), None);
    }
}
