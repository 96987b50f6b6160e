use crate::layout::{DescriptorRange, DescriptorRangeFlags, DescriptorType};

/// Dimension of a shader resource view over a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    Texture2D,
    Texture2DArray,
    Texture2DMs,
    TextureCube,
    TextureCubeArray,
    Texture3D,
}

/// Shape of a texture resource, decided once when the texture is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureShape {
    Texture2D {
        width: u32,
        height: u32,
        /// Number of cubes for cube maps, number of slices otherwise.
        array_size: u32,
        mip_levels: u8,
        sample_count: u8,
        cube_map: bool,
    },
    Texture3D {
        width: u32,
        height: u32,
        depth: u32,
        mip_levels: u8,
    },
}

impl TextureShape {
    /// A depth above one selects a volume texture; array size, sample count
    /// and cube map are ignored for those.
    pub fn new(
        width: u32,
        height: u32,
        depth: u32,
        array_size: u32,
        mip_levels: u8,
        sample_count: u8,
        cube_map: bool,
    ) -> Self {
        let mip_levels = mip_levels.max(1);
        if depth > 1 {
            Self::Texture3D {
                width,
                height,
                depth,
                mip_levels,
            }
        } else {
            Self::Texture2D {
                width,
                height,
                array_size: array_size.max(1),
                mip_levels,
                sample_count: sample_count.max(1),
                cube_map,
            }
        }
    }

    pub fn mip_levels(&self) -> u8 {
        match self {
            Self::Texture2D { mip_levels, .. } | Self::Texture3D { mip_levels, .. } => *mip_levels,
        }
    }

    pub fn view_dimension(&self) -> ViewDimension {
        match *self {
            Self::Texture3D { .. } => ViewDimension::Texture3D,
            Self::Texture2D {
                cube_map: true,
                array_size,
                ..
            } => {
                if array_size > 1 {
                    ViewDimension::TextureCubeArray
                } else {
                    ViewDimension::TextureCube
                }
            }
            Self::Texture2D { sample_count, .. } if sample_count > 1 => ViewDimension::Texture2DMs,
            Self::Texture2D { array_size, .. } => {
                if array_size > 1 {
                    ViewDimension::Texture2DArray
                } else {
                    ViewDimension::Texture2D
                }
            }
        }
    }

    /// Number of subresources, one per mip of every slice or cube face.
    /// Volume textures have one per mip.
    pub fn subresource_count(&self) -> u64 {
        match *self {
            Self::Texture2D {
                array_size,
                mip_levels,
                cube_map,
                ..
            } => {
                let faces = if cube_map { 6 } else { 1 };
                array_size as u64 * faces * mip_levels as u64
            }
            Self::Texture3D { mip_levels, .. } => mip_levels as u64,
        }
    }

    /// The range of one view per mip level, as used when each level is
    /// sampled separately.
    pub fn srv_level_range(&self, base_binding: u32, space: u32) -> DescriptorRange {
        DescriptorRange::new(
            DescriptorType::Srv,
            self.mip_levels() as u32,
            base_binding,
            space,
            DescriptorRangeFlags::empty(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ShaderStage;
    use crate::PipelineLayoutBuilder;

    #[test]
    fn depth_selects_volume() {
        let shape = TextureShape::new(64, 64, 16, 4, 3, 1, true);
        assert_eq!(
            shape,
            TextureShape::Texture3D {
                width: 64,
                height: 64,
                depth: 16,
                mip_levels: 3
            }
        );
        assert_eq!(shape.view_dimension(), ViewDimension::Texture3D);
        assert_eq!(shape.subresource_count(), 3);
    }

    #[test]
    fn cube_maps_count_faces() {
        let cube = TextureShape::new(256, 256, 1, 1, 9, 1, true);
        assert_eq!(cube.view_dimension(), ViewDimension::TextureCube);
        assert_eq!(cube.subresource_count(), 6 * 9);
        let cubes = TextureShape::new(256, 256, 1, 2, 1, 1, true);
        assert_eq!(cubes.view_dimension(), ViewDimension::TextureCubeArray);
        assert_eq!(cubes.subresource_count(), 12);
    }

    #[test]
    fn huge_arrays_count_without_overflow() {
        let shape = TextureShape::new(16, 16, 1, u32::MAX, 255, 1, true);
        assert_eq!(shape.subresource_count(), u32::MAX as u64 * 6 * 255);
    }

    #[test]
    fn plain_2d() {
        let shape = TextureShape::new(1280, 720, 1, 0, 0, 0, false);
        assert_eq!(shape.view_dimension(), ViewDimension::Texture2D);
        assert_eq!(shape.mip_levels(), 1);
        assert_eq!(shape.subresource_count(), 1);
        assert_eq!(
            TextureShape::new(8, 8, 1, 3, 2, 1, false).view_dimension(),
            ViewDimension::Texture2DArray
        );
        assert_eq!(
            TextureShape::new(8, 8, 1, 1, 1, 4, false).view_dimension(),
            ViewDimension::Texture2DMs
        );
    }

    #[test]
    fn srv_ranges_describe_slots() {
        let shape = TextureShape::new(512, 512, 1, 1, 10, 1, false);
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_descriptor_range(0, DescriptorRange::srv(2, 0))
            .set_shader_stage(0, ShaderStage::Pixel)
            .set_descriptor_range(1, shape.srv_level_range(0, 1));
        let keys = builder.descriptor_table_layout_keys();
        assert_eq!(keys[0].ranges[0].num_descriptors, 1);
        assert_eq!(keys[0].ranges[0].base_binding, 2);
        assert_eq!(keys[1].ranges[0].num_descriptors, 10);
        assert_eq!(keys[1].ranges[0].space, 1);
        assert_eq!(keys[1].stage, ShaderStage::All);
    }
}
