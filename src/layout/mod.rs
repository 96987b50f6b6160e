mod builder;
mod table;

pub use builder::*;
pub use table::*;

use bitflags::bitflags;

/// Shader stage a binding slot is visible to.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex = 0,
    Pixel = 1,
    Domain = 2,
    Hull = 3,
    Geometry = 4,
    #[default]
    All = 5,
}

impl ShaderStage {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Vertex,
            1 => Self::Pixel,
            2 => Self::Domain,
            3 => Self::Hull,
            4 => Self::Geometry,
            5 => Self::All,
            _ => return None,
        })
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorType {
    /// Inline 32-bit constants.
    Constant = 0,
    RootSrv = 1,
    RootUav = 2,
    RootCbv = 3,
    Srv = 4,
    Uav = 5,
    Cbv = 6,
    Sampler = 7,
}

impl DescriptorType {
    /// Scalar kinds are bound directly on the pipeline layout rather than
    /// through a descriptor table.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            Self::Constant | Self::RootSrv | Self::RootUav | Self::RootCbv
        )
    }
}

bitflags! {
    /// Flags of a descriptor range or root descriptor.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DescriptorRangeFlags: u32 {
        const DESCRIPTORS_VOLATILE = 0x1;
        const DATA_VOLATILE = 0x2;
        const DATA_STATIC_WHILE_SET_AT_EXECUTE = 0x4;
        const DATA_STATIC = 0x8;
    }
}

impl DescriptorRangeFlags {
    /// The subset that a root descriptor can carry.
    pub const ROOT_DESCRIPTOR: Self = Self::DATA_VOLATILE
        .union(Self::DATA_STATIC_WHILE_SET_AT_EXECUTE)
        .union(Self::DATA_STATIC);
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipelineLayoutFlags: u8 {
        const ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT = 0x1;
        const DENY_VERTEX_SHADER_ROOT_ACCESS = 0x2;
        const DENY_HULL_SHADER_ROOT_ACCESS = 0x4;
        const DENY_DOMAIN_SHADER_ROOT_ACCESS = 0x8;
        const DENY_GEOMETRY_SHADER_ROOT_ACCESS = 0x10;
        const DENY_PIXEL_SHADER_ROOT_ACCESS = 0x20;
        const ALLOW_STREAM_OUTPUT = 0x40;
    }
}

/// One range record of a binding slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub ty: DescriptorType,
    /// Number of descriptors, or number of 32-bit values for [`DescriptorType::Constant`].
    pub num_descriptors: u32,
    pub base_binding: u32,
    pub space: u32,
    pub flags: DescriptorRangeFlags,
}

impl DescriptorRange {
    pub fn new(
        ty: DescriptorType,
        num_descriptors: u32,
        base_binding: u32,
        space: u32,
        flags: DescriptorRangeFlags,
    ) -> Self {
        Self {
            ty,
            num_descriptors,
            base_binding,
            space,
            flags,
        }
        .normalized()
    }

    /// A single shader resource view, such as a view of a whole texture.
    pub fn srv(base_binding: u32, space: u32) -> Self {
        Self::new(
            DescriptorType::Srv,
            1,
            base_binding,
            space,
            DescriptorRangeFlags::empty(),
        )
    }

    /// Canonical form of the range. Fields a kind cannot express are cleared
    /// so that equal bindings always produce equal keys.
    pub fn normalized(mut self) -> Self {
        match self.ty {
            DescriptorType::Constant => {
                self.flags = DescriptorRangeFlags::empty();
            }
            DescriptorType::RootSrv | DescriptorType::RootUav | DescriptorType::RootCbv => {
                self.num_descriptors = 1;
                self.flags &= DescriptorRangeFlags::ROOT_DESCRIPTOR;
            }
            _ => (),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_views_are_normalized() {
        let range = DescriptorRange::new(
            DescriptorType::RootCbv,
            7,
            2,
            0,
            DescriptorRangeFlags::DESCRIPTORS_VOLATILE | DescriptorRangeFlags::DATA_STATIC,
        );
        assert_eq!(range.num_descriptors, 1);
        assert_eq!(range.flags, DescriptorRangeFlags::DATA_STATIC);
    }

    #[test]
    fn constants_drop_flags() {
        let a = DescriptorRange::new(
            DescriptorType::Constant,
            4,
            0,
            0,
            DescriptorRangeFlags::DATA_VOLATILE,
        );
        let b = DescriptorRange::new(
            DescriptorType::Constant,
            4,
            0,
            0,
            DescriptorRangeFlags::empty(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn table_ranges_keep_everything() {
        let range = DescriptorRange::new(
            DescriptorType::Srv,
            4,
            1,
            2,
            DescriptorRangeFlags::DESCRIPTORS_VOLATILE,
        );
        assert_eq!(range.num_descriptors, 4);
        assert_eq!(range.flags, DescriptorRangeFlags::DESCRIPTORS_VOLATILE);
    }

    #[test]
    fn raw_round_trip_rejects_unknown() {
        assert_eq!(ShaderStage::from_raw(ShaderStage::Hull as u8), Some(ShaderStage::Hull));
        assert_eq!(ShaderStage::from_raw(6), None);
        assert!(DescriptorType::RootUav.is_scalar());
        assert!(!DescriptorType::Sampler.is_scalar());
    }
}
