use smallvec::SmallVec;

use super::{DescriptorRangeFlags, DescriptorTableLayoutKey, DescriptorType, ShaderStage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RootViewType {
    Srv,
    Uav,
    Cbv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableRangeType {
    Srv,
    Uav,
    Cbv,
    Sampler,
}

impl TableRangeType {
    fn from_descriptor_type(ty: DescriptorType) -> Option<Self> {
        match ty {
            DescriptorType::Srv => Some(Self::Srv),
            DescriptorType::Uav => Some(Self::Uav),
            DescriptorType::Cbv => Some(Self::Cbv),
            DescriptorType::Sampler => Some(Self::Sampler),
            _ => None,
        }
    }
}

/// One sub-range of a descriptor table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TableRange {
    pub ty: TableRangeType,
    pub num_descriptors: u32,
    pub base_binding: u32,
    pub space: u32,
    pub flags: DescriptorRangeFlags,
}

/// How a slot is bound on the pipeline layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RootParameter {
    /// A slot that was never given a range.
    Empty,
    Constants {
        num_32bit_values: u32,
        binding: u32,
        space: u32,
    },
    RootView {
        ty: RootViewType,
        binding: u32,
        space: u32,
        flags: DescriptorRangeFlags,
    },
    Table {
        ranges: SmallVec<[TableRange; 2]>,
    },
}

impl RootParameter {
    /// Size of the parameter in the pipeline layout, in 32-bit words.
    pub fn cost(&self) -> u32 {
        match self {
            Self::Constants {
                num_32bit_values, ..
            } => *num_32bit_values,
            Self::RootView { .. } => 2,
            Self::Empty | Self::Table { .. } => 1,
        }
    }
}

/// The resolved layout of one binding slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorTableLayout {
    pub visibility: ShaderStage,
    pub parameter: RootParameter,
}

impl DescriptorTableLayout {
    /// Decodes a slot key. The first range decides between a scalar binding
    /// and a descriptor table.
    pub fn from_key(key: &DescriptorTableLayoutKey) -> Self {
        let Some(first) = key.ranges.first() else {
            return Self {
                visibility: key.stage,
                parameter: RootParameter::Empty,
            };
        };
        let root_view = |ty| RootParameter::RootView {
            ty,
            binding: first.base_binding,
            space: first.space,
            flags: first.flags,
        };
        let parameter = match first.ty {
            DescriptorType::Constant => RootParameter::Constants {
                num_32bit_values: first.num_descriptors,
                binding: first.base_binding,
                space: first.space,
            },
            DescriptorType::RootSrv => root_view(RootViewType::Srv),
            DescriptorType::RootUav => root_view(RootViewType::Uav),
            DescriptorType::RootCbv => root_view(RootViewType::Cbv),
            _ => RootParameter::Table {
                ranges: key
                    .ranges
                    .iter()
                    .filter_map(|range| {
                        let Some(ty) = TableRangeType::from_descriptor_type(range.ty) else {
                            tracing::warn!(
                                ty = ?range.ty,
                                base_binding = range.base_binding,
                                "scalar range inside a descriptor table ignored"
                            );
                            return None;
                        };
                        Some(TableRange {
                            ty,
                            num_descriptors: range.num_descriptors,
                            base_binding: range.base_binding,
                            space: range.space,
                            flags: range.flags,
                        })
                    })
                    .collect(),
            },
        };
        Self {
            visibility: key.stage,
            parameter,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parameter == RootParameter::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineLayoutBuilder;

    #[test]
    fn empty_key_is_degenerate_layout() {
        let layout = DescriptorTableLayout::from_key(&DescriptorTableLayoutKey::default());
        assert!(layout.is_empty());
        assert_eq!(layout.visibility, ShaderStage::All);
    }

    #[test]
    fn decodes_constants() {
        let mut builder = PipelineLayoutBuilder::new();
        builder.set_constants(0, 4, 1, 2, ShaderStage::Vertex);
        let layout = DescriptorTableLayout::from_key(&builder.descriptor_table_layout_keys()[0]);
        assert_eq!(layout.visibility, ShaderStage::Vertex);
        assert_eq!(
            layout.parameter,
            RootParameter::Constants {
                num_32bit_values: 4,
                binding: 1,
                space: 2
            }
        );
        assert_eq!(layout.parameter.cost(), 4);
    }

    #[test]
    fn decodes_root_view() {
        let mut builder = PipelineLayoutBuilder::new();
        builder.set_root_uav(0, 3, 0, DescriptorRangeFlags::DATA_VOLATILE, ShaderStage::All);
        let layout = DescriptorTableLayout::from_key(&builder.descriptor_table_layout_keys()[0]);
        assert_eq!(
            layout.parameter,
            RootParameter::RootView {
                ty: RootViewType::Uav,
                binding: 3,
                space: 0,
                flags: DescriptorRangeFlags::DATA_VOLATILE
            }
        );
    }

    #[test]
    fn decodes_multi_range_table() {
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_range(0, DescriptorType::Srv, 4, 0, 0, DescriptorRangeFlags::empty())
            .set_range(0, DescriptorType::Uav, 1, 0, 0, DescriptorRangeFlags::empty())
            .set_shader_stage(0, ShaderStage::Pixel);
        let layout = DescriptorTableLayout::from_key(&builder.descriptor_table_layout_keys()[0]);
        let RootParameter::Table { ranges } = &layout.parameter else {
            panic!("expected a descriptor table, got {:?}", layout.parameter);
        };
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].ty, TableRangeType::Srv);
        assert_eq!(ranges[0].num_descriptors, 4);
        assert_eq!(ranges[1].ty, TableRangeType::Uav);
    }
}
