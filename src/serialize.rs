//! Versioned binary encoding of a whole pipeline layout.
//!
//! This is the portable serialization facility a [`LayoutDevice`](crate::LayoutDevice)
//! uses by default. The encoding is little-endian:
//!
//! ```text
//! magic "BSLT" | version u8 | flags u8 | parameter count u16
//! per parameter: tag u8 | stage u8 | payload
//! ```
//!
//! Version 1.0 has no room for range or root descriptor flags.

use smallvec::SmallVec;
use thiserror::Error;

use crate::layout::{
    DescriptorRangeFlags, DescriptorTableLayout, PipelineLayoutFlags, RootParameter, RootViewType,
    ShaderStage, TableRange, TableRangeType,
};

const MAGIC: &[u8; 4] = b"BSLT";

/// Upper bound on the total [`RootParameter::cost`] of one layout.
pub const MAX_ROOT_COST: u32 = 64;

const TAG_EMPTY: u8 = 0;
const TAG_CONSTANTS: u8 = 1;
const TAG_ROOT_VIEW: u8 = 2;
const TAG_TABLE: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayoutVersion {
    V1_0,
    V1_1,
}

impl LayoutVersion {
    fn to_raw(self) -> u8 {
        match self {
            Self::V1_0 => 0x10,
            Self::V1_1 => 0x11,
        }
    }
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x10 => Some(Self::V1_0),
            0x11 => Some(Self::V1_1),
            _ => None,
        }
    }
    fn has_flags(self) -> bool {
        self >= Self::V1_1
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("pipeline layout costs {cost} 32-bit words, the limit is {MAX_ROOT_COST}")]
    TooLarge { cost: u32 },
    #[error("descriptor table in slot {slot} mixes samplers with other descriptors")]
    MixedSamplerTable { slot: usize },
    #[error("{0} parameters do not fit in a pipeline layout")]
    TooManyParameters(usize),
    #[error("serialized layout is truncated")]
    Truncated,
    #[error("serialized layout has a bad magic number")]
    BadMagic,
    #[error("unknown layout version {0:#x}")]
    UnknownVersion(u8),
    #[error("invalid {what} {value} at byte {offset}")]
    InvalidValue {
        what: &'static str,
        value: u8,
        offset: usize,
    },
    #[error("{0} trailing bytes after the serialized layout")]
    TrailingBytes(usize),
    #[error("{0}")]
    Backend(String),
}

/// Aggregate description of a pipeline layout: one parameter per slot, in
/// slot order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    pub flags: PipelineLayoutFlags,
    pub parameters: Vec<DescriptorTableLayout>,
}

impl PipelineLayoutDesc {
    pub fn cost(&self) -> u32 {
        self.parameters
            .iter()
            .fold(0u32, |cost, layout| cost.saturating_add(layout.parameter.cost()))
    }

    pub fn validate(&self) -> Result<(), SerializationError> {
        if self.parameters.len() > u16::MAX as usize {
            return Err(SerializationError::TooManyParameters(self.parameters.len()));
        }
        let cost = self.cost();
        if cost > MAX_ROOT_COST {
            return Err(SerializationError::TooLarge { cost });
        }
        for (slot, layout) in self.parameters.iter().enumerate() {
            if let RootParameter::Table { ranges } = &layout.parameter {
                let samplers = ranges
                    .iter()
                    .filter(|range| range.ty == TableRangeType::Sampler)
                    .count();
                if samplers != 0 && samplers != ranges.len() {
                    return Err(SerializationError::MixedSamplerTable { slot });
                }
            }
        }
        Ok(())
    }
}

/// Output of the serialization facility, ready to be realized by a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedLayout {
    version: LayoutVersion,
    bytes: Vec<u8>,
}

impl SerializedLayout {
    /// Wraps bytes produced elsewhere, checking the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationError> {
        let mut reader = Reader::new(&bytes);
        let version = reader.header()?;
        Ok(Self { version, bytes })
    }
    pub fn version(&self) -> LayoutVersion {
        self.version
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
    pub fn decode(&self) -> Result<PipelineLayoutDesc, SerializationError> {
        deserialize(&self.bytes)
    }
}

pub fn serialize(
    desc: &PipelineLayoutDesc,
    version: LayoutVersion,
) -> Result<SerializedLayout, SerializationError> {
    desc.validate()?;
    let flags_dropped = !version.has_flags()
        && desc.parameters.iter().any(|layout| match &layout.parameter {
            RootParameter::RootView { flags, .. } => !flags.is_empty(),
            RootParameter::Table { ranges } => ranges.iter().any(|r| !r.flags.is_empty()),
            _ => false,
        });
    if flags_dropped {
        tracing::debug!(?version, "range flags dropped by layout version");
    }

    let mut out = Vec::with_capacity(8 + desc.parameters.len() * 16);
    out.extend_from_slice(MAGIC);
    out.push(version.to_raw());
    out.push(desc.flags.bits());
    out.extend_from_slice(&(desc.parameters.len() as u16).to_le_bytes());

    let put = |out: &mut Vec<u8>, value: u32| out.extend_from_slice(&value.to_le_bytes());
    for layout in desc.parameters.iter() {
        match &layout.parameter {
            RootParameter::Empty => {
                out.extend_from_slice(&[TAG_EMPTY, layout.visibility as u8]);
            }
            RootParameter::Constants {
                num_32bit_values,
                binding,
                space,
            } => {
                out.extend_from_slice(&[TAG_CONSTANTS, layout.visibility as u8]);
                put(&mut out, *num_32bit_values);
                put(&mut out, *binding);
                put(&mut out, *space);
            }
            RootParameter::RootView {
                ty,
                binding,
                space,
                flags,
            } => {
                out.extend_from_slice(&[TAG_ROOT_VIEW, layout.visibility as u8]);
                out.push(root_view_to_raw(*ty));
                put(&mut out, *binding);
                put(&mut out, *space);
                if version.has_flags() {
                    put(&mut out, flags.bits());
                }
            }
            RootParameter::Table { ranges } => {
                out.extend_from_slice(&[TAG_TABLE, layout.visibility as u8]);
                put(&mut out, ranges.len() as u32);
                for range in ranges.iter() {
                    out.push(table_range_to_raw(range.ty));
                    put(&mut out, range.num_descriptors);
                    put(&mut out, range.base_binding);
                    put(&mut out, range.space);
                    if version.has_flags() {
                        put(&mut out, range.flags.bits());
                    }
                }
            }
        }
    }
    Ok(SerializedLayout {
        version,
        bytes: out,
    })
}

pub fn deserialize(bytes: &[u8]) -> Result<PipelineLayoutDesc, SerializationError> {
    let mut reader = Reader::new(bytes);
    let version = reader.header()?;
    let flags = PipelineLayoutFlags::from_bits_retain(reader.u8()?);
    let count = reader.u16()? as usize;

    let mut parameters = Vec::with_capacity(count);
    for _ in 0..count {
        let tag_offset = reader.pos;
        let tag = reader.u8()?;
        let stage_offset = reader.pos;
        let stage = reader.u8()?;
        let visibility =
            ShaderStage::from_raw(stage).ok_or(SerializationError::InvalidValue {
                what: "shader stage",
                value: stage,
                offset: stage_offset,
            })?;
        let parameter = match tag {
            TAG_EMPTY => RootParameter::Empty,
            TAG_CONSTANTS => RootParameter::Constants {
                num_32bit_values: reader.u32()?,
                binding: reader.u32()?,
                space: reader.u32()?,
            },
            TAG_ROOT_VIEW => {
                let offset = reader.pos;
                let raw = reader.u8()?;
                let ty = root_view_from_raw(raw).ok_or(SerializationError::InvalidValue {
                    what: "root view type",
                    value: raw,
                    offset,
                })?;
                RootParameter::RootView {
                    ty,
                    binding: reader.u32()?,
                    space: reader.u32()?,
                    flags: reader.flags(version)?,
                }
            }
            TAG_TABLE => {
                let len = reader.u32()?;
                let mut ranges = SmallVec::new();
                for _ in 0..len {
                    let offset = reader.pos;
                    let raw = reader.u8()?;
                    let ty =
                        table_range_from_raw(raw).ok_or(SerializationError::InvalidValue {
                            what: "descriptor range type",
                            value: raw,
                            offset,
                        })?;
                    ranges.push(TableRange {
                        ty,
                        num_descriptors: reader.u32()?,
                        base_binding: reader.u32()?,
                        space: reader.u32()?,
                        flags: reader.flags(version)?,
                    });
                }
                RootParameter::Table { ranges }
            }
            _ => {
                return Err(SerializationError::InvalidValue {
                    what: "parameter tag",
                    value: tag,
                    offset: tag_offset,
                })
            }
        };
        parameters.push(DescriptorTableLayout {
            visibility,
            parameter,
        });
    }
    let trailing = bytes.len() - reader.pos;
    if trailing != 0 {
        return Err(SerializationError::TrailingBytes(trailing));
    }
    Ok(PipelineLayoutDesc { flags, parameters })
}

fn root_view_to_raw(ty: RootViewType) -> u8 {
    match ty {
        RootViewType::Srv => 0,
        RootViewType::Uav => 1,
        RootViewType::Cbv => 2,
    }
}

fn root_view_from_raw(raw: u8) -> Option<RootViewType> {
    match raw {
        0 => Some(RootViewType::Srv),
        1 => Some(RootViewType::Uav),
        2 => Some(RootViewType::Cbv),
        _ => None,
    }
}

fn table_range_to_raw(ty: TableRangeType) -> u8 {
    match ty {
        TableRangeType::Srv => 0,
        TableRangeType::Uav => 1,
        TableRangeType::Cbv => 2,
        TableRangeType::Sampler => 3,
    }
}

fn table_range_from_raw(raw: u8) -> Option<TableRangeType> {
    match raw {
        0 => Some(TableRangeType::Srv),
        1 => Some(TableRangeType::Uav),
        2 => Some(TableRangeType::Cbv),
        3 => Some(TableRangeType::Sampler),
        _ => None,
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }
    fn take<const N: usize>(&mut self) -> Result<[u8; N], SerializationError> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(SerializationError::Truncated)?;
        self.pos = end;
        let mut out = [0; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
    fn u8(&mut self) -> Result<u8, SerializationError> {
        Ok(self.take::<1>()?[0])
    }
    fn u16(&mut self) -> Result<u16, SerializationError> {
        Ok(u16::from_le_bytes(self.take()?))
    }
    fn u32(&mut self) -> Result<u32, SerializationError> {
        Ok(u32::from_le_bytes(self.take()?))
    }
    fn flags(&mut self, version: LayoutVersion) -> Result<DescriptorRangeFlags, SerializationError> {
        if version.has_flags() {
            Ok(DescriptorRangeFlags::from_bits_retain(self.u32()?))
        } else {
            Ok(DescriptorRangeFlags::empty())
        }
    }
    fn header(&mut self) -> Result<LayoutVersion, SerializationError> {
        if &self.take::<4>()? != MAGIC {
            return Err(SerializationError::BadMagic);
        }
        let raw = self.u8()?;
        LayoutVersion::from_raw(raw).ok_or(SerializationError::UnknownVersion(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DescriptorType, PipelineLayoutBuilder};

    fn desc_of(builder: &PipelineLayoutBuilder, flags: PipelineLayoutFlags) -> PipelineLayoutDesc {
        PipelineLayoutDesc {
            flags,
            parameters: builder
                .descriptor_table_layout_keys()
                .iter()
                .map(DescriptorTableLayout::from_key)
                .collect(),
        }
    }

    fn blur_layout() -> PipelineLayoutBuilder {
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_constants(0, 3, 0, 0, ShaderStage::Pixel)
            .set_range(1, DescriptorType::Srv, 2, 0, 0, DescriptorRangeFlags::DATA_STATIC)
            .set_shader_stage(1, ShaderStage::Pixel)
            .set_range(2, DescriptorType::Sampler, 1, 0, 0, DescriptorRangeFlags::empty())
            .set_shader_stage(2, ShaderStage::Pixel)
            .set_root_cbv(3, 1, 0, DescriptorRangeFlags::DATA_VOLATILE, ShaderStage::All)
            .set_shader_stage(5, ShaderStage::Vertex);
        builder
    }

    #[test]
    fn decode_restores_v1_1_layout() {
        let desc = desc_of(&blur_layout(), PipelineLayoutFlags::DENY_HULL_SHADER_ROOT_ACCESS);
        let serialized = serialize(&desc, LayoutVersion::V1_1).unwrap();
        assert_eq!(serialized.version(), LayoutVersion::V1_1);
        assert_eq!(&serialized.as_bytes()[..4], MAGIC);
        assert_eq!(serialized.decode().unwrap(), desc);
    }

    #[test]
    fn v1_0_drops_flags() {
        let desc = desc_of(&blur_layout(), PipelineLayoutFlags::empty());
        let decoded = serialize(&desc, LayoutVersion::V1_0)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(decoded.parameters.len(), desc.parameters.len());
        let RootParameter::Table { ranges } = &decoded.parameters[1].parameter else {
            panic!("slot 1 should be a table");
        };
        assert!(ranges[0].flags.is_empty());
        let RootParameter::RootView { flags, .. } = &decoded.parameters[3].parameter else {
            panic!("slot 3 should be a root view");
        };
        assert!(flags.is_empty());
    }

    #[test]
    fn rejects_oversized_layout() {
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_constants(0, 61, 0, 0, ShaderStage::All)
            .set_root_srv(1, 0, 0, DescriptorRangeFlags::empty(), ShaderStage::All)
            .set_root_uav(2, 0, 0, DescriptorRangeFlags::empty(), ShaderStage::All);
        let err = serialize(&desc_of(&builder, PipelineLayoutFlags::empty()), LayoutVersion::V1_1)
            .unwrap_err();
        assert_eq!(err, SerializationError::TooLarge { cost: 65 });
    }

    #[test]
    fn rejects_mixed_sampler_table() {
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_range(0, DescriptorType::Cbv, 1, 0, 0, DescriptorRangeFlags::empty())
            .set_range(1, DescriptorType::Srv, 1, 0, 0, DescriptorRangeFlags::empty())
            .set_range(1, DescriptorType::Sampler, 1, 0, 0, DescriptorRangeFlags::empty());
        let err = serialize(&desc_of(&builder, PipelineLayoutFlags::empty()), LayoutVersion::V1_1)
            .unwrap_err();
        assert_eq!(err, SerializationError::MixedSamplerTable { slot: 1 });
    }

    #[test]
    fn malformed_input() {
        assert_eq!(
            SerializedLayout::from_bytes(b"NOPE\x11".to_vec()).unwrap_err(),
            SerializationError::BadMagic
        );
        assert_eq!(
            SerializedLayout::from_bytes(b"BSLT\x42".to_vec()).unwrap_err(),
            SerializationError::UnknownVersion(0x42)
        );
        assert_eq!(
            deserialize(b"BSLT\x11\x00\x01\x00\x01\x05\x04").unwrap_err(),
            SerializationError::Truncated
        );
        assert_eq!(
            deserialize(b"BSLT\x11\x00\x01\x00\x09\x05").unwrap_err(),
            SerializationError::InvalidValue {
                what: "parameter tag",
                value: 9,
                offset: 8
            }
        );
        assert_eq!(
            deserialize(b"BSLT\x11\x00\x00\x00\xff").unwrap_err(),
            SerializationError::TrailingBytes(1)
        );
    }
}
