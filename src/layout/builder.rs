use std::sync::Arc;

use smallvec::SmallVec;

use super::{DescriptorRange, DescriptorRangeFlags, DescriptorType, PipelineLayoutFlags, ShaderStage};
use crate::cache::{CacheId, PipelineLayout, PipelineLayoutCache, PipelineLayoutError, PipelineLayoutKey};
use crate::{DescriptorTableLayout, LayoutDevice};

/// Structural key of one binding slot: its visibility and its ordered ranges.
///
/// Keys compare by value. Two slots described with the same stage and the
/// same ranges in the same order are the same key, no matter which builder
/// produced them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DescriptorTableLayoutKey {
    pub stage: ShaderStage,
    pub ranges: SmallVec<[DescriptorRange; 2]>,
}

impl DescriptorTableLayoutKey {
    /// A slot without ranges is unset.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
    /// Root constants or a root view, as opposed to a descriptor table.
    pub fn is_scalar(&self) -> bool {
        self.ranges.first().is_some_and(|range| range.ty.is_scalar())
    }
}

/// Describes a pipeline layout slot by slot.
///
/// Describing is cheap and can be repeated every frame. The expensive part,
/// resolving the description to layout objects, happens in
/// [`PipelineLayoutCache`] and is memoized here until the next mutation.
#[derive(Clone, Debug, Default)]
pub struct PipelineLayoutBuilder {
    keys: Vec<DescriptorTableLayoutKey>,
    pipeline_layout_key: PipelineLayoutKey,
    /// Cache that produced the table ids in `pipeline_layout_key`.
    /// `None` whenever the description changed since.
    resolved_by: Option<CacheId>,
}

impl PipelineLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_shader_stage(&mut self, index: u32, stage: ShaderStage) -> &mut Self {
        self.slot_mut(index).stage = stage;
        self
    }

    /// Appends a range to the slot. Calling this repeatedly on one slot
    /// builds a multi-range descriptor table.
    ///
    /// Scalar kinds ([`DescriptorType::is_scalar`]) must be the only range
    /// of their slot. This is not checked.
    pub fn set_range(
        &mut self,
        index: u32,
        ty: DescriptorType,
        num_descriptors: u32,
        base_binding: u32,
        space: u32,
        flags: DescriptorRangeFlags,
    ) -> &mut Self {
        let range = DescriptorRange::new(ty, num_descriptors, base_binding, space, flags);
        self.slot_mut(index).ranges.push(range);
        self
    }

    /// Appends a prepared range to the slot, see [`Self::set_range`].
    pub fn set_descriptor_range(&mut self, index: u32, range: DescriptorRange) -> &mut Self {
        self.slot_mut(index).ranges.push(range.normalized());
        self
    }

    pub fn set_constants(
        &mut self,
        index: u32,
        num_32bit_values: u32,
        binding: u32,
        space: u32,
        stage: ShaderStage,
    ) -> &mut Self {
        self.set_range(
            index,
            DescriptorType::Constant,
            num_32bit_values,
            binding,
            space,
            DescriptorRangeFlags::empty(),
        )
        .set_shader_stage(index, stage)
    }

    pub fn set_root_srv(
        &mut self,
        index: u32,
        binding: u32,
        space: u32,
        flags: DescriptorRangeFlags,
        stage: ShaderStage,
    ) -> &mut Self {
        self.set_range(index, DescriptorType::RootSrv, 1, binding, space, flags)
            .set_shader_stage(index, stage)
    }

    pub fn set_root_uav(
        &mut self,
        index: u32,
        binding: u32,
        space: u32,
        flags: DescriptorRangeFlags,
        stage: ShaderStage,
    ) -> &mut Self {
        self.set_range(index, DescriptorType::RootUav, 1, binding, space, flags)
            .set_shader_stage(index, stage)
    }

    pub fn set_root_cbv(
        &mut self,
        index: u32,
        binding: u32,
        space: u32,
        flags: DescriptorRangeFlags,
        stage: ShaderStage,
    ) -> &mut Self {
        self.set_range(index, DescriptorType::RootCbv, 1, binding, space, flags)
            .set_shader_stage(index, stage)
    }

    pub fn descriptor_table_layout_keys(&self) -> &[DescriptorTableLayoutKey] {
        &self.keys
    }

    pub fn num_slots(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key of the whole pipeline layout. Resolves every slot through the
    /// cache the first time, after a mutation, or when called with a
    /// different cache than last time, so this may create table layouts.
    pub fn pipeline_layout_key<D: LayoutDevice>(
        &mut self,
        cache: &mut PipelineLayoutCache<D>,
    ) -> &PipelineLayoutKey {
        self.resolve(cache)
    }

    pub(crate) fn resolve<D: LayoutDevice>(
        &mut self,
        cache: &mut PipelineLayoutCache<D>,
    ) -> &mut PipelineLayoutKey {
        if self.resolved_by != Some(cache.id()) {
            let tables = self
                .keys
                .iter()
                .map(|key| cache.descriptor_table_layout_id(key))
                .collect();
            self.pipeline_layout_key.tables = tables;
            self.resolved_by = Some(cache.id());
        }
        &mut self.pipeline_layout_key
    }

    pub fn create_pipeline_layout<D: LayoutDevice>(
        &mut self,
        cache: &mut PipelineLayoutCache<D>,
        flags: PipelineLayoutFlags,
        name: Option<&str>,
    ) -> Result<Arc<PipelineLayout<D::PipelineLayout>>, PipelineLayoutError> {
        cache.create_pipeline_layout(self, flags, name)
    }

    pub fn get_pipeline_layout<D: LayoutDevice>(
        &mut self,
        cache: &mut PipelineLayoutCache<D>,
        flags: PipelineLayoutFlags,
        name: Option<&str>,
    ) -> Result<Arc<PipelineLayout<D::PipelineLayout>>, PipelineLayoutError> {
        cache.get_pipeline_layout(self, flags, name)
    }

    pub fn create_descriptor_table_layout<D: LayoutDevice>(
        &self,
        index: u32,
        cache: &mut PipelineLayoutCache<D>,
    ) -> Option<Arc<DescriptorTableLayout>> {
        cache.create_descriptor_table_layout(index, self)
    }

    pub fn get_descriptor_table_layout<D: LayoutDevice>(
        &self,
        index: u32,
        cache: &mut PipelineLayoutCache<D>,
    ) -> Option<Arc<DescriptorTableLayout>> {
        cache.get_descriptor_table_layout(index, self)
    }

    fn slot_mut(&mut self, index: u32) -> &mut DescriptorTableLayoutKey {
        self.resolved_by = None;
        let index = index as usize;
        if index >= self.keys.len() {
            self.keys.resize_with(index + 1, Default::default);
        }
        &mut self.keys[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_grow_on_demand() {
        let mut builder = PipelineLayoutBuilder::new();
        builder.set_shader_stage(3, ShaderStage::Pixel);
        let keys = builder.descriptor_table_layout_keys();
        assert_eq!(keys.len(), 4);
        for key in &keys[..3] {
            assert_eq!(key.stage, ShaderStage::All);
            assert!(key.is_empty());
        }
        assert_eq!(keys[3].stage, ShaderStage::Pixel);
    }

    #[test]
    fn ranges_append() {
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_range(0, DescriptorType::Srv, 4, 0, 0, DescriptorRangeFlags::empty())
            .set_range(0, DescriptorType::Srv, 2, 4, 0, DescriptorRangeFlags::empty())
            .set_shader_stage(0, ShaderStage::Pixel);
        let key = &builder.descriptor_table_layout_keys()[0];
        assert_eq!(key.ranges.len(), 2);
        assert_eq!(key.ranges[1].base_binding, 4);
        assert!(!key.is_scalar());
    }

    #[test]
    fn appending_keeps_stage() {
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_shader_stage(0, ShaderStage::Geometry)
            .set_range(0, DescriptorType::Cbv, 1, 0, 0, DescriptorRangeFlags::empty());
        assert_eq!(
            builder.descriptor_table_layout_keys()[0].stage,
            ShaderStage::Geometry
        );
    }

    #[test]
    fn scalar_helpers() {
        let mut builder = PipelineLayoutBuilder::new();
        builder
            .set_constants(0, 4, 0, 0, ShaderStage::Vertex)
            .set_root_srv(1, 1, 0, DescriptorRangeFlags::DATA_STATIC, ShaderStage::Pixel)
            .set_root_uav(2, 0, 1, DescriptorRangeFlags::empty(), ShaderStage::All)
            .set_root_cbv(3, 2, 0, DescriptorRangeFlags::empty(), ShaderStage::Hull);
        let keys = builder.descriptor_table_layout_keys();
        assert!(keys.iter().all(|key| key.is_scalar()));
        assert_eq!(keys[0].stage, ShaderStage::Vertex);
        assert_eq!(keys[0].ranges[0].num_descriptors, 4);
        assert_eq!(keys[1].ranges[0].ty, DescriptorType::RootSrv);
        assert_eq!(keys[2].ranges[0].space, 1);
        assert_eq!(keys[3].stage, ShaderStage::Hull);
    }

    #[test]
    fn independent_builders_produce_equal_keys() {
        let mut a = PipelineLayoutBuilder::new();
        a.set_range(0, DescriptorType::Uav, 1, 0, 0, DescriptorRangeFlags::empty())
            .set_shader_stage(0, ShaderStage::Pixel);
        let mut b = PipelineLayoutBuilder::new();
        b.set_shader_stage(0, ShaderStage::Pixel)
            .set_range(0, DescriptorType::Uav, 1, 0, 0, DescriptorRangeFlags::empty());
        assert_eq!(
            a.descriptor_table_layout_keys(),
            b.descriptor_table_layout_keys()
        );
    }
}
