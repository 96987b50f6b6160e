//! [`LayoutDevice`] backend for Vulkan.
//!
//! Every non-constant slot becomes one descriptor set layout, numbered in slot
//! order with constant slots skipped. Constant slots are packed into push
//! constant ranges. Register spaces have no Vulkan counterpart and are ignored.

use std::ffi::CString;
use std::ops::Deref;
use std::sync::Arc;

use ash::vk::{self, Handle};
use smallvec::{smallvec, SmallVec};
use thiserror::Error;

use crate::layout::{RootParameter, RootViewType, ShaderStage, TableRangeType};
use crate::serialize::{LayoutVersion, PipelineLayoutDesc, SerializationError, SerializedLayout};
use crate::LayoutDevice;

#[derive(Debug, Error)]
pub enum VulkanLayoutError {
    #[error("vulkan error: {0:?}")]
    VkError(#[from] vk::Result),
    #[error("malformed layout: {0}")]
    Decode(#[from] SerializationError),
}

/// Shared handle to a Vulkan device. The native device is created and
/// destroyed elsewhere and must outlive every layout made through this handle.
#[derive(Clone)]
pub struct VulkanDevice(Arc<VulkanDeviceInner>);

struct VulkanDeviceInner {
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl VulkanDevice {
    pub fn new(device: ash::Device) -> Self {
        Self(Arc::new(VulkanDeviceInner {
            device,
            debug_utils: None,
        }))
    }
    /// Pipeline layouts made through this handle get debug names.
    /// `VK_EXT_debug_utils` must be enabled on `instance`.
    pub fn with_debug_utils(instance: &ash::Instance, device: ash::Device) -> Self {
        let debug_utils = ash::ext::debug_utils::Device::new(instance, &device);
        Self(Arc::new(VulkanDeviceInner {
            device,
            debug_utils: Some(debug_utils),
        }))
    }

    fn set_name(&self, raw: vk::PipelineLayout, name: &str) {
        let Some(debug_utils) = &self.0.debug_utils else {
            return;
        };
        let Ok(cstr) = CString::new(name) else {
            tracing::warn!(name, "pipeline layout name contains a NUL byte");
            return;
        };
        let result = unsafe {
            debug_utils.set_debug_utils_object_name(&vk::DebugUtilsObjectNameInfoEXT {
                object_type: vk::ObjectType::PIPELINE_LAYOUT,
                object_handle: raw.as_raw(),
                p_object_name: cstr.as_ptr(),
                ..Default::default()
            })
        };
        if let Err(err) = result {
            tracing::warn!(?err, name, "failed to name pipeline layout");
        }
    }
}

impl Deref for VulkanDevice {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.0.device
    }
}

pub struct VulkanPipelineLayout {
    device: VulkanDevice,
    raw: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl VulkanPipelineLayout {
    pub fn device(&self) -> &VulkanDevice {
        &self.device
    }
    pub fn raw(&self) -> vk::PipelineLayout {
        self.raw
    }
    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.set_layouts
    }
    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }
}

impl std::fmt::Debug for VulkanPipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanPipelineLayout")
            .field("raw", &self.raw)
            .field("set_layouts", &self.set_layouts)
            .field("push_constant_ranges", &self.push_constant_ranges)
            .finish()
    }
}

impl Drop for VulkanPipelineLayout {
    fn drop(&mut self) {
        unsafe {
            if self.raw != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.raw, None);
            }
            for set_layout in self.set_layouts.drain(..) {
                self.device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }
}

impl LayoutDevice for VulkanDevice {
    type PipelineLayout = VulkanPipelineLayout;
    type Error = VulkanLayoutError;

    fn highest_layout_version(&self) -> Result<LayoutVersion, Self::Error> {
        // Range flags are advisory on Vulkan, so the richest encoding is always fine.
        Ok(LayoutVersion::V1_1)
    }

    fn create_pipeline_layout(
        &self,
        serialized: &SerializedLayout,
        name: Option<&str>,
    ) -> Result<VulkanPipelineLayout, VulkanLayoutError> {
        let desc = serialized.decode()?;
        if !desc.flags.is_empty() {
            tracing::trace!(flags = desc.flags.bits(), "pipeline layout flags ignored on vulkan");
        }
        let plan = LayoutPlan::new(&desc)?;

        // Dropping `layout` on an early return destroys whatever was created so far.
        let mut layout = VulkanPipelineLayout {
            device: self.clone(),
            raw: vk::PipelineLayout::null(),
            set_layouts: Vec::with_capacity(plan.sets.len()),
            push_constant_ranges: plan.push_constant_ranges,
        };
        for bindings in plan.sets.iter() {
            let set_layout = unsafe {
                self.0.device.create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo {
                        binding_count: bindings.len() as u32,
                        p_bindings: bindings.as_ptr(),
                        ..Default::default()
                    },
                    None,
                )
            }?;
            layout.set_layouts.push(set_layout);
        }

        let info = vk::PipelineLayoutCreateInfo {
            set_layout_count: layout.set_layouts.len() as u32,
            p_set_layouts: layout.set_layouts.as_ptr(),
            push_constant_range_count: layout.push_constant_ranges.len() as u32,
            p_push_constant_ranges: layout.push_constant_ranges.as_ptr(),
            ..Default::default()
        };
        // `self.create_pipeline_layout` would resolve to the trait method.
        layout.raw = unsafe { self.0.device.create_pipeline_layout(&info, None) }?;
        if let Some(name) = name {
            self.set_name(layout.raw, name);
        }
        Ok(layout)
    }
}

/// Native objects needed for one pipeline layout, before any of them exist.
struct LayoutPlan {
    sets: Vec<SmallVec<[vk::DescriptorSetLayoutBinding<'static>; 4]>>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl LayoutPlan {
    /// Serialized layouts may come from a device's own serializer, so the
    /// root cost is checked again before push constant sizes are summed.
    fn new(desc: &PipelineLayoutDesc) -> Result<Self, SerializationError> {
        desc.validate()?;
        let mut sets = Vec::with_capacity(desc.parameters.len());
        let mut push_constant_ranges = Vec::new();
        let mut push_constant_offset = 0;
        for layout in desc.parameters.iter() {
            let stage_flags = shader_stage_flags(layout.visibility);
            let bindings: SmallVec<[vk::DescriptorSetLayoutBinding<'static>; 4]> = match &layout
                .parameter
            {
                RootParameter::Constants {
                    num_32bit_values, ..
                } => {
                    let size = num_32bit_values * 4;
                    push_constant_ranges.push(vk::PushConstantRange {
                        stage_flags,
                        offset: push_constant_offset,
                        size,
                    });
                    push_constant_offset += size;
                    continue;
                }
                RootParameter::Empty => SmallVec::new(),
                RootParameter::RootView { ty, binding, .. } => {
                    smallvec![binding_info(*binding, root_view_type(*ty), 1, stage_flags)]
                }
                RootParameter::Table { ranges } => ranges
                    .iter()
                    .map(|range| {
                        binding_info(
                            range.base_binding,
                            table_range_type(range.ty),
                            range.num_descriptors,
                            stage_flags,
                        )
                    })
                    .collect(),
            };
            sets.push(bindings);
        }
        Ok(Self {
            sets,
            push_constant_ranges,
        })
    }
}

fn binding_info(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    descriptor_count: u32,
    stage_flags: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type,
        descriptor_count,
        stage_flags,
        ..Default::default()
    }
}

fn shader_stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Domain => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Hull => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::All => vk::ShaderStageFlags::ALL,
    }
}

fn root_view_type(ty: RootViewType) -> vk::DescriptorType {
    match ty {
        RootViewType::Srv | RootViewType::Uav => vk::DescriptorType::STORAGE_BUFFER,
        RootViewType::Cbv => vk::DescriptorType::UNIFORM_BUFFER,
    }
}

fn table_range_type(ty: TableRangeType) -> vk::DescriptorType {
    match ty {
        TableRangeType::Srv => vk::DescriptorType::SAMPLED_IMAGE,
        TableRangeType::Uav => vk::DescriptorType::STORAGE_IMAGE,
        TableRangeType::Cbv => vk::DescriptorType::UNIFORM_BUFFER,
        TableRangeType::Sampler => vk::DescriptorType::SAMPLER,
    }
}
