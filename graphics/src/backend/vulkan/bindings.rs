//! Descriptor and pipeline layout shared by every pipeline.
//!
//! ```text
//! set 0, binding 0: ViewInfo[]           (storage buffer)
//! set 0, binding 1: MaterialProperties[] (storage buffer)
//! set 0, binding 2: LightProperties[]    (storage buffer)
//! push constant:    uint batchIdx        (4 bytes)
//! ```
//!
//! Externally built pipelines must be created against
//! [`ResourceBindings::pipeline_layout`].

use std::collections::HashMap;

use ash::vk;

use crate::backend::BufferId;
use crate::error::GraphicsError;
use crate::types::RenderPushConstant;

pub(super) const VIEWS_BINDING: u32 = 0;
pub(super) const MATERIALS_BINDING: u32 = 1;
pub(super) const LIGHTS_BINDING: u32 = 2;

const MAX_DESCRIPTOR_SETS: u32 = 64;

/// Stages that see the storage buffers and the push constant.
pub(super) fn shader_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::COMPUTE
}

/// Key of a descriptor set: the views, materials and lights buffers.
pub(super) type BindingKey = (BufferId, BufferId, BufferId);

pub(super) struct ResourceBindings {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pool: vk::DescriptorPool,
    sets: HashMap<BindingKey, vk::DescriptorSet>,
}

impl ResourceBindings {
    pub(super) fn new(device: &ash::Device) -> Result<Self, GraphicsError> {
        let bindings = [VIEWS_BINDING, MATERIALS_BINDING, LIGHTS_BINDING].map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(shader_stages())
        });
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| {
                GraphicsError::DeviceInit(format!("failed to create descriptor set layout: {e:?}"))
            })?;

        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(shader_stages())
            .offset(0)
            .size(RenderPushConstant::SIZE)];
        let set_layouts = [set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let pipeline_layout =
            unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }.map_err(
                |e| GraphicsError::DeviceInit(format!("failed to create pipeline layout: {e:?}")),
            )?;

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(MAX_DESCRIPTOR_SETS * 3)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_DESCRIPTOR_SETS)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            GraphicsError::DeviceInit(format!("failed to create descriptor pool: {e:?}"))
        })?;

        Ok(Self {
            set_layout,
            pipeline_layout,
            pool,
            sets: HashMap::new(),
        })
    }

    pub(super) fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    pub(super) fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Descriptor set pointing at the three buffers, allocated on first use.
    pub(super) fn descriptor_set(
        &mut self,
        device: &ash::Device,
        key: BindingKey,
        buffers: [vk::Buffer; 3],
    ) -> Result<vk::DescriptorSet, GraphicsError> {
        if let Some(&set) = self.sets.get(&key) {
            return Ok(set);
        }

        let set_layouts = [self.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&set_layouts);
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| {
                GraphicsError::Internal(format!("failed to allocate descriptor set: {e:?}"))
            })?
            .into_iter()
            .next()
            .ok_or_else(|| GraphicsError::Internal("no descriptor set allocated".to_string()))?;

        let infos = buffers.map(|buffer| {
            [vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(vk::WHOLE_SIZE)]
        });
        let writes: Vec<vk::WriteDescriptorSet> = [VIEWS_BINDING, MATERIALS_BINDING, LIGHTS_BINDING]
            .iter()
            .zip(&infos)
            .map(|(&binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        log::trace!("Vulkan: allocated descriptor set for {:?}", key);
        self.sets.insert(key, set);
        Ok(set)
    }

    /// Free descriptor sets that reference `buffer`.
    pub(super) fn forget_buffer(&mut self, device: &ash::Device, buffer: BufferId) {
        let stale: Vec<vk::DescriptorSet> = self
            .sets
            .iter()
            .filter(|((v, m, l), _)| *v == buffer || *m == buffer || *l == buffer)
            .map(|(_, &set)| set)
            .collect();
        if stale.is_empty() {
            return;
        }
        self.sets
            .retain(|(v, m, l), _| *v != buffer && *m != buffer && *l != buffer);
        if let Err(e) = unsafe { device.free_descriptor_sets(self.pool, &stale) } {
            log::warn!("Vulkan: failed to free descriptor sets: {e:?}");
        }
    }

    /// Destroy the layouts and pool.
    ///
    /// # Safety
    ///
    /// The device must be idle.
    pub(super) unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
        self.sets.clear();
    }
}
