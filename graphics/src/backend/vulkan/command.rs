//! Command pools and translation of [`Command`] lists into command buffers.

use ash::vk;

use crate::backend::{BufferId, ImageId};
use crate::command::{Command, ImageCopy};
use crate::error::GraphicsError;
use crate::types::{DrawCommand, Region, RenderPushConstant};

use super::bindings::{ResourceBindings, shader_stages};
use super::{ResourceTable, map_vk_error};

/// Create a command pool whose buffers can be reset individually.
pub(super) fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::DeviceInit(format!("failed to create command pool: {e:?}"))
    })
}

/// Allocate a primary command buffer and begin one-time recording.
pub(super) fn begin_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(map_vk_error)?
        .into_iter()
        .next()
        .ok_or_else(|| GraphicsError::Internal("no command buffer allocated".to_string()))?;

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    if let Err(e) = unsafe { device.begin_command_buffer(cmd, &begin_info) } {
        unsafe { device.free_command_buffers(pool, &[cmd]) };
        return Err(map_vk_error(e));
    }
    Ok(cmd)
}

/// Pipelines bound by the encoder. Both are created by the caller against
/// the shared pipeline layout.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Pipelines {
    pub(super) graphics: Option<vk::Pipeline>,
    pub(super) compute: Option<vk::Pipeline>,
}

/// Records one submission's commands into `cmd`.
pub(super) struct CommandEncoder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
    resources: &'a ResourceTable,
    bindings: &'a mut ResourceBindings,
    pipelines: Pipelines,
    pipeline_layout: vk::PipelineLayout,
    rendering: bool,
    skipped_draws: u32,
}

impl<'a> CommandEncoder<'a> {
    pub(super) fn new(
        device: &'a ash::Device,
        cmd: vk::CommandBuffer,
        resources: &'a ResourceTable,
        bindings: &'a mut ResourceBindings,
        pipelines: Pipelines,
    ) -> Self {
        let pipeline_layout = bindings.pipeline_layout();
        Self {
            device,
            cmd,
            resources,
            bindings,
            pipelines,
            pipeline_layout,
            rendering: false,
            skipped_draws: 0,
        }
    }

    /// Record every command, then end the command buffer.
    pub(super) fn encode_all(
        mut self,
        label: &str,
        commands: &[Command],
    ) -> Result<(), GraphicsError> {
        for command in commands {
            self.encode(command)?;
        }
        if self.rendering {
            log::warn!("Vulkan: '{}' ended inside a view", label);
            unsafe { self.device.cmd_end_rendering(self.cmd) };
        }
        if self.skipped_draws > 0 {
            log::warn!(
                "Vulkan: skipped {} draw(s) in '{}', no graphics pipeline set",
                self.skipped_draws,
                label
            );
        }
        unsafe { self.device.end_command_buffer(self.cmd) }.map_err(map_vk_error)
    }

    fn encode(&mut self, command: &Command) -> Result<(), GraphicsError> {
        match command {
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src = self.resources.buffer(*src)?.buffer;
                let dst = self.resources.buffer(*dst)?.buffer;
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                unsafe { self.device.cmd_copy_buffer(self.cmd, src, dst, &[region]) };
            }
            Command::BindResources {
                views,
                materials,
                lights,
                light_count,
            } => {
                let buffers = [
                    self.resources.buffer(*views)?.buffer,
                    self.resources.buffer(*materials)?.buffer,
                    self.resources.buffer(*lights)?.buffer,
                ];
                let set = self.bindings.descriptor_set(
                    self.device,
                    (*views, *materials, *lights),
                    buffers,
                )?;
                log::trace!("Vulkan: binding resources with {} light(s)", light_count);
                let bind_points = [vk::PipelineBindPoint::GRAPHICS, vk::PipelineBindPoint::COMPUTE];
                for bind_point in bind_points {
                    unsafe {
                        self.device.cmd_bind_descriptor_sets(
                            self.cmd,
                            bind_point,
                            self.pipeline_layout,
                            0,
                            &[set],
                            &[],
                        )
                    };
                }
            }
            Command::ClearImage { image, color } => {
                let image = self.resources.image(*image)?.image;
                self.transition(
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                let clear = vk::ClearColorValue { float32: *color };
                unsafe {
                    self.device.cmd_clear_color_image(
                        self.cmd,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &clear,
                        &[color_range()],
                    )
                };
                self.transition(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                );
            }
            Command::BeginView { image, region } => self.begin_view(*image, *region)?,
            Command::PushConstants(value) => self.push_constants(value),
            Command::Draw(draw) => self.draw(draw),
            Command::EndView => {
                if self.rendering {
                    unsafe { self.device.cmd_end_rendering(self.cmd) };
                    self.rendering = false;
                }
            }
            Command::PrepareReadback { image } => {
                let image = self.resources.image(*image)?.image;
                self.transition(
                    image,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
            }
            Command::Dispatch { x, y, z } => match self.pipelines.compute {
                Some(pipeline) => unsafe {
                    self.device.cmd_bind_pipeline(
                        self.cmd,
                        vk::PipelineBindPoint::COMPUTE,
                        pipeline,
                    );
                    self.device.cmd_dispatch(self.cmd, *x, *y, *z);
                },
                None => log::warn!("Vulkan: dispatch skipped, no compute pipeline set"),
            },
            Command::CopyImageToBuffer {
                image,
                buffer,
                regions,
            } => self.copy_image_to_buffer(*image, *buffer, regions)?,
        }
        Ok(())
    }

    fn begin_view(&mut self, image: ImageId, region: Region) -> Result<(), GraphicsError> {
        let view = self.resources.image(image)?.view;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D {
                x: region.x as i32,
                y: region.y as i32,
            },
            extent: vk::Extent2D {
                width: region.width,
                height: region.height,
            },
        };
        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);

        let viewport = vk::Viewport {
            x: region.x as f32,
            y: region.y as f32,
            width: region.width as f32,
            height: region.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.device.cmd_begin_rendering(self.cmd, &rendering_info);
            if let Some(pipeline) = self.pipelines.graphics {
                self.device
                    .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }
            self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(self.cmd, 0, &[render_area]);
        }
        self.rendering = true;
        Ok(())
    }

    fn push_constants(&mut self, value: &RenderPushConstant) {
        unsafe {
            self.device.cmd_push_constants(
                self.cmd,
                self.pipeline_layout,
                shader_stages(),
                0,
                bytemuck::bytes_of(value),
            )
        };
    }

    fn draw(&mut self, draw: &DrawCommand) {
        if self.pipelines.graphics.is_none() || !self.rendering {
            self.skipped_draws += 1;
            return;
        }
        if draw.is_empty() {
            return;
        }
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                draw.vertex_count,
                draw.instance_count,
                draw.first_vertex,
                draw.first_instance,
            )
        };
    }

    fn copy_image_to_buffer(
        &mut self,
        image: ImageId,
        buffer: BufferId,
        regions: &[ImageCopy],
    ) -> Result<(), GraphicsError> {
        let image = self.resources.image(image)?.image;
        let buffer = self.resources.buffer(buffer)?.buffer;
        let copies: Vec<vk::BufferImageCopy> = regions
            .iter()
            .map(|copy| {
                vk::BufferImageCopy::default()
                    .buffer_offset(copy.buffer_offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D {
                        x: copy.region.x as i32,
                        y: copy.region.y as i32,
                        z: 0,
                    })
                    .image_extent(vk::Extent3D {
                        width: copy.region.width,
                        height: copy.region.height,
                        depth: 1,
                    })
            })
            .collect();

        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                self.cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer,
                &copies,
            );
            self.device.cmd_pipeline_barrier(
                self.cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
        Ok(())
    }

    fn transition(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let (src_access_mask, src_stage) = layout_access(old_layout, true);
        let (dst_access_mask, dst_stage) = layout_access(new_layout, false);

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_range())
            .src_access_mask(src_access_mask)
            .dst_access_mask(dst_access_mask);

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Access mask and stage of a layout, as the source or destination of a
/// transition.
fn layout_access(
    layout: vk::ImageLayout,
    source: bool,
) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        _ if source => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        _ => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_access() {
        assert_eq!(
            layout_access(vk::ImageLayout::UNDEFINED, true),
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        );
        assert_eq!(
            layout_access(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, false).1,
            vk::PipelineStageFlags::TRANSFER
        );
        assert_eq!(
            layout_access(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, false).0,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }
}
