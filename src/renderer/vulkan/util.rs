use ash::vk;

const COLOR_SUBRESOURCE_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

const COLOR_SUBRESOURCE_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

/// Layout transition of a single-mip color image. Waits on everything that
/// came before.
pub fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    if old_layout == new_layout {
        return;
    }

    let image_barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .subresource_range(COLOR_SUBRESOURCE_RANGE)
        .image(image);
    let image_barriers = [image_barrier];
    let dep_info = vk::DependencyInfo::default()
        .image_memory_barriers(&image_barriers);

    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dep_info);
    }
}

/// Blits the whole of `src` onto the whole of `dst`, scaling as needed.
/// `src` must be in `TRANSFER_SRC_OPTIMAL` and `dst` in `TRANSFER_DST_OPTIMAL`.
pub fn blit_image_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    src_size: vk::Extent2D,
    dst: vk::Image,
    dst_size: vk::Extent2D,
) {
    let blit_region = vk::ImageBlit2::default()
        .src_subresource(COLOR_SUBRESOURCE_LAYERS)
        .src_offsets([vk::Offset3D::default(), far_corner(src_size)])
        .dst_subresource(COLOR_SUBRESOURCE_LAYERS)
        .dst_offsets([vk::Offset3D::default(), far_corner(dst_size)]);
    let regions = [blit_region];
    let blit_info = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&regions);

    unsafe {
        device.cmd_blit_image2(cmd, &blit_info);
    }
}

fn far_corner(size: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: size.width as i32,
        y: size.height as i32,
        z: 1,
    }
}
