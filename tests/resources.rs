mod common;

use common::{device, device_with, spirv_bytes};
use gfx_device::ash::vk;
use gfx_device::backend::dummy::{DriverCall, ObjectKind};
use gfx_device::backend::{build_mip_chain_rgba8, DummyConfig};
use gfx_device::config::GraphicsConfig;
use gfx_device::{ErrorKind, GfxError, GpuDriver};
use rstest::rstest;

#[test]
fn device_local_buffer_is_filled_through_staging() {
    let (device, driver) = device();
    let data: Vec<u8> = (0..=255u8).collect();

    let buffer = device
        .create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(&data[..]),
        )
        .unwrap();
    assert!(!buffer.is_mapped());
    assert_eq!(driver.memory_contents(buffer.memory()).unwrap(), data);

    // Read it back through a host-visible buffer as a renderer would.
    let readback = device
        .create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            None,
        )
        .unwrap();
    let cmd = device.begin_one_shot().unwrap();
    device.driver().cmd_copy_buffer(
        cmd,
        buffer.handle(),
        readback.handle(),
        &[vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as u64,
        }],
    );
    device.submit_one_shot(cmd).unwrap();
    assert_eq!(readback.mapped_bytes().unwrap(), &data[..]);

    // The staging buffer and its one-shot command buffer are already gone.
    assert_eq!(driver.live_count(ObjectKind::Buffer), 2);
    device.destroy_buffer(buffer);
    device.destroy_buffer(readback);
    assert_eq!(driver.live_count(ObjectKind::Buffer), 0);
    assert_eq!(driver.live_count(ObjectKind::Memory), 0);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn host_visible_buffer_stays_mapped_and_writable() {
    let (device, driver) = device();
    let mut buffer = device
        .create_buffer(
            16,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            Some(&[7u8; 8][..]),
        )
        .unwrap();
    assert!(buffer.is_mapped());

    buffer.write(8, &[1.0f32, 2.0]).unwrap();
    let contents = driver.memory_contents(buffer.memory()).unwrap();
    assert_eq!(&contents[..8], &[7u8; 8]);
    assert_eq!(&contents[8..12], &1.0f32.to_le_bytes());

    assert!(buffer.write(12, &[0u32; 2]).is_err());
    device.destroy_buffer(buffer);
}

#[rstest]
#[case::device_local(vk::MemoryPropertyFlags::DEVICE_LOCAL, vk::MemoryPropertyFlags::DEVICE_LOCAL)]
#[case::host_visible(
    vk::MemoryPropertyFlags::HOST_VISIBLE,
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
)]
#[case::both(
    vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
    vk::MemoryPropertyFlags::DEVICE_LOCAL
        | vk::MemoryPropertyFlags::HOST_VISIBLE
        | vk::MemoryPropertyFlags::HOST_COHERENT
)]
fn lowest_matching_memory_type_wins(
    #[case] requested: vk::MemoryPropertyFlags,
    #[case] chosen: vk::MemoryPropertyFlags,
) {
    let (device, _driver) = device();
    let buffer = device
        .create_buffer(64, vk::BufferUsageFlags::STORAGE_BUFFER, requested, None)
        .unwrap();
    assert_eq!(buffer.memory_flags(), chosen);
    device.destroy_buffer(buffer);
}

#[test]
fn type_bits_restrict_the_choice() {
    let config = DummyConfig {
        buffer_memory_type_bits: 0b100,
        ..DummyConfig::default()
    };
    let (device, _driver) = device_with(config, &GraphicsConfig::default());

    let buffer = device
        .create_buffer(
            64,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            None,
        )
        .unwrap();
    assert!(buffer
        .memory_flags()
        .contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    device.destroy_buffer(buffer);
}

#[test]
fn unsatisfiable_memory_request_fails_without_leaking() {
    let (device, driver) = device();

    let err = device
        .create_buffer(
            64,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GfxError::NoMemoryType { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(driver.live_count(ObjectKind::Buffer), 0);
    assert_eq!(driver.live_count(ObjectKind::Memory), 0);
}

#[test]
fn unsatisfiable_image_memory_fails_without_leaking() {
    let (device, driver) = device();

    let err = device
        .create_image_2d(
            32,
            32,
            1,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        GfxError::NoMemoryType { required, .. } if required == vk::MemoryPropertyFlags::LAZILY_ALLOCATED
    ));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(driver.live_count(ObjectKind::Image), 0);
    assert_eq!(driver.live_count(ObjectKind::ImageView), 0);
    assert_eq!(driver.live_count(ObjectKind::Memory), 0);
}

#[test]
fn oversized_source_is_rejected() {
    let (device, _driver) = device();
    let err = device
        .create_buffer(
            4,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Some(&[0u8; 8][..]),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[test]
fn texture_upload_copies_every_mip_level() {
    let (device, driver) = device();
    let pixels: Vec<u8> = (0..8 * 4 * 4).map(|i| (i * 7 % 251) as u8).collect();

    let image = device.create_texture_rgba8(8, 4, &pixels).unwrap();
    assert_eq!(image.mip_levels(), 4);
    assert_eq!(image.state().layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(image.state().access(), vk::AccessFlags2::SHADER_READ);
    assert_eq!(
        driver.image_layout(image.handle()),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );

    let expected: Vec<u8> = build_mip_chain_rgba8(8, 4, &pixels)
        .unwrap()
        .into_iter()
        .flat_map(|level| level.pixels)
        .collect();
    assert_eq!(&expected[..pixels.len()], &pixels[..]);
    assert_eq!(driver.memory_contents(image.memory()).unwrap(), expected);

    let copies = driver
        .calls()
        .iter()
        .filter(|call| matches!(call, DriverCall::CopyBufferToImage { .. }))
        .count();
    assert_eq!(copies, 1);

    device.destroy_image(image);
    assert_eq!(driver.live_count(ObjectKind::Image), 0);
    assert!(driver.violations().is_empty(), "{:?}", driver.violations());
}

#[test]
fn failed_texture_upload_keeps_the_previous_state() {
    let (device, driver) = device();
    let pixels = vec![0x40u8; 8 * 4 * 4];
    let levels = build_mip_chain_rgba8(8, 4, &pixels).unwrap();
    let mut image = device
        .create_image_2d(
            8,
            4,
            levels.len() as u32,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();

    driver.fail_next_submits(1);
    let err = device.upload_texture(&mut image, &levels).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert_eq!(image.state().layout(), vk::ImageLayout::UNDEFINED);
    assert_eq!(image.state().access(), vk::AccessFlags2::NONE);
    assert_eq!(driver.live_count(ObjectKind::Buffer), 0);
    assert_eq!(driver.live_count(ObjectKind::Fence), 2);

    device.upload_texture(&mut image, &levels).unwrap();
    assert_eq!(image.state().layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    device.destroy_image(image);
}

#[rstest]
#[case::depth(vk::Format::D32_SFLOAT, vk::ImageAspectFlags::DEPTH)]
#[case::depth_stencil(
    vk::Format::D24_UNORM_S8_UINT,
    vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
)]
fn depth_images_get_depth_aspects(
    #[case] format: vk::Format,
    #[case] aspect: vk::ImageAspectFlags,
) {
    let (device, _driver) = device();
    let image = device
        .create_image_2d(
            64,
            64,
            1,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap();
    assert_eq!(image.aspect(), aspect);
    assert_eq!(image.state().layout(), vk::ImageLayout::UNDEFINED);
    device.destroy_image(image);
}

#[rstest]
#[case::zero_mips(16, 16, 0)]
#[case::too_many_mips(16, 16, 6)]
#[case::empty(0, 16, 1)]
fn invalid_image_requests_are_usage_errors(
    #[case] width: u32,
    #[case] height: u32,
    #[case] mips: u32,
) {
    let (device, driver) = device();
    let err = device
        .create_image_2d(
            width,
            height,
            mips,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(driver.live_count(ObjectKind::Image), 0);
}

#[test]
fn shader_modules_come_from_valid_spirv_only() {
    let (device, driver) = device();

    let module = device.create_shader_module(&spirv_bytes()).unwrap();
    assert_eq!(driver.live_count(ObjectKind::ShaderModule), 1);
    device.destroy_shader_module(module);
    assert_eq!(driver.live_count(ObjectKind::ShaderModule), 0);

    let err = device.create_shader_module(b"void main() {}").unwrap_err();
    assert!(matches!(err, GfxError::InvalidShader(_)));
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(driver.live_count(ObjectKind::ShaderModule), 0);
}

#[test]
fn object_names_reach_the_driver() {
    let (device, driver) = device();
    device.set_object_name(device.descriptor_pool(), "global descriptor pool");
    assert!(driver
        .calls()
        .contains(&DriverCall::SetObjectName("global descriptor pool".into())));
}
