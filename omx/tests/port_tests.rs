// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer pool tests: how each kind of slot is disposed of, what a buffer looks like
//! after a trip through the hardware, and reallocation with fewer buffers.

mod common;

use std::{sync::Arc, time::Duration};

use common::{
    BUFFER_COUNT, INPUT_SIZE, MockFactory, MockHandle, init_logging, output_definition,
    wait_until,
};
use omx::{
    BufferFlags, Core, CoreSettings, Disposal, ScmnImgb, SharingMode, SharingPolicy, Surface,
    SurfaceAllocator,
};

const WAIT: Duration = Duration::from_secs(2);

fn loaded_core(factory: MockFactory, input: SharingPolicy, output: SharingPolicy) -> Core {
    init_logging();
    let core = Core::new("port", CoreSettings::default());
    core.init(&factory, None).unwrap();
    core.input_port().setup(input);
    core.output_port().setup(output);
    core
}

fn count(disposals: &[Disposal], kind: Disposal) -> usize {
    disposals.iter().filter(|disposal| **disposal == kind).count()
}

struct PlainSurface;

impl Surface for PlainSurface {
    fn descriptor(&self) -> ScmnImgb {
        ScmnImgb::default()
    }

    fn data(&self) -> &[u8] {
        &[]
    }
}

struct PlainAllocator;

impl SurfaceAllocator for PlainAllocator {
    fn allocate(
        &self,
        _width: u32,
        _height: u32,
        _color_format: u32,
    ) -> omx::Result<Arc<dyn Surface>> {
        Ok(Arc::new(PlainSurface))
    }
}

#[test]
fn component_allocated_buffers_are_left_to_the_component() {
    let (factory, mock) = MockFactory::new();
    let core = loaded_core(factory, SharingPolicy::AllocateOn, SharingPolicy::AllocateOn);
    let port = core.input_port();
    port.allocate_buffers().unwrap();
    assert_eq!(port.sharing_mode(), SharingMode::Owned);

    let disposals = port.free_buffers();
    assert_eq!(disposals, [Disposal::HardwareOwned; BUFFER_COUNT as usize]);
    assert_eq!(mock.frees(), BUFFER_COUNT as usize);
    assert_eq!(mock.buffer_count(0), 0);
    assert_eq!(port.occupancy().total, 0);
}

#[test]
fn local_memory_is_freed_with_its_header() {
    let (factory, mock) = MockFactory::new();
    let core = loaded_core(factory, SharingPolicy::ShareOff, SharingPolicy::ShareOff);
    let port = core.output_port();
    port.allocate_buffers().unwrap();
    assert_eq!(port.sharing_mode(), SharingMode::Local);

    let disposals = port.free_buffers();
    assert_eq!(disposals, [Disposal::FreeLocal; BUFFER_COUNT as usize]);
    assert_eq!(mock.frees(), BUFFER_COUNT as usize);
    assert_eq!(mock.buffer_count(1), 0);
}

#[test]
fn attached_pipeline_memory_is_dropped_once() {
    let (factory, mock) = MockFactory::new();
    let core = loaded_core(factory, SharingPolicy::ShareOn, SharingPolicy::ShareOn);
    let port = core.input_port();
    port.allocate_buffers().unwrap();
    port.start_buffers();
    assert_eq!(port.sharing_mode(), SharingMode::Shared);

    let mut buffer = port.request_buffer().unwrap();
    assert!(port.attach(&mut buffer, Box::new(vec![3u8; 64])).is_ok());
    port.push_buffer(buffer);

    let disposals = port.free_buffers();
    assert_eq!(disposals.len(), BUFFER_COUNT as usize);
    assert_eq!(count(&disposals, Disposal::UnrefShared), 1);
    assert_eq!(count(&disposals, Disposal::FreeLocal), BUFFER_COUNT as usize - 1);
    assert_eq!(mock.frees(), BUFFER_COUNT as usize);
    assert_eq!(port.occupancy().queued, 0);
}

#[test]
fn surface_references_are_released() {
    let mut output = output_definition(320, 240, 0);
    output.color_format = omx_sys::OMX_EXT_COLOR_FormatNV12T_Phyaddr_Fd;
    let (factory, mock) = MockFactory::with_output(output);
    let core = loaded_core(factory, SharingPolicy::Vendor, SharingPolicy::Vendor);
    let port = core.output_port();
    port.set_surface_allocator(Arc::new(PlainAllocator));
    port.allocate_buffers().unwrap();
    assert_eq!(port.sharing_mode(), SharingMode::Surface);

    let disposals = port.free_buffers();
    assert_eq!(disposals, [Disposal::ReleaseSurface; BUFFER_COUNT as usize]);
    assert_eq!(mock.frees(), BUFFER_COUNT as usize);
}

fn executing_core(input: SharingPolicy) -> (Core, MockHandle) {
    let (factory, mock) = MockFactory::new();
    let core = loaded_core(factory, input, SharingPolicy::Vendor);
    core.prepare().unwrap();
    core.start().unwrap();
    (core, mock)
}

#[test]
fn input_buffer_comes_back_empty() {
    let (core, mock) = executing_core(SharingPolicy::ShareOff);
    let port = core.input_port();

    let mut buffer = port.request_buffer().unwrap();
    buffer.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
    buffer.set_filled_len(4);
    buffer.set_timestamp(40_000);
    buffer.set_flags(BufferFlags::SYNCFRAME);
    port.release_buffer(buffer).unwrap();

    assert!(wait_until(WAIT, || port.occupancy().queued == BUFFER_COUNT as usize));
    assert_eq!(mock.consumed()[0].data, [1, 2, 3, 4]);

    let buffers: Vec<_> = (0..BUFFER_COUNT)
        .map(|_| port.request_buffer().unwrap())
        .collect();
    for buffer in &buffers {
        assert_eq!(buffer.filled_len(), 0);
        assert_eq!(buffer.offset(), 0);
        assert_eq!(buffer.flags(), BufferFlags::empty());
    }
    for buffer in buffers {
        port.push_buffer(buffer);
    }
}

#[test]
fn shared_input_buffer_gets_its_own_memory_back() {
    let (core, mock) = executing_core(SharingPolicy::ShareOn);
    let port = core.input_port();

    let mut buffer = port.request_buffer().unwrap();
    assert!(port.attach(&mut buffer, Box::new(vec![9u8; 64])).is_ok());
    buffer.set_filled_len(64);
    port.release_buffer(buffer).unwrap();

    assert!(wait_until(WAIT, || port.occupancy().queued == BUFFER_COUNT as usize));
    assert_eq!(mock.consumed()[0].data, vec![9u8; 64]);

    let buffers: Vec<_> = (0..BUFFER_COUNT)
        .map(|_| port.request_buffer().unwrap())
        .collect();
    for buffer in &buffers {
        assert_eq!(buffer.filled_len(), 0);
        assert_eq!(buffer.alloc_len(), INPUT_SIZE);
    }
    for buffer in buffers {
        port.push_buffer(buffer);
    }

    // Nothing is attached any more.
    let disposals = port.free_buffers();
    assert_eq!(count(&disposals, Disposal::UnrefShared), 0);
}

#[test]
fn fewer_buffers_free_the_surplus_headers() {
    let (factory, mock) = MockFactory::new();
    let core = loaded_core(factory, SharingPolicy::ShareOff, SharingPolicy::ShareOff);
    let port = core.input_port();
    port.allocate_buffers().unwrap();
    port.start_buffers();
    assert_eq!(port.occupancy().queued, BUFFER_COUNT as usize);

    mock.update_definition(0, |definition| definition.buffer_count_actual = 2);
    port.allocate_buffers().unwrap();

    assert_eq!(mock.frees(), BUFFER_COUNT as usize - 2);
    assert_eq!(mock.buffer_count(0), 2);
    assert_eq!(port.occupancy().total, 2);
    // Queued handles of the freed headers are gone too.
    assert_eq!(port.occupancy().queued, 2);
    assert_eq!(port.free_buffers().len(), 2);
}
