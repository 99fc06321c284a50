// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Dynamic resolution change tests.
//!
//! The scripted component announces new output settings while Executing; the core
//! must disable the output port, free the old buffers as they come back, re-enable
//! the port with buffers of the new size and hand them to the hardware again.

mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::{BUFFER_COUNT, MockFactory, MockHandle, init_logging, wait_until};
use omx::{
    BufferFlags, ComponentCommand, ComponentEvent, Core, CoreSettings, ReconfState,
    SharingPolicy, State, Vendor,
};

const WAIT: Duration = Duration::from_secs(2);
const FULL_HD_SIZE: u32 = 1920 * 1080 * 3 / 2;

fn executing_core(settings: CoreSettings) -> (Core, MockHandle) {
    init_logging();
    let (factory, mock) = MockFactory::new();
    let core = Core::new("drc", settings);
    core.init(&factory, None).unwrap();
    core.input_port().setup(SharingPolicy::Vendor);
    core.output_port().setup(SharingPolicy::Vendor);
    core.prepare().unwrap();
    core.start().unwrap();
    (core, mock)
}

fn switch_to_full_hd(mock: &MockHandle) {
    mock.update_definition(1, |definition| {
        definition.frame_width = 1920;
        definition.frame_height = 1080;
        definition.stride = 1920;
        definition.slice_height = 1080;
        definition.buffer_size = FULL_HD_SIZE;
    });
}

fn settings_changed() -> ComponentEvent {
    ComponentEvent::PortSettingsChanged {
        port: 1,
        index: omx_sys::OMX_IndexParamPortDefinition,
    }
}

fn port_commands(mock: &MockHandle) -> Vec<ComponentCommand> {
    mock.commands()
        .into_iter()
        .filter(|command| {
            matches!(
                command,
                ComponentCommand::PortDisable(_) | ComponentCommand::PortEnable(_)
            )
        })
        .collect()
}

#[test]
fn resolution_change_reallocates_output_buffers() {
    let (core, mock) = executing_core(CoreSettings::default());
    let notified = Arc::new(AtomicUsize::new(0));
    {
        let notified = notified.clone();
        core.set_settings_changed_callback(Arc::new(move |_core: &Core| {
            notified.fetch_add(1, Ordering::SeqCst);
        }));
    }
    assert_eq!(mock.held(1), BUFFER_COUNT as usize);
    mock.clear_commands();

    switch_to_full_hd(&mock);
    mock.emit(settings_changed());

    assert!(wait_until(WAIT, || core.reconfig_state() == ReconfState::Done));
    assert_eq!(
        port_commands(&mock),
        [ComponentCommand::PortDisable(1), ComponentCommand::PortEnable(1)]
    );
    assert!(core.output_port().is_enabled());
    assert_eq!(mock.buffer_count(1), BUFFER_COUNT as usize);
    assert!(wait_until(WAIT, || mock.held(1) == BUFFER_COUNT as usize));
    assert!(mock.held_sizes(1).iter().all(|size| *size == FULL_HD_SIZE));
    let definition = core.output_port().definition();
    assert_eq!((definition.frame_width, definition.frame_height), (1920, 1080));
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    // The input side is untouched.
    assert_eq!(mock.buffer_count(0), BUFFER_COUNT as usize);
    assert_eq!(core.state(), State::Executing);
}

#[test]
fn queued_output_buffers_are_freed_by_the_change() {
    let (core, mock) = executing_core(CoreSettings::default());
    assert!(mock.produce(&[1; 16], 0, BufferFlags::empty()));
    assert!(mock.produce(&[2; 16], 33_000, BufferFlags::empty()));
    assert!(wait_until(WAIT, || core.output_port().occupancy().queued == 2));
    assert_eq!(mock.held(1), BUFFER_COUNT as usize - 2);

    switch_to_full_hd(&mock);
    mock.emit(settings_changed());

    assert!(wait_until(WAIT, || core.reconfig_state() == ReconfState::Done));
    // Every old header is freed, the two that waited in the queue included.
    assert_eq!(mock.frees(), BUFFER_COUNT as usize);
    assert!(wait_until(WAIT, || mock.held(1) == BUFFER_COUNT as usize));
    assert!(mock.held_sizes(1).iter().all(|size| *size == FULL_HD_SIZE));
    assert_eq!(core.output_port().occupancy().queued, 0);
}

#[test]
fn repeated_notification_during_a_session_is_ignored() {
    let (core, mock) = executing_core(CoreSettings::default());
    mock.clear_commands();
    switch_to_full_hd(&mock);

    mock.emit_all(&[settings_changed(), settings_changed()]);

    assert!(wait_until(WAIT, || core.reconfig_state() == ReconfState::Done));
    assert_eq!(
        port_commands(&mock),
        [ComponentCommand::PortDisable(1), ComponentCommand::PortEnable(1)]
    );
}

#[test]
fn pending_change_resumes_after_flush() {
    let (core, mock) = executing_core(CoreSettings::default());
    core.disable_port(1).unwrap();
    switch_to_full_hd(&mock);

    mock.emit(settings_changed());
    assert!(wait_until(WAIT, || core.reconfig_state() == ReconfState::Pending));
    mock.clear_commands();

    core.flush_start();
    core.flush_stop();

    assert!(wait_until(WAIT, || core.reconfig_state() == ReconfState::Done));
    assert_eq!(
        mock.commands(),
        [
            ComponentCommand::Flush(0),
            ComponentCommand::Flush(1),
            ComponentCommand::PortDisable(1),
            ComponentCommand::PortEnable(1),
        ]
    );
    assert!(wait_until(WAIT, || mock.held(1) == BUFFER_COUNT as usize));
    assert!(mock.held_sizes(1).iter().all(|size| *size == FULL_HD_SIZE));
}

#[test]
fn vendor_without_reconfiguration_ignores_notification() {
    let (core, mock) = executing_core(CoreSettings::for_vendor(Vendor::SlsiSec));
    mock.clear_commands();
    switch_to_full_hd(&mock);
    mock.emit(settings_changed());

    // Give the callback thread a chance to act.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(core.reconfig_state(), ReconfState::Default);
    assert!(port_commands(&mock).is_empty());
    assert_eq!(mock.held(1), BUFFER_COUNT as usize);
}

#[test]
fn crop_change_is_recorded_without_session() {
    let (core, mock) = executing_core(CoreSettings::default());
    mock.emit(ComponentEvent::PortSettingsChanged {
        port: 1,
        index: omx_sys::OMX_IndexConfigCommonOutputCrop,
    });
    assert!(wait_until(WAIT, || core.take_crop_changed()));
    assert_eq!(core.reconfig_state(), ReconfState::Default);
    assert!(!core.take_crop_changed());
}
