// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! State machine and buffer pool tests against the scripted component.
//!
//! # Test Coverage
//!
//! - Loaded → Idle → Executing → Idle → Loaded round trip
//! - Bounded waits: acknowledgment timeout, error while waiting or while sending the
//!   command, stale errors
//! - Port flush, disable and enable outside of a resolution change
//! - Tolerated init errors: a single report, then a forced Pause

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
    ComponentCommand, ComponentEvent, Core, CoreSettings, Error, SharingPolicy, State, Vendor,
};
use tracing::info;

const WAIT: Duration = Duration::from_secs(2);

fn loaded_core(settings: CoreSettings) -> (Core, MockHandle) {
    init_logging();
    let (factory, mock) = MockFactory::new();
    let core = Core::new("test", settings);
    core.init(&factory, Some("video_decoder.avc")).unwrap();
    core.input_port().setup(SharingPolicy::Vendor);
    core.output_port().setup(SharingPolicy::Vendor);
    (core, mock)
}

fn executing_core(settings: CoreSettings) -> (Core, MockHandle) {
    let (core, mock) = loaded_core(settings);
    core.prepare().unwrap();
    core.start().unwrap();
    (core, mock)
}

fn short_state_timeout() -> CoreSettings {
    let mut settings = CoreSettings::default();
    settings.timeouts.state_change = Duration::from_millis(100);
    settings
}

#[test]
fn full_lifecycle_round_trip() {
    let (core, mock) = loaded_core(CoreSettings::default());
    assert_eq!(core.state(), State::Loaded);
    assert_eq!(mock.roles(), ["video_decoder.avc"]);
    assert_eq!(core.component_name().as_deref(), Some("OMX.mock.codec"));

    core.prepare().unwrap();
    assert_eq!(core.state(), State::Idle);
    assert_eq!(mock.buffer_count(0), BUFFER_COUNT as usize);
    assert_eq!(mock.buffer_count(1), BUFFER_COUNT as usize);

    core.start().unwrap();
    assert_eq!(core.state(), State::Executing);
    let input = core.input_port().occupancy();
    assert_eq!(input.queued, BUFFER_COUNT as usize);
    assert_eq!(input.with_hardware, 0);
    assert_eq!(mock.held(1), BUFFER_COUNT as usize);
    assert_eq!(core.output_port().occupancy().with_hardware, BUFFER_COUNT as usize);

    core.stop().unwrap();
    assert_eq!(core.state(), State::Idle);
    let output = core.output_port().occupancy();
    assert_eq!(output.with_hardware, 0);
    assert_eq!(output.queued, BUFFER_COUNT as usize);

    core.unload().unwrap();
    assert_eq!(core.state(), State::Loaded);
    assert_eq!(mock.buffer_count(0), 0);
    assert_eq!(mock.buffer_count(1), 0);
    assert_eq!(mock.frees(), 2 * BUFFER_COUNT as usize);

    core.deinit();
    assert_eq!(core.state(), State::Invalid);
    assert!(!core.has_component());
}

#[test]
fn occupancy_never_exceeds_slot_count() {
    let (core, mock) = executing_core(CoreSettings::default());
    for port in [core.input_port(), core.output_port()] {
        let occupancy = port.occupancy();
        info!(port = port.index(), ?occupancy, "Occupancy");
        assert_eq!(occupancy.total, BUFFER_COUNT as usize);
        assert!(occupancy.with_hardware + occupancy.queued <= occupancy.total);
    }

    // Take every input buffer out and give it back.
    let input = core.input_port();
    let buffers: Vec<_> = (0..BUFFER_COUNT).filter_map(|_| input.request_buffer()).collect();
    assert_eq!(buffers.len(), BUFFER_COUNT as usize);
    assert_eq!(input.occupancy().queued, 0);
    mock.set_passthrough(false);
    for mut buffer in buffers {
        buffer.data_mut()[0] = 1;
        buffer.set_filled_len(1);
        input.release_buffer(buffer).unwrap();
    }
    assert!(wait_until(WAIT, || input.occupancy().queued == BUFFER_COUNT as usize));
    assert_eq!(input.occupancy().with_hardware, 0);
}

#[test]
fn unacknowledged_state_change_times_out() {
    let (core, mock) = loaded_core(short_state_timeout());
    mock.set_ack_states(false);
    let err = core.prepare().unwrap_err();
    assert!(
        matches!(
            err,
            Error::StateTimeout {
                target: State::Idle,
                current: State::Loaded,
                ..
            }
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn error_while_waiting_fails_the_transition() {
    let (core, mock) = loaded_core(CoreSettings::default());
    core.prepare().unwrap();
    mock.fail_state(State::Executing, omx_sys::OMX_ErrorHardware);
    let err = core.start().unwrap_err();
    assert_eq!(err.omx_code(), Some(omx_sys::OMX_ErrorHardware));
    assert_eq!(core.error(), Some(omx_sys::OMX_ErrorHardware));
    assert_eq!(core.state(), State::Idle);
}

#[test]
fn error_raised_while_sending_the_command_fails_the_transition() {
    let (core, mock) = loaded_core(short_state_timeout());
    mock.fail_state_during_command(State::Idle, omx_sys::OMX_ErrorInsufficientResources);
    let err = core.prepare().unwrap_err();
    assert_eq!(err.omx_code(), Some(omx_sys::OMX_ErrorInsufficientResources));
    assert_eq!(core.state(), State::Loaded);
}

#[test]
fn error_before_the_wait_starts_is_not_mistaken_for_a_timeout() {
    let (core, mock) = loaded_core(short_state_timeout());
    core.prepare().unwrap();
    for _ in 0..20 {
        mock.fail_state_during_command(State::Executing, omx_sys::OMX_ErrorHardware);
        let err = core.start().unwrap_err();
        assert!(
            matches!(err, Error::Omx { code } if code == omx_sys::OMX_ErrorHardware),
            "unexpected error: {err}"
        );
        assert_eq!(core.state(), State::Idle);
    }
}

#[test]
fn stale_error_does_not_fail_later_transitions() {
    let (core, mock) = loaded_core(CoreSettings::default());
    core.prepare().unwrap();
    mock.emit(ComponentEvent::Error(omx_sys::OMX_ErrorHardware));
    assert!(wait_until(WAIT, || core.error().is_some()));

    core.start().unwrap();
    assert_eq!(core.state(), State::Executing);
}

#[test]
fn flush_pauses_requests_and_returns_buffers() {
    let (core, mock) = executing_core(CoreSettings::default());
    core.flush_start();
    assert!(core.input_port().request_buffer().is_none());
    assert!(core.output_port().request_buffer().is_none());

    mock.clear_commands();
    core.flush_stop();
    assert_eq!(
        mock.commands(),
        [ComponentCommand::Flush(0), ComponentCommand::Flush(1)]
    );
    assert!(!core.output_port().is_flushing());
    assert!(wait_until(WAIT, || mock.held(1) == BUFFER_COUNT as usize));
    assert!(core.input_port().request_buffer().is_some());
}

#[test]
fn port_disable_and_enable_reallocate() {
    let (core, mock) = executing_core(CoreSettings::default());

    core.disable_port(1).unwrap();
    assert!(!core.output_port().is_enabled());
    assert_eq!(mock.buffer_count(1), 0);
    assert_eq!(core.output_port().occupancy().total, 0);

    core.enable_port(1).unwrap();
    assert!(core.output_port().is_enabled());
    assert_eq!(mock.buffer_count(1), BUFFER_COUNT as usize);
    assert!(wait_until(WAIT, || mock.held(1) == BUFFER_COUNT as usize));
}

#[test]
fn tolerated_init_errors_post_once_then_force_pause() {
    let settings = CoreSettings::for_vendor(Vendor::SlsiExynos);
    let (core, mock) = executing_core(settings);
    let posted = Arc::new(AtomicUsize::new(0));
    {
        let posted = posted.clone();
        core.set_element_error_callback(Arc::new(move |error: &Error| {
            assert_eq!(error.omx_code(), Some(omx_sys::OMX_ErrorMFCInit));
            posted.fetch_add(1, Ordering::SeqCst);
        }));
    }
    mock.clear_commands();

    for _ in 0..=settings.retry_limit {
        mock.emit(ComponentEvent::Error(omx_sys::OMX_ErrorMFCInit));
    }

    assert!(wait_until(WAIT, || core.state() == State::Pause));
    let pauses = mock
        .commands()
        .into_iter()
        .filter(|command| *command == ComponentCommand::StateSet(State::Pause))
        .count();
    assert_eq!(pauses, 1);
    assert_eq!(posted.load(Ordering::SeqCst), 1);
    assert!(!core.post_error_once(&Error::Other("later".to_string())));
}

#[test]
fn tolerated_init_error_does_not_fail_state_wait() {
    let (core, mock) = loaded_core(CoreSettings::for_vendor(Vendor::SlsiExynos));
    core.prepare().unwrap();
    mock.emit(ComponentEvent::Error(omx_sys::OMX_ErrorMFCInit));
    core.start().unwrap();
    assert_eq!(core.state(), State::Executing);
}

#[test]
fn unload_outside_idle_is_a_no_op() {
    let (core, mock) = loaded_core(CoreSettings::default());
    mock.clear_commands();
    core.unload().unwrap();
    core.stop().unwrap();
    assert!(mock.commands().is_empty());
    assert_eq!(core.state(), State::Loaded);
}

#[test]
fn buffer_count_respects_component_minimum() {
    let (core, mock) = loaded_core(CoreSettings::default());
    let err = core.set_buffer_count(1, 1).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");

    core.set_buffer_count(1, 6).unwrap();
    assert_eq!(core.port_definition(1).unwrap().buffer_count_actual, 6);
    core.prepare().unwrap();
    assert_eq!(mock.buffer_count(1), 6);
    assert_eq!(core.output_port().occupancy().total, 6);

    let err = core.set_buffer_count(0, 8).unwrap_err();
    assert!(matches!(err, Error::WrongState { current: State::Idle, .. }));
}
