// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The seam between the core and a hardware component.
//!
//! The core never calls into the vendor library directly. It drives a [`Component`]
//! and receives its asynchronous notifications through [`ComponentCallbacks`]. The
//! production implementation lives in [`crate::ffi`]; tests substitute a scripted
//! component that acknowledges commands from its own thread.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{Error, Result, buffer::OmxBuffer};

/// Lifecycle state of an OMX component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    #[default]
    Invalid,
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
}

impl State {
    /// Maps an `OMX_STATETYPE` value. Unknown values map to [`State::Invalid`].
    pub fn from_raw(value: omx_sys::OMX_STATETYPE) -> Self {
        match value {
            omx_sys::OMX_StateLoaded => State::Loaded,
            omx_sys::OMX_StateIdle => State::Idle,
            omx_sys::OMX_StateExecuting => State::Executing,
            omx_sys::OMX_StatePause => State::Pause,
            omx_sys::OMX_StateWaitForResources => State::WaitForResources,
            _ => State::Invalid,
        }
    }

    pub fn to_raw(self) -> omx_sys::OMX_STATETYPE {
        match self {
            State::Invalid => omx_sys::OMX_StateInvalid,
            State::Loaded => omx_sys::OMX_StateLoaded,
            State::Idle => omx_sys::OMX_StateIdle,
            State::Executing => omx_sys::OMX_StateExecuting,
            State::Pause => omx_sys::OMX_StatePause,
            State::WaitForResources => omx_sys::OMX_StateWaitForResources,
        }
    }

    /// True for the two states in which buffers circulate between the pipeline and
    /// the hardware.
    pub fn is_streaming(self) -> bool {
        matches!(self, State::Executing | State::Pause)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Invalid => "Invalid",
            State::Loaded => "Loaded",
            State::Idle => "Idle",
            State::Executing => "Executing",
            State::Pause => "Pause",
            State::WaitForResources => "WaitForResources",
        };
        f.write_str(name)
    }
}

/// A command sent to the component with `SendCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentCommand {
    StateSet(State),
    Flush(u32),
    PortDisable(u32),
    PortEnable(u32),
}

impl ComponentCommand {
    /// Returns the `(OMX_COMMANDTYPE, nParam1)` pair for this command.
    pub fn to_raw(self) -> (omx_sys::OMX_COMMANDTYPE, u32) {
        match self {
            ComponentCommand::StateSet(state) => (omx_sys::OMX_CommandStateSet, state.to_raw()),
            ComponentCommand::Flush(port) => (omx_sys::OMX_CommandFlush, port),
            ComponentCommand::PortDisable(port) => (omx_sys::OMX_CommandPortDisable, port),
            ComponentCommand::PortEnable(port) => (omx_sys::OMX_CommandPortEnable, port),
        }
    }

    pub fn from_raw(command: omx_sys::OMX_COMMANDTYPE, param: u32) -> Option<Self> {
        match command {
            omx_sys::OMX_CommandStateSet => Some(ComponentCommand::StateSet(State::from_raw(param))),
            omx_sys::OMX_CommandFlush => Some(ComponentCommand::Flush(param)),
            omx_sys::OMX_CommandPortDisable => Some(ComponentCommand::PortDisable(param)),
            omx_sys::OMX_CommandPortEnable => Some(ComponentCommand::PortEnable(param)),
            _ => None,
        }
    }
}

/// An asynchronous notification delivered through the component's event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentEvent {
    /// A previously sent command finished.
    CommandComplete(ComponentCommand),
    /// The component reported an `OMX_ERRORTYPE`.
    Error(u32),
    /// Output parameters changed; `index` is 0 or the index of the changed config.
    PortSettingsChanged { port: u32, index: u32 },
    /// A buffer carrying `flags` (typically EOS) left the component.
    BufferFlag { port: u32, flags: u32 },
    /// Anything the core does not act upon.
    Other { event: u32, data1: u32, data2: u32 },
}

impl ComponentEvent {
    pub fn from_raw(event: omx_sys::OMX_EVENTTYPE, data1: u32, data2: u32) -> Self {
        match event {
            omx_sys::OMX_EventCmdComplete => match ComponentCommand::from_raw(data1, data2) {
                Some(command) => ComponentEvent::CommandComplete(command),
                None => ComponentEvent::Other { event, data1, data2 },
            },
            omx_sys::OMX_EventError => ComponentEvent::Error(data1),
            omx_sys::OMX_EventPortSettingsChanged => ComponentEvent::PortSettingsChanged {
                port: data1,
                index: data2,
            },
            omx_sys::OMX_EventBufferFlag => ComponentEvent::BufferFlag {
                port: data1,
                flags: data2,
            },
            _ => ComponentEvent::Other { event, data1, data2 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortDirection {
    #[default]
    Input,
    Output,
}

impl PortDirection {
    pub fn from_raw(value: omx_sys::OMX_DIRTYPE) -> Self {
        if value == omx_sys::OMX_DirOutput {
            PortDirection::Output
        } else {
            PortDirection::Input
        }
    }
}

/// The subset of `OMX_PARAM_PORTDEFINITIONTYPE` the core and the elements use.
///
/// Video fields are only meaningful when `is_video` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDefinition {
    pub index: u32,
    pub direction: PortDirection,
    pub buffer_count_actual: u32,
    pub buffer_count_min: u32,
    pub buffer_size: u32,
    pub enabled: bool,
    pub is_video: bool,
    pub frame_width: u32,
    pub frame_height: u32,
    pub stride: i32,
    pub slice_height: u32,
    pub color_format: u32,
    pub compression_format: u32,
}

impl PortDefinition {
    /// Reads the fields out of a raw definition returned by `GetParameter`.
    pub fn from_raw(raw: &omx_sys::OMX_PARAM_PORTDEFINITIONTYPE) -> Self {
        let is_video = raw.eDomain == omx_sys::OMX_PortDomainVideo;
        let mut definition = PortDefinition {
            index: raw.nPortIndex,
            direction: PortDirection::from_raw(raw.eDir),
            buffer_count_actual: raw.nBufferCountActual,
            buffer_count_min: raw.nBufferCountMin,
            buffer_size: raw.nBufferSize,
            enabled: raw.bEnabled != omx_sys::OMX_FALSE,
            is_video,
            ..Default::default()
        };
        if is_video {
            // Safety: the domain says the union holds the video variant.
            let video = unsafe { raw.format.video };
            definition.frame_width = video.nFrameWidth;
            definition.frame_height = video.nFrameHeight;
            definition.stride = video.nStride;
            definition.slice_height = video.nSliceHeight;
            definition.color_format = video.eColorFormat;
            definition.compression_format = video.eCompressionFormat;
        }
        definition
    }

    /// Writes the writable fields back into a raw definition before `SetParameter`.
    pub fn apply_to(&self, raw: &mut omx_sys::OMX_PARAM_PORTDEFINITIONTYPE) {
        raw.nPortIndex = self.index;
        raw.nBufferCountActual = self.buffer_count_actual;
        raw.nBufferSize = self.buffer_size;
        if self.is_video && raw.eDomain == omx_sys::OMX_PortDomainVideo {
            // Safety: the domain says the union holds the video variant.
            let video = unsafe { &mut raw.format.video };
            video.nFrameWidth = self.frame_width;
            video.nFrameHeight = self.frame_height;
            video.nStride = self.stride;
            video.nSliceHeight = self.slice_height;
            video.eColorFormat = self.color_format;
            video.eCompressionFormat = self.compression_format;
        }
    }

    /// True when the output carries vendor image descriptors instead of pixels.
    pub fn is_hardware_addressable(&self) -> bool {
        crate::surface::is_surface_format(self.color_format)
    }
}

/// Output crop rectangle (`OMX_IndexConfigCommonOutputCrop`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

/// A buffer the component refused to take, handed back with the failure.
#[derive(Debug)]
pub struct Rejected {
    pub buffer: OmxBuffer,
    pub error: Error,
}

/// Synchronous calls into a hardware component.
///
/// All methods may be called from any thread. Completion of `send_command`,
/// `empty_this_buffer` and `fill_this_buffer` is reported later through
/// [`ComponentCallbacks`], possibly before the call has even returned.
pub trait Component: Send + Sync {
    /// Component name as passed to `OMX_GetHandle`.
    fn name(&self) -> &str;

    fn send_command(&self, command: ComponentCommand) -> Result<()>;

    fn port_definition(&self, port: u32) -> Result<PortDefinition>;

    fn set_port_definition(&self, definition: &PortDefinition) -> Result<()>;

    /// Sets `OMX_IndexParamStandardComponentRole`.
    fn set_role(&self, role: &str) -> Result<()>;

    fn output_crop(&self, port: u32) -> Result<CropRect>;

    /// Lets the component allocate a buffer of `size` bytes for `port`.
    ///
    /// `slot` is stored in the header's `pAppPrivate` and identifies the buffer in the
    /// port's slot table.
    fn allocate_buffer(&self, port: u32, size: u32, slot: usize) -> Result<OmxBuffer>;

    /// Hands `size` bytes at `data` to the component as the payload of a new header.
    ///
    /// # Safety
    ///
    /// `data` must stay valid for writes of `size` bytes until the header is freed
    /// with [`Component::free_buffer`] or its payload pointer is replaced.
    unsafe fn use_buffer(&self, port: u32, size: u32, data: *mut u8, slot: usize)
    -> Result<OmxBuffer>;

    /// Frees a header obtained from `allocate_buffer` or `use_buffer`.
    fn free_buffer(&self, port: u32, buffer: OmxBuffer) -> Result<()>;

    /// Gives a filled input buffer to the component.
    fn empty_this_buffer(&self, buffer: OmxBuffer) -> std::result::Result<(), Rejected>;

    /// Gives an empty output buffer to the component.
    fn fill_this_buffer(&self, buffer: OmxBuffer) -> std::result::Result<(), Rejected>;
}

/// Receiver of the component's asynchronous notifications.
///
/// Implementations run on threads owned by the component and must never block on a
/// round trip to the component.
pub trait ComponentCallbacks: Send + Sync {
    fn event(&self, event: ComponentEvent);

    /// An input buffer was consumed and is owned by the application again.
    fn empty_buffer_done(&self, buffer: OmxBuffer);

    /// An output buffer was filled and is owned by the application again.
    fn fill_buffer_done(&self, buffer: OmxBuffer);
}

/// Creates components bound to a set of callbacks.
pub trait ComponentFactory: Send + Sync {
    fn create(&self, callbacks: Arc<dyn ComponentCallbacks>) -> Result<Arc<dyn Component>>;
}

/// The component handle shared by the core, its ports and its command worker.
///
/// Empty before `init` and after `deinit`.
#[derive(Default)]
pub(crate) struct ComponentSlot {
    component: RwLock<Option<Arc<dyn Component>>>,
}

impl ComponentSlot {
    pub(crate) fn get(&self) -> Result<Arc<dyn Component>> {
        self.component
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotInitialized)
    }

    pub(crate) fn set(&self, component: Arc<dyn Component>) {
        *self.component.write().unwrap_or_else(PoisonError::into_inner) = Some(component);
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn Component>> {
        self.component.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.component.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_complete_events_decode() {
        let event = ComponentEvent::from_raw(
            omx_sys::OMX_EventCmdComplete,
            omx_sys::OMX_CommandStateSet,
            omx_sys::OMX_StateIdle,
        );
        assert_eq!(
            event,
            ComponentEvent::CommandComplete(ComponentCommand::StateSet(State::Idle))
        );

        let event = ComponentEvent::from_raw(omx_sys::OMX_EventCmdComplete, 42, 1);
        assert!(matches!(event, ComponentEvent::Other { data1: 42, .. }));
    }

    #[test]
    fn states_round_trip_through_raw_values() {
        for state in [
            State::Loaded,
            State::Idle,
            State::Executing,
            State::Pause,
            State::WaitForResources,
        ] {
            assert_eq!(State::from_raw(state.to_raw()), state);
        }
        assert_eq!(State::from_raw(77), State::Invalid);
        assert_eq!(State::Executing.to_string(), "Executing");
    }

    #[test]
    fn port_definition_reads_video_fields() {
        let mut raw: omx_sys::OMX_PARAM_PORTDEFINITIONTYPE = omx_sys::OmxStruct::init();
        raw.nPortIndex = 1;
        raw.eDir = omx_sys::OMX_DirOutput;
        raw.nBufferCountActual = 6;
        raw.nBufferCountMin = 4;
        raw.eDomain = omx_sys::OMX_PortDomainVideo;
        unsafe {
            raw.format.video.nFrameWidth = 1920;
            raw.format.video.nFrameHeight = 1080;
            raw.format.video.eColorFormat = omx_sys::OMX_EXT_COLOR_FormatNV12T_Phyaddr_Fd;
        }

        let definition = PortDefinition::from_raw(&raw);
        assert_eq!(definition.direction, PortDirection::Output);
        assert_eq!((definition.frame_width, definition.frame_height), (1920, 1080));
        assert!(definition.is_hardware_addressable());

        let mut copy = raw;
        let mut changed = definition.clone();
        changed.buffer_count_actual = 8;
        changed.apply_to(&mut copy);
        assert_eq!(copy.nBufferCountActual, 8);
        assert_eq!(copy.nBufferCountMin, 4);
    }
}
