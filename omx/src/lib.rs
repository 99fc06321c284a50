// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # OMX - OpenMAX IL hardware codec core
//!
//! Safe Rust driver for vendor OpenMAX IL components, providing the state machine,
//! port and buffer bookkeeping and streaming loops needed to run a hardware codec
//! from a media pipeline element.
//!
//! ## Overview
//!
//! A vendor ships a core library exporting `OMX_Init`, `OMX_GetHandle` and friends.
//! This crate loads such libraries through the raw FFI in [`omx_sys`], creates
//! components from them and drives them with RAII resource management. Everything
//! above the FFI talks to the [`Component`] trait, so the logic can be exercised
//! without hardware.
//!
//! ### Key Concepts
//!
//! - **Core**: One component instance and its state machine ([`Core`])
//! - **Port**: Input or output buffer pool of a component ([`Port`])
//! - **Buffer**: A buffer header owned by the application ([`OmxBuffer`])
//! - **Reconfiguration**: Dynamic resolution change handling ([`Reconfiguration`])
//! - **Filter**: Streaming glue between a pipeline element and a core ([`Filter`])
//!
//! ### Buffer Sharing
//!
//! Buffers are either allocated by the component, or built around memory that comes
//! from the pipeline. The choice is made per port from the environment, see
//! [`SharingPolicy`]. Output ports of hardware that produces tiled or linear NV12
//! surfaces may hand out surface descriptors instead of bytes ([`Surface`]).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  request  ┌──────────────┐
//! │ Registry │ ────────► │ LibraryHandle│  (OMX_Init / OMX_Deinit)
//! └──────────┘           └──────┬───────┘
//!                               │ OMX_GetHandle
//! ┌────────┐   chain()   ┌──────▼───────┐   events   ┌──────────────┐
//! │ Filter │ ──────────► │     Core     │ ◄───────── │  component   │
//! └───┬────┘             │  ├─ Port 0   │            └──────────────┘
//!     │ output task      │  ├─ Port 1   │
//!     └────────────────► │  └─ commands │  (worker thread)
//!                        └──────────────┘
//! ```
//!
//! ## Examples
//!
//! ### Bringing a decoder to Executing
//!
//! ```no_run
//! use omx::{Core, CoreSettings, OmxComponentFactory, Vendor};
//!
//! # fn main() -> Result<(), omx::Error> {
//! let factory = OmxComponentFactory::new("libOMX.Core.so", "OMX.vendor.video_decoder.avc");
//! let core = Core::new("avcdec", CoreSettings::for_vendor(Vendor::Default));
//! core.init(&factory, Some("video_decoder.avc"))?;
//!
//! // Allocate buffers on both ports and start the component
//! core.prepare()?;
//! core.start()?;
//!
//! // ... feed the input port, drain the output port ...
//!
//! core.stop()?;
//! core.unload()?;
//! core.deinit();
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - [`Core`] is cheap to clone and can be used from any thread
//! - Component callbacks arrive on threads owned by the vendor library and only
//!   touch state behind the core's locks
//! - Commands that must not run on a callback thread go through a single worker
//!   that executes them in order

mod adapter;
mod buffer;
mod command;
mod component;
mod core;
mod error;
mod ffi;
mod hooks;
mod port;
mod queue;
mod reconfig;
mod registry;
mod streaming;
mod surface;

pub mod config;

pub use buffer::{BufferFlags, OmxBuffer, SharedMemory};
pub use command::{Command, CommandQueue};
pub use component::{
    Component, ComponentCallbacks, ComponentCommand, ComponentEvent, ComponentFactory, CropRect,
    PortDefinition, PortDirection, Rejected, State,
};
pub use config::{Capabilities, CoreSettings, SharingMode, SharingPolicy, Timeouts, Vendor};
pub use self::core::{
    Core, ElementErrorCallback, INPUT_PORT, OUTPUT_PORT, SettingsChangedCallback, WeakCore,
};
pub use error::{Error, Result, error_description};
pub use ffi::OmxComponentFactory;
pub use hooks::{CodecHooks, CodecType, HookResult, NoHooks};
pub use omx_sys::ScmnImgb;
pub use port::{Disposal, Occupancy, Port};
pub use queue::{AsyncQueue, Semaphore};
pub use reconfig::{ReconfState, Reconfiguration, SettingsChange};
pub use registry::{CoreLibrary, LibraryHandle, Registry};
pub use streaming::{
    FilterSettings, Filter, FlowError, FlowResult, InputFrame, LiveBuffers, OMX_TICKS_PER_SECOND,
    OutputFrame, OutputGuard, OutputPayload, SourcePad, from_ticks, interpolate, to_ticks,
};
pub use surface::{
    Surface, SurfaceAllocator, align, descriptor_bytes, flush_buffer_size, flush_descriptor,
    is_surface_format, plane_sizes,
};
