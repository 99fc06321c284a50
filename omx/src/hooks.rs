// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Per-codec specialization of the streaming filter.
//!
//! Codec elements only translate their format into component parameters. They do so
//! by implementing [`CodecHooks`]; every hook has a default that does nothing, so an
//! implementation only overrides what it needs.

use crate::{
    Result,
    core::Core,
    streaming::{InputFrame, OutputFrame},
};

/// What kind of codec the component implements. Changes how EOS is fed to the input
/// port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecType {
    #[default]
    Default,
    VideoDecoder,
    VideoEncoder,
    AudioDecoder,
}

/// Verdict of a processing hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    /// Go on with the frame.
    Ok,
    /// Drop the frame silently.
    Skip,
    /// Drop the frame and fail the stream.
    Error,
}

pub trait CodecHooks: Send + Sync {
    fn codec_type(&self) -> CodecType {
        CodecType::Default
    }

    /// Called once the component handle exists.
    fn instance_init(&self, _core: &Core) {}

    /// Called before the component handle is released.
    fn instance_deinit(&self, _core: &Core) {}

    /// Configures the ports while the component is still Loaded, right before the
    /// buffers are allocated.
    ///
    /// # Errors
    ///
    /// An error aborts the Loaded → Idle transition.
    fn setup(&self, _core: &Core) -> Result<()> {
        Ok(())
    }

    /// Inspects or rewrites an input frame before it is fed to the component.
    fn process_input(&self, _core: &Core, _frame: &mut InputFrame) -> HookResult {
        HookResult::Ok
    }

    /// Inspects or rewrites an output frame before it is pushed downstream.
    fn process_output(&self, _core: &Core, _frame: &mut OutputFrame) -> HookResult {
        HookResult::Ok
    }

    /// Receives codec configuration data produced by the component.
    fn process_output_caps(&self, _core: &Core, _codec_config: &[u8]) {}
}

/// Hooks for a filter without codec-specific behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl CodecHooks for NoHooks {}
