// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for OMX operations.
//!
//! This module defines the error types returned by the core, mapping
//! `OMX_ERRORTYPE` codes reported by a component to idiomatic Rust error enums.

use std::time::Duration;

use crate::component::State;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving an OMX component.
///
/// Hardware status codes are kept verbatim in [`Error::Omx`] so that callers can
/// match on specific vendor codes (for example the MFC init failure), while
/// protocol and allocation failures get their own variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A component call or asynchronous error event returned a failure code.
    #[error("OMX error: {}", describe(.code))]
    Omx { code: u32 },

    /// The component did not acknowledge a requested state change in time.
    #[error("Timed out after {timeout:?} waiting for state {target} (current {current})")]
    StateTimeout {
        target: State,
        current: State,
        timeout: Duration,
    },

    /// An operation was requested in a state that does not allow it.
    #[error("Wrong state: {current} (expected {expected})")]
    WrongState { expected: State, current: State },

    /// The core has no component handle (not initialized or already released).
    #[error("Component not initialized")]
    NotInitialized,

    /// The requested port index is unknown or the port was never set up.
    #[error("Port {0} is not initialized")]
    PortUninitialized(u32),

    /// Memory or buffer allocation failed.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// A bounded wait other than a state change expired.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid configuration (missing library, malformed config file, ...).
    #[error("Configuration: {0}")]
    Config(String),

    /// A generic error for Rust-level failures not directly mapped to OMX errors.
    #[error("Other error: {0}")]
    Other(String),

    /// Failed to convert a Rust string to a C-compatible null-terminated string.
    #[error("Null string: {0}")]
    NulString(#[from] std::ffi::NulError),

    /// Failed to load or resolve the vendor core library.
    #[error("Loading library: {0}")]
    LibLoading(#[from] libloading::Error),

    /// Failed to read a configuration file.
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a configuration file.
    #[error("Parsing configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Converts an `OMX_ERRORTYPE` returned by a component call to a [`Result`].
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let status = unsafe { send_command(handle, cmd, param, ptr::null_mut()) };
    /// Error::from_omx(status)?;
    /// ```
    pub fn from_omx(code: omx_sys::OMX_ERRORTYPE) -> Result<()> {
        match code {
            omx_sys::OMX_ErrorNone => Ok(()),
            code => Err(Error::Omx { code }),
        }
    }

    /// Returns the raw OMX error code if this error came from the component.
    pub fn omx_code(&self) -> Option<u32> {
        match self {
            Error::Omx { code } => Some(*code),
            _ => None,
        }
    }
}

fn describe(code: &u32) -> String {
    format!("{} (0x{code:08x})", error_description(*code))
}

/// Human readable description of an `OMX_ERRORTYPE` value, for logs.
pub fn error_description(code: omx_sys::OMX_ERRORTYPE) -> &'static str {
    match code {
        omx_sys::OMX_ErrorNone => "None",
        omx_sys::OMX_ErrorInsufficientResources => {
            "There were insufficient resources to perform the requested operation"
        }
        omx_sys::OMX_ErrorUndefined => "The cause of the error could not be determined",
        omx_sys::OMX_ErrorInvalidComponentName => "The component name string was not valid",
        omx_sys::OMX_ErrorComponentNotFound => {
            "No component with the specified name string was found"
        }
        omx_sys::OMX_ErrorInvalidComponent => "The component specified did not have an entry point",
        omx_sys::OMX_ErrorBadParameter => "One or more parameters were not valid",
        omx_sys::OMX_ErrorNotImplemented => "The requested function is not implemented",
        omx_sys::OMX_ErrorUnderflow => "The buffer was emptied before the next buffer was ready",
        omx_sys::OMX_ErrorOverflow => "The buffer was not available when it was needed",
        omx_sys::OMX_ErrorHardware => "The hardware failed to respond as expected",
        omx_sys::OMX_ErrorInvalidState => "The component is in invalid state",
        omx_sys::OMX_ErrorStreamCorrupt => "Stream is found to be corrupt",
        omx_sys::OMX_ErrorPortsNotCompatible => "Ports being connected are not compatible",
        omx_sys::OMX_ErrorResourcesLost => "Resources allocated to an idle component have been lost",
        omx_sys::OMX_ErrorNoMore => "No more indices can be enumerated",
        omx_sys::OMX_ErrorVersionMismatch => "The component detected a version mismatch",
        omx_sys::OMX_ErrorNotReady => "The component is not ready to return data at this time",
        omx_sys::OMX_ErrorTimeout => "There was a timeout that occurred",
        omx_sys::OMX_ErrorSameState => "The component is already in the requested state",
        omx_sys::OMX_ErrorResourcesPreempted => {
            "Resources allocated to an executing or paused component have been preempted"
        }
        omx_sys::OMX_ErrorPortUnresponsiveDuringAllocation => {
            "Waited an unusually long time for the supplier to allocate buffers"
        }
        omx_sys::OMX_ErrorPortUnresponsiveDuringDeallocation => {
            "Waited an unusually long time for the supplier to de-allocate buffers"
        }
        omx_sys::OMX_ErrorPortUnresponsiveDuringStop => {
            "Waited an unusually long time for the non-supplier to return a buffer during stop"
        }
        omx_sys::OMX_ErrorIncorrectStateTransition => "Attempting a state transition that is not allowed",
        omx_sys::OMX_ErrorIncorrectStateOperation => {
            "Attempting a command that is not allowed during the present state"
        }
        omx_sys::OMX_ErrorUnsupportedSetting => {
            "The values encapsulated in the parameter or config structure are not supported"
        }
        omx_sys::OMX_ErrorUnsupportedIndex => {
            "The parameter or config indicated by the given index is not supported"
        }
        omx_sys::OMX_ErrorBadPortIndex => "The port index supplied is incorrect",
        omx_sys::OMX_ErrorPortUnpopulated => {
            "The port has lost one or more of its buffers and it thus unpopulated"
        }
        omx_sys::OMX_ErrorComponentSuspended => "Component suspended due to temporary loss of resources",
        omx_sys::OMX_ErrorDynamicResourcesUnavailable => {
            "Component suspended due to an inability to acquire dynamic resources"
        }
        omx_sys::OMX_ErrorMbErrorsInFrame => "Frame generated macroblock error",
        omx_sys::OMX_ErrorFormatNotDetected => "Cannot parse or determine the format of an input stream",
        omx_sys::OMX_ErrorContentPipeOpenFailed => "The content open operation failed",
        omx_sys::OMX_ErrorContentPipeCreationFailed => "The content creation operation failed",
        omx_sys::OMX_ErrorSeperateTablesUsed => "Separate table information is being used",
        omx_sys::OMX_ErrorTunnelingUnsupported => "Tunneling is unsupported by the component",
        omx_sys::OMX_ErrorMFCInit => "The codec hardware failed to initialize",
        _ => "Unknown error",
    }
}
