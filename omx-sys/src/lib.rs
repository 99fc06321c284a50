// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! # omx-sys: Raw FFI bindings to OpenMAX IL 1.1.2
//!
//! This crate provides low-level, unsafe Rust definitions of the OpenMAX IL types
//! used to drive vendor hardware codec components, plus a [`libloading`] based
//! symbol table ([`OmxCoreLibrary`]) for the four core entry points of a vendor
//! library (`OMX_Init`, `OMX_Deinit`, `OMX_GetHandle`, `OMX_FreeHandle`).
//!
//! ## Overview
//!
//! `omx-sys` exposes:
//! - Raw C structs (`OMX_BUFFERHEADERTYPE`, `OMX_PARAM_PORTDEFINITIONTYPE`,
//!   `OMX_COMPONENTTYPE`, `OMX_CALLBACKTYPE`, ...)
//! - Constants for error codes, states, commands, events, indexes and buffer flags
//! - The vendor image descriptor ([`ScmnImgb`]) used for zero-copy output buffers
//!
//! ## Usage
//!
//! **Most users should NOT use this crate directly.** Use the safe `omx` wrapper
//! crate instead, which provides:
//! - Ownership tracking of buffer headers
//! - Rust-idiomatic error handling with `Result`
//! - The port, command and state machinery around a component
//!
//! ## Safety
//!
//! All functions reached through this crate are `unsafe` and require the caller
//! to uphold OpenMAX invariants:
//! - `OMX_Init` must be called before `OMX_GetHandle`
//! - Buffer headers belong to the component that allocated them
//! - Callbacks may be invoked from any thread owned by the vendor library
//! - Null checks are the caller's responsibility

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

use std::ffi::{OsStr, c_char, c_void};

pub type OMX_U8 = u8;
pub type OMX_U32 = u32;
pub type OMX_S32 = i32;
pub type OMX_BOOL = u32;
pub type OMX_PTR = *mut c_void;
pub type OMX_STRING = *mut c_char;
pub type OMX_HANDLETYPE = *mut c_void;
pub type OMX_TICKS = i64;
pub type OMX_ERRORTYPE = u32;
pub type OMX_INDEXTYPE = u32;
pub type OMX_STATETYPE = u32;
pub type OMX_COMMANDTYPE = u32;
pub type OMX_EVENTTYPE = u32;
pub type OMX_DIRTYPE = u32;
pub type OMX_PORTDOMAINTYPE = u32;
pub type OMX_COLOR_FORMATTYPE = u32;
pub type OMX_VIDEO_CODINGTYPE = u32;
pub type OMX_AUDIO_CODINGTYPE = u32;

pub const OMX_FALSE: OMX_BOOL = 0;
pub const OMX_TRUE: OMX_BOOL = 1;

/// Specification version 1.1.2.0 packed as `nVersionMajor..nStep`.
pub const OMX_VERSION: u32 = 0x0002_0101;

pub const OMX_MAX_STRINGNAME_SIZE: usize = 128;
pub const OMX_TICKS_PER_SECOND: i64 = 1_000_000;
pub const OMX_ALL: u32 = 0xFFFF_FFFF;

// OMX_ERRORTYPE
pub const OMX_ErrorNone: OMX_ERRORTYPE = 0;
pub const OMX_ErrorInsufficientResources: OMX_ERRORTYPE = 0x8000_1000;
pub const OMX_ErrorUndefined: OMX_ERRORTYPE = 0x8000_1001;
pub const OMX_ErrorInvalidComponentName: OMX_ERRORTYPE = 0x8000_1002;
pub const OMX_ErrorComponentNotFound: OMX_ERRORTYPE = 0x8000_1003;
pub const OMX_ErrorInvalidComponent: OMX_ERRORTYPE = 0x8000_1004;
pub const OMX_ErrorBadParameter: OMX_ERRORTYPE = 0x8000_1005;
pub const OMX_ErrorNotImplemented: OMX_ERRORTYPE = 0x8000_1006;
pub const OMX_ErrorUnderflow: OMX_ERRORTYPE = 0x8000_1007;
pub const OMX_ErrorOverflow: OMX_ERRORTYPE = 0x8000_1008;
pub const OMX_ErrorHardware: OMX_ERRORTYPE = 0x8000_1009;
pub const OMX_ErrorInvalidState: OMX_ERRORTYPE = 0x8000_100A;
pub const OMX_ErrorStreamCorrupt: OMX_ERRORTYPE = 0x8000_100B;
pub const OMX_ErrorPortsNotCompatible: OMX_ERRORTYPE = 0x8000_100C;
pub const OMX_ErrorResourcesLost: OMX_ERRORTYPE = 0x8000_100D;
pub const OMX_ErrorNoMore: OMX_ERRORTYPE = 0x8000_100E;
pub const OMX_ErrorVersionMismatch: OMX_ERRORTYPE = 0x8000_100F;
pub const OMX_ErrorNotReady: OMX_ERRORTYPE = 0x8000_1010;
pub const OMX_ErrorTimeout: OMX_ERRORTYPE = 0x8000_1011;
pub const OMX_ErrorSameState: OMX_ERRORTYPE = 0x8000_1012;
pub const OMX_ErrorResourcesPreempted: OMX_ERRORTYPE = 0x8000_1013;
pub const OMX_ErrorPortUnresponsiveDuringAllocation: OMX_ERRORTYPE = 0x8000_1014;
pub const OMX_ErrorPortUnresponsiveDuringDeallocation: OMX_ERRORTYPE = 0x8000_1015;
pub const OMX_ErrorPortUnresponsiveDuringStop: OMX_ERRORTYPE = 0x8000_1016;
pub const OMX_ErrorIncorrectStateTransition: OMX_ERRORTYPE = 0x8000_1017;
pub const OMX_ErrorIncorrectStateOperation: OMX_ERRORTYPE = 0x8000_1018;
pub const OMX_ErrorUnsupportedSetting: OMX_ERRORTYPE = 0x8000_1019;
pub const OMX_ErrorUnsupportedIndex: OMX_ERRORTYPE = 0x8000_101A;
pub const OMX_ErrorBadPortIndex: OMX_ERRORTYPE = 0x8000_101B;
pub const OMX_ErrorPortUnpopulated: OMX_ERRORTYPE = 0x8000_101C;
pub const OMX_ErrorComponentSuspended: OMX_ERRORTYPE = 0x8000_101D;
pub const OMX_ErrorDynamicResourcesUnavailable: OMX_ERRORTYPE = 0x8000_101E;
pub const OMX_ErrorMbErrorsInFrame: OMX_ERRORTYPE = 0x8000_101F;
pub const OMX_ErrorFormatNotDetected: OMX_ERRORTYPE = 0x8000_1020;
pub const OMX_ErrorContentPipeOpenFailed: OMX_ERRORTYPE = 0x8000_1021;
pub const OMX_ErrorContentPipeCreationFailed: OMX_ERRORTYPE = 0x8000_1022;
pub const OMX_ErrorSeperateTablesUsed: OMX_ERRORTYPE = 0x8000_1023;
pub const OMX_ErrorTunnelingUnsupported: OMX_ERRORTYPE = 0x8000_1024;
/// Vendor extension: the MFC codec block failed to initialize.
pub const OMX_ErrorMFCInit: OMX_ERRORTYPE = 0x9000_0004;

// OMX_STATETYPE
pub const OMX_StateInvalid: OMX_STATETYPE = 0;
pub const OMX_StateLoaded: OMX_STATETYPE = 1;
pub const OMX_StateIdle: OMX_STATETYPE = 2;
pub const OMX_StateExecuting: OMX_STATETYPE = 3;
pub const OMX_StatePause: OMX_STATETYPE = 4;
pub const OMX_StateWaitForResources: OMX_STATETYPE = 5;

// OMX_COMMANDTYPE
pub const OMX_CommandStateSet: OMX_COMMANDTYPE = 0;
pub const OMX_CommandFlush: OMX_COMMANDTYPE = 1;
pub const OMX_CommandPortDisable: OMX_COMMANDTYPE = 2;
pub const OMX_CommandPortEnable: OMX_COMMANDTYPE = 3;
pub const OMX_CommandMarkBuffer: OMX_COMMANDTYPE = 4;

// OMX_EVENTTYPE
pub const OMX_EventCmdComplete: OMX_EVENTTYPE = 0;
pub const OMX_EventError: OMX_EVENTTYPE = 1;
pub const OMX_EventMark: OMX_EVENTTYPE = 2;
pub const OMX_EventPortSettingsChanged: OMX_EVENTTYPE = 3;
pub const OMX_EventBufferFlag: OMX_EVENTTYPE = 4;
pub const OMX_EventResourcesAcquired: OMX_EVENTTYPE = 5;
pub const OMX_EventComponentResumed: OMX_EVENTTYPE = 6;
pub const OMX_EventDynamicResourcesAvailable: OMX_EVENTTYPE = 7;
pub const OMX_EventPortFormatDetected: OMX_EVENTTYPE = 8;

// OMX_DIRTYPE
pub const OMX_DirInput: OMX_DIRTYPE = 0;
pub const OMX_DirOutput: OMX_DIRTYPE = 1;

// OMX_PORTDOMAINTYPE
pub const OMX_PortDomainAudio: OMX_PORTDOMAINTYPE = 0;
pub const OMX_PortDomainVideo: OMX_PORTDOMAINTYPE = 1;
pub const OMX_PortDomainImage: OMX_PORTDOMAINTYPE = 2;
pub const OMX_PortDomainOther: OMX_PORTDOMAINTYPE = 3;

// OMX_INDEXTYPE
pub const OMX_IndexParamStandardComponentRole: OMX_INDEXTYPE = 0x0100_0017;
pub const OMX_IndexParamPortDefinition: OMX_INDEXTYPE = 0x0200_0001;
pub const OMX_IndexConfigCommonOutputCrop: OMX_INDEXTYPE = 0x0700_000F;

// Buffer flags
pub const OMX_BUFFERFLAG_EOS: u32 = 0x0000_0001;
pub const OMX_BUFFERFLAG_STARTTIME: u32 = 0x0000_0002;
pub const OMX_BUFFERFLAG_DECODEONLY: u32 = 0x0000_0004;
pub const OMX_BUFFERFLAG_DATACORRUPT: u32 = 0x0000_0008;
pub const OMX_BUFFERFLAG_ENDOFFRAME: u32 = 0x0000_0010;
pub const OMX_BUFFERFLAG_SYNCFRAME: u32 = 0x0000_0020;
pub const OMX_BUFFERFLAG_EXTRADATA: u32 = 0x0000_0040;
pub const OMX_BUFFERFLAG_CODECCONFIG: u32 = 0x0000_0080;

// OMX_COLOR_FORMATTYPE
pub const OMX_COLOR_FormatUnused: OMX_COLOR_FORMATTYPE = 0;
pub const OMX_COLOR_FormatYUV420Planar: OMX_COLOR_FORMATTYPE = 19;
pub const OMX_COLOR_FormatYUV420PackedPlanar: OMX_COLOR_FORMATTYPE = 20;
pub const OMX_COLOR_FormatYUV420SemiPlanar: OMX_COLOR_FORMATTYPE = 21;
pub const OMX_COLOR_FormatYCbYCr: OMX_COLOR_FORMATTYPE = 25;
pub const OMX_COLOR_FormatCbYCrY: OMX_COLOR_FORMATTYPE = 27;
/// Vendor extension: tiled NV12 addressed through dmabuf file descriptors.
pub const OMX_EXT_COLOR_FormatNV12T_Phyaddr_Fd: OMX_COLOR_FORMATTYPE = 0x7F00_0001;
/// Vendor extension: linear NV12 addressed through dmabuf file descriptors.
pub const OMX_EXT_COLOR_FormatNV12L_Phyaddr_Fd: OMX_COLOR_FORMATTYPE = 0x7F00_0002;

/// Common header of every OMX parameter and config structure.
pub trait OmxStruct: Sized {
    /// Returns a zeroed structure with `nSize` and `nVersion` filled in.
    fn init() -> Self;
}

macro_rules! omx_struct {
    ($name:ident) => {
        impl Default for $name {
            fn default() -> Self {
                // Safety: plain C data made of integers, raw pointers and unions
                // thereof, all of which are valid when zeroed.
                unsafe { std::mem::zeroed() }
            }
        }

        impl OmxStruct for $name {
            fn init() -> Self {
                let mut value = Self::default();
                value.nSize = std::mem::size_of::<Self>() as u32;
                value.nVersion = OMX_VERSION;
                value
            }
        }
    };
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_BUFFERHEADERTYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_U32,
    pub pBuffer: *mut OMX_U8,
    pub nAllocLen: OMX_U32,
    pub nFilledLen: OMX_U32,
    pub nOffset: OMX_U32,
    pub pAppPrivate: OMX_PTR,
    pub pPlatformPrivate: OMX_PTR,
    pub pInputPortPrivate: OMX_PTR,
    pub pOutputPortPrivate: OMX_PTR,
    pub hMarkTargetComponent: OMX_HANDLETYPE,
    pub pMarkData: OMX_PTR,
    pub nTickCount: OMX_U32,
    pub nTimeStamp: OMX_TICKS,
    pub nFlags: OMX_U32,
    pub nOutputPortIndex: OMX_U32,
    pub nInputPortIndex: OMX_U32,
}
omx_struct!(OMX_BUFFERHEADERTYPE);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_AUDIO_PORTDEFINITIONTYPE {
    pub cMIMEType: OMX_STRING,
    pub pNativeRender: OMX_PTR,
    pub bFlagErrorConcealment: OMX_BOOL,
    pub eEncoding: OMX_AUDIO_CODINGTYPE,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_VIDEO_PORTDEFINITIONTYPE {
    pub cMIMEType: OMX_STRING,
    pub pNativeRender: OMX_PTR,
    pub nFrameWidth: OMX_U32,
    pub nFrameHeight: OMX_U32,
    pub nStride: OMX_S32,
    pub nSliceHeight: OMX_U32,
    pub nBitrate: OMX_U32,
    pub xFramerate: OMX_U32,
    pub bFlagErrorConcealment: OMX_BOOL,
    pub eCompressionFormat: OMX_VIDEO_CODINGTYPE,
    pub eColorFormat: OMX_COLOR_FORMATTYPE,
    pub pNativeWindow: OMX_PTR,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_OTHER_PORTDEFINITIONTYPE {
    pub eFormat: OMX_U32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union OMX_PORTDEFINITIONFORMAT {
    pub audio: OMX_AUDIO_PORTDEFINITIONTYPE,
    pub video: OMX_VIDEO_PORTDEFINITIONTYPE,
    pub other: OMX_OTHER_PORTDEFINITIONTYPE,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct OMX_PARAM_PORTDEFINITIONTYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_U32,
    pub nPortIndex: OMX_U32,
    pub eDir: OMX_DIRTYPE,
    pub nBufferCountActual: OMX_U32,
    pub nBufferCountMin: OMX_U32,
    pub nBufferSize: OMX_U32,
    pub bEnabled: OMX_BOOL,
    pub bPopulated: OMX_BOOL,
    pub eDomain: OMX_PORTDOMAINTYPE,
    pub format: OMX_PORTDEFINITIONFORMAT,
    pub bBuffersContiguous: OMX_BOOL,
    pub nBufferAlignment: OMX_U32,
}
omx_struct!(OMX_PARAM_PORTDEFINITIONTYPE);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_PARAM_COMPONENTROLETYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_U32,
    pub cRole: [OMX_U8; OMX_MAX_STRINGNAME_SIZE],
}
omx_struct!(OMX_PARAM_COMPONENTROLETYPE);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_CONFIG_RECTTYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_U32,
    pub nPortIndex: OMX_U32,
    pub nLeft: OMX_S32,
    pub nTop: OMX_S32,
    pub nWidth: OMX_U32,
    pub nHeight: OMX_U32,
}
omx_struct!(OMX_CONFIG_RECTTYPE);

pub type OMX_EventHandler = unsafe extern "C" fn(
    hComponent: OMX_HANDLETYPE,
    pAppData: OMX_PTR,
    eEvent: OMX_EVENTTYPE,
    nData1: OMX_U32,
    nData2: OMX_U32,
    pEventData: OMX_PTR,
) -> OMX_ERRORTYPE;

pub type OMX_BufferDone = unsafe extern "C" fn(
    hComponent: OMX_HANDLETYPE,
    pAppData: OMX_PTR,
    pBuffer: *mut OMX_BUFFERHEADERTYPE,
) -> OMX_ERRORTYPE;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_CALLBACKTYPE {
    pub EventHandler: Option<OMX_EventHandler>,
    pub EmptyBufferDone: Option<OMX_BufferDone>,
    pub FillBufferDone: Option<OMX_BufferDone>,
}

/// Function table behind every component handle returned by `OMX_GetHandle`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OMX_COMPONENTTYPE {
    pub nSize: OMX_U32,
    pub nVersion: OMX_U32,
    pub pComponentPrivate: OMX_PTR,
    pub pApplicationPrivate: OMX_PTR,
    pub GetComponentVersion: Option<
        unsafe extern "C" fn(
            OMX_HANDLETYPE,
            OMX_STRING,
            *mut OMX_U32,
            *mut OMX_U32,
            *mut [OMX_U8; OMX_MAX_STRINGNAME_SIZE],
        ) -> OMX_ERRORTYPE,
    >,
    pub SendCommand: Option<
        unsafe extern "C" fn(OMX_HANDLETYPE, OMX_COMMANDTYPE, OMX_U32, OMX_PTR) -> OMX_ERRORTYPE,
    >,
    pub GetParameter:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, OMX_INDEXTYPE, OMX_PTR) -> OMX_ERRORTYPE>,
    pub SetParameter:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, OMX_INDEXTYPE, OMX_PTR) -> OMX_ERRORTYPE>,
    pub GetConfig:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, OMX_INDEXTYPE, OMX_PTR) -> OMX_ERRORTYPE>,
    pub SetConfig:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, OMX_INDEXTYPE, OMX_PTR) -> OMX_ERRORTYPE>,
    pub GetExtensionIndex: Option<
        unsafe extern "C" fn(OMX_HANDLETYPE, OMX_STRING, *mut OMX_INDEXTYPE) -> OMX_ERRORTYPE,
    >,
    pub GetState: Option<unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_STATETYPE) -> OMX_ERRORTYPE>,
    pub ComponentTunnelRequest: Option<
        unsafe extern "C" fn(
            OMX_HANDLETYPE,
            OMX_U32,
            OMX_HANDLETYPE,
            OMX_U32,
            *mut c_void,
        ) -> OMX_ERRORTYPE,
    >,
    pub UseBuffer: Option<
        unsafe extern "C" fn(
            OMX_HANDLETYPE,
            *mut *mut OMX_BUFFERHEADERTYPE,
            OMX_U32,
            OMX_PTR,
            OMX_U32,
            *mut OMX_U8,
        ) -> OMX_ERRORTYPE,
    >,
    pub AllocateBuffer: Option<
        unsafe extern "C" fn(
            OMX_HANDLETYPE,
            *mut *mut OMX_BUFFERHEADERTYPE,
            OMX_U32,
            OMX_PTR,
            OMX_U32,
        ) -> OMX_ERRORTYPE,
    >,
    pub FreeBuffer: Option<
        unsafe extern "C" fn(OMX_HANDLETYPE, OMX_U32, *mut OMX_BUFFERHEADERTYPE) -> OMX_ERRORTYPE,
    >,
    pub EmptyThisBuffer:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_BUFFERHEADERTYPE) -> OMX_ERRORTYPE>,
    pub FillThisBuffer:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_BUFFERHEADERTYPE) -> OMX_ERRORTYPE>,
    pub SetCallbacks: Option<
        unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_CALLBACKTYPE, OMX_PTR) -> OMX_ERRORTYPE,
    >,
    pub ComponentDeInit: Option<unsafe extern "C" fn(OMX_HANDLETYPE) -> OMX_ERRORTYPE>,
    pub UseEGLImage: Option<
        unsafe extern "C" fn(
            OMX_HANDLETYPE,
            *mut *mut OMX_BUFFERHEADERTYPE,
            OMX_U32,
            OMX_PTR,
            *mut c_void,
        ) -> OMX_ERRORTYPE,
    >,
    pub ComponentRoleEnum:
        Option<unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_U8, OMX_U32) -> OMX_ERRORTYPE>,
}

pub const SCMN_IMGB_MAX_PLANE: usize = 4;

// buf_share_method values of [`ScmnImgb`]
pub const BUF_SHARE_METHOD_PADDR: i32 = 0;
pub const BUF_SHARE_METHOD_FD: i32 = 1;
pub const BUF_SHARE_METHOD_TIZEN_BUFFER: i32 = 2;
pub const BUF_SHARE_METHOD_FLUSH_BUFFER: i32 = 3;

/// Vendor image descriptor exchanged with the hardware for zero-copy surfaces.
///
/// When an output port works in a hardware-addressable color format, the payload
/// of each buffer header is one of these descriptors rather than pixel data.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScmnImgb {
    pub w: [i32; SCMN_IMGB_MAX_PLANE],
    pub h: [i32; SCMN_IMGB_MAX_PLANE],
    pub s: [i32; SCMN_IMGB_MAX_PLANE],
    pub e: [i32; SCMN_IMGB_MAX_PLANE],
    pub a: [*mut c_void; SCMN_IMGB_MAX_PLANE],
    pub p: [*mut c_void; SCMN_IMGB_MAX_PLANE],
    pub cs: i32,
    pub x: i32,
    pub y: i32,
    pub __dummy2: i32,
    pub data: [i32; 16],
    pub fd: [i32; SCMN_IMGB_MAX_PLANE],
    pub buf_share_method: i32,
    pub y_size: i32,
    pub uv_size: i32,
    pub bo: [*mut c_void; SCMN_IMGB_MAX_PLANE],
    pub jpeg_data: *mut c_void,
    pub jpeg_size: i32,
    pub tz_enable: i32,
}

impl Default for ScmnImgb {
    fn default() -> Self {
        // Safety: integers and raw pointers only.
        unsafe { std::mem::zeroed() }
    }
}

/// Dynamically loaded OpenMAX IL core library.
///
/// Field names follow the snake_case renaming of the `OMX_` entry points.
pub struct OmxCoreLibrary {
    __library: ::libloading::Library,
    pub init: unsafe extern "C" fn() -> OMX_ERRORTYPE,
    pub deinit: unsafe extern "C" fn() -> OMX_ERRORTYPE,
    pub get_handle: unsafe extern "C" fn(
        *mut OMX_HANDLETYPE,
        OMX_STRING,
        OMX_PTR,
        *mut OMX_CALLBACKTYPE,
    ) -> OMX_ERRORTYPE,
    pub free_handle: unsafe extern "C" fn(OMX_HANDLETYPE) -> OMX_ERRORTYPE,
}

impl OmxCoreLibrary {
    pub unsafe fn new<P>(path: P) -> Result<Self, ::libloading::Error>
    where
        P: AsRef<OsStr>,
    {
        let library = unsafe { ::libloading::Library::new(path) }?;
        unsafe { Self::from_library(library) }
    }

    pub unsafe fn from_library<L>(library: L) -> Result<Self, ::libloading::Error>
    where
        L: Into<::libloading::Library>,
    {
        let __library = library.into();
        let init = unsafe { __library.get(b"OMX_Init\0") }.map(|sym| *sym)?;
        let deinit = unsafe { __library.get(b"OMX_Deinit\0") }.map(|sym| *sym)?;
        let get_handle = unsafe { __library.get(b"OMX_GetHandle\0") }.map(|sym| *sym)?;
        let free_handle = unsafe { __library.get(b"OMX_FreeHandle\0") }.map(|sym| *sym)?;
        Ok(OmxCoreLibrary {
            __library,
            init,
            deinit,
            get_handle,
            free_handle,
        })
    }

    pub unsafe fn init(&self) -> OMX_ERRORTYPE {
        unsafe { (self.init)() }
    }

    pub unsafe fn deinit(&self) -> OMX_ERRORTYPE {
        unsafe { (self.deinit)() }
    }

    pub unsafe fn get_handle(
        &self,
        handle: *mut OMX_HANDLETYPE,
        name: OMX_STRING,
        app_data: OMX_PTR,
        callbacks: *mut OMX_CALLBACKTYPE,
    ) -> OMX_ERRORTYPE {
        unsafe { (self.get_handle)(handle, name, app_data, callbacks) }
    }

    pub unsafe fn free_handle(&self, handle: OMX_HANDLETYPE) -> OMX_ERRORTYPE {
        unsafe { (self.free_handle)(handle) }
    }
}
