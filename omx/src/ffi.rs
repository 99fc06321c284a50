// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! [`Component`] implementation on top of a real OMX IL component handle.

use std::{
    ffi::CString,
    ptr::{self, NonNull},
    sync::Arc,
};

use omx_sys::{
    OMX_BUFFERHEADERTYPE, OMX_CALLBACKTYPE, OMX_COMPONENTTYPE, OMX_ERRORTYPE, OMX_EVENTTYPE,
    OMX_HANDLETYPE, OMX_INDEXTYPE, OMX_PTR, OmxStruct,
};
use tracing::{debug, error, warn};

use crate::{
    Error, Result,
    buffer::OmxBuffer,
    component::{
        Component, ComponentCallbacks, ComponentCommand, ComponentEvent, ComponentFactory,
        CropRect, PortDefinition, Rejected,
    },
    registry::{LibraryHandle, Registry},
};

/// What the component gets back as `pAppData` in every callback.
struct CallbackContext {
    callbacks: Arc<dyn ComponentCallbacks>,
}

unsafe extern "C" fn event_handler(
    _component: OMX_HANDLETYPE,
    app_data: OMX_PTR,
    event: OMX_EVENTTYPE,
    data1: u32,
    data2: u32,
    _event_data: OMX_PTR,
) -> OMX_ERRORTYPE {
    // Safety: `app_data` is the context registered in `OmxComponent::new`, which
    // outlives the handle.
    let Some(context) = (unsafe { app_data.cast::<CallbackContext>().as_ref() }) else {
        return omx_sys::OMX_ErrorBadParameter;
    };
    context
        .callbacks
        .event(ComponentEvent::from_raw(event, data1, data2));
    omx_sys::OMX_ErrorNone
}

unsafe extern "C" fn empty_buffer_done(
    _component: OMX_HANDLETYPE,
    app_data: OMX_PTR,
    buffer: *mut OMX_BUFFERHEADERTYPE,
) -> OMX_ERRORTYPE {
    // Safety: see `event_handler`. The component hands ownership of the header back.
    let context = unsafe { app_data.cast::<CallbackContext>().as_ref() };
    let buffer = unsafe { OmxBuffer::from_raw(buffer) };
    match (context, buffer) {
        (Some(context), Some(buffer)) => {
            context.callbacks.empty_buffer_done(buffer);
            omx_sys::OMX_ErrorNone
        }
        _ => omx_sys::OMX_ErrorBadParameter,
    }
}

unsafe extern "C" fn fill_buffer_done(
    _component: OMX_HANDLETYPE,
    app_data: OMX_PTR,
    buffer: *mut OMX_BUFFERHEADERTYPE,
) -> OMX_ERRORTYPE {
    // Safety: see `empty_buffer_done`.
    let context = unsafe { app_data.cast::<CallbackContext>().as_ref() };
    let buffer = unsafe { OmxBuffer::from_raw(buffer) };
    match (context, buffer) {
        (Some(context), Some(buffer)) => {
            context.callbacks.fill_buffer_done(buffer);
            omx_sys::OMX_ErrorNone
        }
        _ => omx_sys::OMX_ErrorBadParameter,
    }
}

fn missing(entry: &str) -> Error {
    Error::Other(format!("Component does not implement {entry}"))
}

/// A component handle obtained with `OMX_GetHandle` from a vendor core library.
///
/// The handle is released with `OMX_FreeHandle` on drop, before the library handle
/// (and possibly the library itself) goes away.
pub(crate) struct OmxComponent {
    name: String,
    handle: NonNull<OMX_COMPONENTTYPE>,
    // Both must stay at a fixed address until the handle is freed.
    _callbacks: Box<OMX_CALLBACKTYPE>,
    _context: Box<CallbackContext>,
    library: LibraryHandle,
}

// Safety: OMX IL components are required to accept calls from any thread; the
// handle is only freed in `Drop`, once no other reference exists.
unsafe impl Send for OmxComponent {}
unsafe impl Sync for OmxComponent {}

impl OmxComponent {
    pub(crate) fn new(
        library: LibraryHandle,
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Self> {
        let c_name = CString::new(name)?;
        let mut context = Box::new(CallbackContext { callbacks });
        let mut table = Box::new(OMX_CALLBACKTYPE {
            EventHandler: Some(event_handler),
            EmptyBufferDone: Some(empty_buffer_done),
            FillBufferDone: Some(fill_buffer_done),
        });

        let mut handle: OMX_HANDLETYPE = ptr::null_mut();
        // Safety: every pointer is valid for the duration of the call; the context
        // and the callback table are kept alive by the returned component.
        Error::from_omx(unsafe {
            library.get_handle(
                &mut handle,
                c_name.as_ptr().cast_mut(),
                ptr::from_mut(&mut *context).cast(),
                &mut *table,
            )
        })?;
        let handle = NonNull::new(handle.cast::<OMX_COMPONENTTYPE>())
            .ok_or_else(|| Error::Other(format!("OMX_GetHandle returned no handle for {name}")))?;
        debug!(component = name, library = library.name(), "Got component handle");

        Ok(OmxComponent {
            name: name.to_string(),
            handle,
            _callbacks: table,
            _context: context,
            library,
        })
    }

    fn table(&self) -> &OMX_COMPONENTTYPE {
        // Safety: the handle is valid until `Drop`.
        unsafe { self.handle.as_ref() }
    }

    fn raw(&self) -> OMX_HANDLETYPE {
        self.handle.as_ptr().cast()
    }

    fn get_parameter<T>(&self, index: OMX_INDEXTYPE, value: &mut T) -> Result<()> {
        let get = self.table().GetParameter.ok_or_else(|| missing("GetParameter"))?;
        // Safety: `value` is an initialized OMX structure of the type `index` expects.
        Error::from_omx(unsafe { get(self.raw(), index, ptr::from_mut(value).cast()) })
    }

    fn set_parameter<T>(&self, index: OMX_INDEXTYPE, value: &mut T) -> Result<()> {
        let set = self.table().SetParameter.ok_or_else(|| missing("SetParameter"))?;
        // Safety: as in `get_parameter`.
        Error::from_omx(unsafe { set(self.raw(), index, ptr::from_mut(value).cast()) })
    }

    fn release(
        &self,
        entry: Option<unsafe extern "C" fn(OMX_HANDLETYPE, *mut OMX_BUFFERHEADERTYPE) -> OMX_ERRORTYPE>,
        entry_name: &str,
        buffer: OmxBuffer,
    ) -> std::result::Result<(), Rejected> {
        let Some(entry) = entry else {
            return Err(Rejected {
                buffer,
                error: missing(entry_name),
            });
        };
        let header = buffer.into_raw();
        // Safety: the header belongs to this component. Once the call succeeds the
        // component owns it until the matching done callback.
        let status = unsafe { entry(self.raw(), header) };
        match Error::from_omx(status) {
            Ok(()) => Ok(()),
            // Safety: the component refused the header, so it is still ours.
            Err(error) => match unsafe { OmxBuffer::from_raw(header) } {
                Some(buffer) => Err(Rejected { buffer, error }),
                None => Ok(()),
            },
        }
    }
}

impl Component for OmxComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_command(&self, command: ComponentCommand) -> Result<()> {
        let send = self.table().SendCommand.ok_or_else(|| missing("SendCommand"))?;
        let (command, param) = command.to_raw();
        // Safety: none of the commands we send carry command data.
        Error::from_omx(unsafe { send(self.raw(), command, param, ptr::null_mut()) })
    }

    fn port_definition(&self, port: u32) -> Result<PortDefinition> {
        let mut raw = omx_sys::OMX_PARAM_PORTDEFINITIONTYPE::init();
        raw.nPortIndex = port;
        self.get_parameter(omx_sys::OMX_IndexParamPortDefinition, &mut raw)?;
        Ok(PortDefinition::from_raw(&raw))
    }

    fn set_port_definition(&self, definition: &PortDefinition) -> Result<()> {
        let mut raw = omx_sys::OMX_PARAM_PORTDEFINITIONTYPE::init();
        raw.nPortIndex = definition.index;
        self.get_parameter(omx_sys::OMX_IndexParamPortDefinition, &mut raw)?;
        definition.apply_to(&mut raw);
        self.set_parameter(omx_sys::OMX_IndexParamPortDefinition, &mut raw)
    }

    fn set_role(&self, role: &str) -> Result<()> {
        let mut raw = omx_sys::OMX_PARAM_COMPONENTROLETYPE::init();
        // Keep the terminating NUL.
        let len = role.len().min(raw.cRole.len() - 1);
        raw.cRole[..len].copy_from_slice(&role.as_bytes()[..len]);
        self.set_parameter(omx_sys::OMX_IndexParamStandardComponentRole, &mut raw)
    }

    fn output_crop(&self, port: u32) -> Result<CropRect> {
        let get = self.table().GetConfig.ok_or_else(|| missing("GetConfig"))?;
        let mut raw = omx_sys::OMX_CONFIG_RECTTYPE::init();
        raw.nPortIndex = port;
        // Safety: `raw` is an initialized rectangle structure.
        Error::from_omx(unsafe {
            get(
                self.raw(),
                omx_sys::OMX_IndexConfigCommonOutputCrop,
                ptr::from_mut(&mut raw).cast(),
            )
        })?;
        Ok(CropRect {
            left: raw.nLeft,
            top: raw.nTop,
            width: raw.nWidth,
            height: raw.nHeight,
        })
    }

    fn allocate_buffer(&self, port: u32, size: u32, slot: usize) -> Result<OmxBuffer> {
        let allocate = self
            .table()
            .AllocateBuffer
            .ok_or_else(|| missing("AllocateBuffer"))?;
        let mut header = ptr::null_mut();
        // Safety: the slot index is stored as an opaque pointer-sized value.
        Error::from_omx(unsafe { allocate(self.raw(), &mut header, port, slot as OMX_PTR, size) })?;
        // Safety: a successful allocation hands us the only reference to the header.
        unsafe { OmxBuffer::from_raw(header) }
            .ok_or_else(|| Error::Allocation(format!("{} returned no header", self.name)))
    }

    unsafe fn use_buffer(
        &self,
        port: u32,
        size: u32,
        data: *mut u8,
        slot: usize,
    ) -> Result<OmxBuffer> {
        let use_buffer = self.table().UseBuffer.ok_or_else(|| missing("UseBuffer"))?;
        let mut header = ptr::null_mut();
        // Safety: the caller keeps `data` alive as documented on the trait.
        Error::from_omx(unsafe {
            use_buffer(self.raw(), &mut header, port, slot as OMX_PTR, size, data)
        })?;
        // Safety: as in `allocate_buffer`.
        unsafe { OmxBuffer::from_raw(header) }
            .ok_or_else(|| Error::Allocation(format!("{} returned no header", self.name)))
    }

    fn free_buffer(&self, port: u32, buffer: OmxBuffer) -> Result<()> {
        let free = self.table().FreeBuffer.ok_or_else(|| missing("FreeBuffer"))?;
        // Safety: the header is owned by us and never touched again.
        Error::from_omx(unsafe { free(self.raw(), port, buffer.into_raw()) })
    }

    fn empty_this_buffer(&self, buffer: OmxBuffer) -> std::result::Result<(), Rejected> {
        self.release(self.table().EmptyThisBuffer, "EmptyThisBuffer", buffer)
    }

    fn fill_this_buffer(&self, buffer: OmxBuffer) -> std::result::Result<(), Rejected> {
        self.release(self.table().FillThisBuffer, "FillThisBuffer", buffer)
    }
}

impl Drop for OmxComponent {
    fn drop(&mut self) {
        // Safety: the handle came from this library and is not used afterwards.
        let status = unsafe { self.library.free_handle(self.raw()) };
        match Error::from_omx(status) {
            Ok(()) => debug!(component = %self.name, "Freed component handle"),
            Err(err) => error!(component = %self.name, error = %err, "OMX_FreeHandle failed"),
        }
    }
}

/// Creates components named `component_name` from the core library `library_name`.
pub struct OmxComponentFactory {
    registry: Registry,
    library_name: String,
    component_name: String,
}

impl OmxComponentFactory {
    pub fn new(library_name: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self::with_registry(Registry::global().clone(), library_name, component_name)
    }

    pub fn with_registry(
        registry: Registry,
        library_name: impl Into<String>,
        component_name: impl Into<String>,
    ) -> Self {
        OmxComponentFactory {
            registry,
            library_name: library_name.into(),
            component_name: component_name.into(),
        }
    }

    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }
}

impl ComponentFactory for OmxComponentFactory {
    fn create(&self, callbacks: Arc<dyn ComponentCallbacks>) -> Result<Arc<dyn Component>> {
        let library = self.registry.request(&self.library_name).inspect_err(|err| {
            warn!(library = %self.library_name, error = %err, "Cannot load core library");
        })?;
        let component = OmxComponent::new(library, &self.component_name, callbacks)?;
        Ok(Arc::new(component))
    }
}
