// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer pool of one component port.
//!
//! A [`Port`] owns the table of buffer headers allocated on a component port and the
//! availability queue through which the streaming loops obtain them. Every header is
//! at any time either with the hardware, in the queue, or held by exactly one
//! pipeline-side owner.
//!
//! ```text
//!            request_buffer()              release_buffer()
//!   queue ─────────────────► pipeline ─────────────────────► hardware
//!     ▲                                                          │
//!     └──────────── buffer_done() (EmptyBufferDone/FillBufferDone)┘
//! ```

use std::{
    ptr::NonNull,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use omx_sys::{OMX_BUFFERHEADERTYPE, ScmnImgb};
use tracing::{debug, error, info, trace, warn};

use crate::{
    Error, Result,
    buffer::{BufferFlags, OmxBuffer, SharedMemory},
    component::{ComponentCommand, ComponentSlot, PortDefinition, PortDirection},
    config::{Capabilities, SharingMode, SharingPolicy},
    queue::{AsyncQueue, Semaphore},
    surface::{Surface, SurfaceAllocator},
};

/// How the memory of a freed slot was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// An attached pipeline buffer was dropped.
    UnrefShared,
    /// Memory allocated by the port was freed.
    FreeLocal,
    /// The slot's reference on a zero-copy surface was dropped.
    ReleaseSurface,
    /// The component allocated the payload and freed it itself.
    HardwareOwned,
}

/// Snapshot of where a port's buffers are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Occupancy {
    pub total: usize,
    pub with_hardware: usize,
    pub queued: usize,
}

enum Backing {
    Hardware,
    Local { _memory: Box<[u8]> },
    Shared {
        initial: Box<[u8]>,
        attached: Option<Box<dyn SharedMemory>>,
    },
    Surface {
        surface: Arc<dyn Surface>,
        _descriptor: Box<ScmnImgb>,
    },
}

impl Backing {
    fn disposal(&self) -> Disposal {
        match self {
            Backing::Hardware => Disposal::HardwareOwned,
            Backing::Local { .. } => Disposal::FreeLocal,
            Backing::Shared { attached: Some(_), .. } => Disposal::UnrefShared,
            Backing::Shared { attached: None, .. } => Disposal::FreeLocal,
            Backing::Surface { .. } => Disposal::ReleaseSurface,
        }
    }
}

struct Slot {
    header: NonNull<OMX_BUFFERHEADERTYPE>,
    backing: Backing,
}

// Safety: the header pointer is only dereferenced through `OmxBuffer` handles whose
// ownership the port tracks, and the descriptor pointers in `Backing::Surface` are
// only read by the component.
unsafe impl Send for Slot {}

#[derive(Default)]
struct PortInner {
    initialized: bool,
    policy: SharingPolicy,
    mode: SharingMode,
    buffer_size: u32,
    definition: PortDefinition,
    slots: Vec<Option<Slot>>,
}

/// One input or output port of a component.
pub struct Port {
    index: u32,
    direction: PortDirection,
    component: Arc<ComponentSlot>,
    capabilities: Capabilities,
    timeout: Duration,
    surfaces: Mutex<Option<Arc<dyn SurfaceAllocator>>>,
    inner: Mutex<PortInner>,
    queue: AsyncQueue<OmxBuffer>,
    enabled: AtomicBool,
    flushing: AtomicBool,
    with_hardware: AtomicUsize,
    pub(crate) port_sem: Semaphore,
    pub(crate) flush_sem: Semaphore,
}

impl Port {
    pub(crate) fn new(
        index: u32,
        direction: PortDirection,
        component: Arc<ComponentSlot>,
        capabilities: Capabilities,
        timeout: Duration,
    ) -> Self {
        Port {
            index,
            direction,
            component,
            capabilities,
            timeout,
            surfaces: Mutex::new(None),
            inner: Mutex::new(PortInner::default()),
            queue: AsyncQueue::new(),
            enabled: AtomicBool::new(true),
            flushing: AtomicBool::new(false),
            with_hardware: AtomicUsize::new(0),
            port_sem: Semaphore::new(),
            flush_sem: Semaphore::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_flushing(&self, flushing: bool) {
        self.flushing.store(flushing, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn sharing_mode(&self) -> SharingMode {
        self.lock().mode
    }

    /// Number of buffer slots, 0 until a successful [`Port::setup`].
    pub fn num_buffers(&self) -> usize {
        self.lock().slots.len()
    }

    /// The port definition as of the last setup or allocation.
    pub fn definition(&self) -> PortDefinition {
        self.lock().definition.clone()
    }

    /// Installs the allocator used for zero-copy surfaces on an output port.
    pub fn set_surface_allocator(&self, allocator: Arc<dyn SurfaceAllocator>) {
        *self.surfaces.lock().unwrap_or_else(PoisonError::into_inner) = Some(allocator);
    }

    fn surface_allocator(&self) -> Option<Arc<dyn SurfaceAllocator>> {
        self.surfaces.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Queries the port definition and sizes the slot table.
    ///
    /// A failed query is logged and leaves the port uninitialized with no slots.
    pub fn setup(&self, policy: SharingPolicy) {
        let definition = self
            .component
            .get()
            .and_then(|component| component.port_definition(self.index));
        let has_surfaces = self.surface_allocator().is_some();
        let mut inner = self.lock();
        inner.policy = policy;
        match definition {
            Ok(definition) => {
                if definition.direction != self.direction {
                    warn!(
                        port = self.index,
                        expected = ?self.direction,
                        reported = ?definition.direction,
                        "Port direction mismatch"
                    );
                }
                inner.mode = policy.mode_for(
                    self.direction,
                    &self.capabilities,
                    definition.is_hardware_addressable(),
                    has_surfaces,
                );
                inner.buffer_size = definition.buffer_size;
                inner.slots = (0..definition.buffer_count_actual).map(|_| None).collect();
                inner.definition = definition;
                inner.initialized = true;
                debug!(
                    port = self.index,
                    buffers = inner.slots.len(),
                    size = inner.buffer_size,
                    mode = ?inner.mode,
                    "Port set up"
                );
            }
            Err(error) => {
                error!(port = self.index, %error, "Failed to query port definition");
                inner.initialized = false;
                inner.slots.clear();
            }
        }
    }

    /// Allocates a header for every empty slot.
    ///
    /// The definition is queried again first, so that a port re-enabled after a
    /// resolution change gets buffers of the new size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortUninitialized`] if [`Port::setup`] failed, or the first
    /// allocation error. Slots allocated before the failure stay in the table and
    /// are released by [`Port::free_buffers`].
    pub fn allocate_buffers(&self) -> Result<()> {
        let component = self.component.get()?;
        let allocator = self.surface_allocator();
        let mut inner = self.lock();
        if !inner.initialized {
            return Err(Error::PortUninitialized(self.index));
        }

        let definition = component.port_definition(self.index)?;
        inner.mode = inner.policy.mode_for(
            self.direction,
            &self.capabilities,
            definition.is_hardware_addressable(),
            allocator.is_some(),
        );
        inner.buffer_size = definition.buffer_size;
        let count = definition.buffer_count_actual as usize;
        if inner.slots.len() > count {
            // The count went down: free the headers that no longer have a slot.
            let surplus: Vec<Slot> = inner.slots.drain(count..).flatten().collect();
            let headers: Vec<*mut OMX_BUFFERHEADERTYPE> =
                surplus.iter().map(|slot| slot.header.as_ptr()).collect();
            self.queue.retain(|buffer| !headers.contains(&buffer.as_ptr()));
            for slot in surplus {
                let disposal = self.free_slot(slot);
                debug!(port = self.index, ?disposal, "Freed surplus buffer");
            }
        }
        inner.slots.resize_with(count, || None);
        inner.definition = definition;

        let size = inner.buffer_size;
        let mode = inner.mode;
        for slot_index in 0..count {
            if inner.slots[slot_index].is_some() {
                continue;
            }
            let (buffer, backing) = match mode {
                SharingMode::Owned => (
                    component.allocate_buffer(self.index, size, slot_index)?,
                    Backing::Hardware,
                ),
                SharingMode::Local | SharingMode::Shared => {
                    let mut memory = vec![0u8; size as usize].into_boxed_slice();
                    // Safety: the memory is kept in the slot until the header is freed.
                    let buffer = unsafe {
                        component.use_buffer(self.index, size, memory.as_mut_ptr(), slot_index)
                    }?;
                    let backing = if mode == SharingMode::Shared {
                        Backing::Shared {
                            initial: memory,
                            attached: None,
                        }
                    } else {
                        Backing::Local { _memory: memory }
                    };
                    (buffer, backing)
                }
                SharingMode::Surface => {
                    let allocator = allocator.as_ref().ok_or_else(|| {
                        Error::Allocation("no surface allocator for zero-copy output".to_string())
                    })?;
                    let surface = allocator.allocate(
                        inner.definition.frame_width,
                        inner.definition.frame_height,
                        inner.definition.color_format,
                    )?;
                    let mut descriptor = Box::new(surface.descriptor());
                    // Safety: the descriptor is kept in the slot until the header is freed.
                    let buffer = unsafe {
                        component.use_buffer(
                            self.index,
                            std::mem::size_of::<ScmnImgb>() as u32,
                            (&mut *descriptor as *mut ScmnImgb).cast::<u8>(),
                            slot_index,
                        )
                    }?;
                    (
                        buffer,
                        Backing::Surface {
                            surface,
                            _descriptor: descriptor,
                        },
                    )
                }
            };
            trace!(port = self.index, slot = slot_index, ?buffer, "Allocated buffer");
            inner.slots[slot_index] = Some(Slot {
                header: NonNull::new(buffer.into_raw())
                    .ok_or_else(|| Error::Allocation("null buffer header".to_string()))?,
                backing,
            });
        }
        info!(port = self.index, buffers = count, size, mode = ?mode, "Allocated port buffers");
        Ok(())
    }

    fn free_slot(&self, slot: Slot) -> Disposal {
        let disposal = slot.backing.disposal();
        match self.component.get() {
            Ok(component) => {
                // Safety: the slot owns the header; every other handle was dropped
                // or handed back before the slot was taken out of the table.
                if let Some(buffer) = unsafe { OmxBuffer::from_raw(slot.header.as_ptr()) } {
                    if let Err(error) = component.free_buffer(self.index, buffer) {
                        warn!(port = self.index, %error, "FreeBuffer failed");
                    }
                }
            }
            Err(error) => warn!(port = self.index, %error, "Cannot free buffer"),
        }
        // The backing memory outlives the header.
        drop(slot.backing);
        disposal
    }

    /// Frees every allocated header and its backing memory.
    ///
    /// Returns one disposal per freed slot.
    pub fn free_buffers(&self) -> Vec<Disposal> {
        // Queued handles alias slot headers.
        drop(self.queue.drain());
        let slots: Vec<Slot> = {
            let mut inner = self.lock();
            inner.slots.iter_mut().filter_map(Option::take).collect()
        };
        self.with_hardware.store(0, Ordering::SeqCst);
        let disposals: Vec<Disposal> = slots.into_iter().map(|slot| self.free_slot(slot)).collect();
        debug!(port = self.index, freed = disposals.len(), "Freed port buffers");
        disposals
    }

    /// Frees the header of a single buffer, e.g. one returned during a resolution
    /// change. Returns `None` if the buffer does not belong to this port.
    pub fn free_one(&self, buffer: OmxBuffer) -> Option<Disposal> {
        let slot = {
            let mut inner = self.lock();
            let entry = inner.slots.get_mut(buffer.slot())?;
            match entry {
                Some(slot) if slot.header.as_ptr() == buffer.as_ptr() => entry.take(),
                _ => None,
            }
        };
        match slot {
            Some(slot) => Some(self.free_slot(slot)),
            None => {
                error!(port = self.index, ?buffer, "Buffer does not belong to this port");
                None
            }
        }
    }

    /// Blocks until a buffer is available. Returns `None` once the port is paused.
    pub fn request_buffer(&self) -> Option<OmxBuffer> {
        let buffer = self.queue.pop();
        trace!(port = self.index, ?buffer, "Requested buffer");
        buffer
    }

    /// Hands a buffer to the hardware: `EmptyThisBuffer` on input ports,
    /// `FillThisBuffer` on output ports. Never blocks.
    ///
    /// # Errors
    ///
    /// If the component refuses the buffer it goes back to the queue and the error is
    /// returned.
    pub fn release_buffer(&self, buffer: OmxBuffer) -> Result<()> {
        let component = match self.component.get() {
            Ok(component) => component,
            Err(error) => {
                self.queue.push(buffer);
                return Err(error);
            }
        };
        trace!(port = self.index, ?buffer, "Releasing buffer");
        self.with_hardware.fetch_add(1, Ordering::SeqCst);
        let result = match self.direction {
            PortDirection::Input => component.empty_this_buffer(buffer),
            PortDirection::Output => component.fill_this_buffer(buffer),
        };
        if let Err(rejected) = result {
            self.returned_from_hardware();
            warn!(port = self.index, error = %rejected.error, "Component refused buffer");
            self.queue.push(rejected.buffer);
            return Err(rejected.error);
        }
        Ok(())
    }

    /// Makes a buffer available to [`Port::request_buffer`].
    pub fn push_buffer(&self, buffer: OmxBuffer) {
        self.queue.push(buffer);
    }

    pub(crate) fn returned_from_hardware(&self) {
        let _ = self
            .with_hardware
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
    }

    /// Completion of `EmptyThisBuffer`/`FillThisBuffer`.
    ///
    /// Input buffers are reset: a shared pipeline buffer is dropped and the slot's own
    /// memory reinstalled, flags and length are cleared. The buffer is then queued.
    pub fn buffer_done(&self, mut buffer: OmxBuffer) {
        self.returned_from_hardware();
        if self.direction == PortDirection::Input {
            let attached = self.detach(&mut buffer);
            buffer.set_flags(BufferFlags::empty());
            buffer.set_filled_len(0);
            buffer.set_offset(0);
            drop(attached);
        }
        self.queue.push(buffer);
    }

    /// Installs pipeline memory as the payload of `buffer`.
    ///
    /// The memory is kept in the slot table until the buffer comes back, is detached,
    /// or the slot is freed. `alloc_len` becomes the payload size, the filled length
    /// is left to the caller.
    ///
    /// # Errors
    ///
    /// Hands the payload back if the port is not in shared mode.
    pub fn attach(
        &self,
        buffer: &mut OmxBuffer,
        payload: Box<dyn SharedMemory>,
    ) -> std::result::Result<(), Box<dyn SharedMemory>> {
        let mut inner = self.lock();
        let Some(Some(Slot {
            backing: Backing::Shared { attached, .. },
            ..
        })) = inner.slots.get_mut(buffer.slot())
        else {
            return Err(payload);
        };
        let len = payload.as_slice().len() as u32;
        // Safety: the payload is stored in the slot below and outlives its use as
        // the header's payload.
        unsafe { buffer.set_payload_ptr(payload.payload_ptr()) };
        buffer.set_alloc_len(len);
        *attached = Some(payload);
        Ok(())
    }

    /// Removes the pipeline memory attached to `buffer` and reinstalls the slot's
    /// own memory.
    pub fn detach(&self, buffer: &mut OmxBuffer) -> Option<Box<dyn SharedMemory>> {
        let mut inner = self.lock();
        let Some(Some(Slot {
            backing: Backing::Shared { initial, attached },
            ..
        })) = inner.slots.get_mut(buffer.slot())
        else {
            return None;
        };
        let payload = attached.take()?;
        // Safety: `initial` lives as long as the slot.
        unsafe { buffer.set_payload_ptr(initial.as_mut_ptr()) };
        buffer.set_alloc_len(initial.len() as u32);
        Some(payload)
    }

    /// The surface behind a zero-copy output buffer.
    pub fn surface(&self, buffer: &OmxBuffer) -> Option<Arc<dyn Surface>> {
        match self.lock().slots.get(buffer.slot()) {
            Some(Some(Slot {
                backing: Backing::Surface { surface, .. },
                ..
            })) => Some(surface.clone()),
            _ => None,
        }
    }

    /// Disables the queue without dropping its content. Blocked requesters get `None`.
    pub fn pause(&self) {
        self.queue.disable();
    }

    pub fn resume(&self) {
        self.queue.enable();
    }

    /// Drops stale queue entries.
    pub(crate) fn flush_queue(&self) {
        drop(self.queue.drain());
    }

    /// Hands every allocated buffer to its first owner: input buffers go to the queue,
    /// output buffers to the hardware.
    pub fn start_buffers(&self) {
        self.flush_queue();
        let buffers: Vec<OmxBuffer> = {
            let inner = self.lock();
            inner
                .slots
                .iter()
                .flatten()
                // Safety: the table owns the headers and no other handle exists yet.
                .filter_map(|slot| unsafe { OmxBuffer::from_raw(slot.header.as_ptr()) })
                .collect()
        };
        debug!(port = self.index, buffers = buffers.len(), "Starting buffers");
        for mut buffer in buffers {
            buffer.set_filled_len(0);
            match self.direction {
                PortDirection::Input => self.queue.push(buffer),
                PortDirection::Output => {
                    if let Err(error) = self.release_buffer(buffer) {
                        warn!(port = self.index, %error, "Failed to prime output buffer");
                    }
                }
            }
        }
    }

    /// Drains the queue, ignoring the enabled flag, and zeroes every length.
    ///
    /// The caller decides whether the buffers are freed or queued again.
    pub fn clean(&self) -> Vec<OmxBuffer> {
        let mut drained = Vec::new();
        while let Some(mut buffer) = self.queue.pop_forced() {
            buffer.set_filled_len(0);
            drained.push(buffer);
        }
        debug!(port = self.index, drained = drained.len(), "Cleaned port queue");
        drained
    }

    /// Flushes the port and waits for the component to return its buffers.
    ///
    /// On output ports the `flushing` flag is raised until the flush completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be sent or does not complete in time.
    pub fn flush(&self) -> Result<()> {
        let component = self.component.get()?;
        if self.direction == PortDirection::Output {
            self.set_flushing(true);
        }
        self.flush_sem.reset();
        info!(port = self.index, "Flushing port");
        component.send_command(ComponentCommand::Flush(self.index))?;
        if !self.flush_sem.wait_timeout(self.timeout) {
            error!(port = self.index, timeout = ?self.timeout, "Flush did not complete");
            return Err(Error::Timeout(format!("flush of port {}", self.index)));
        }
        Ok(())
    }

    /// Enables the port outside of a resolution change.
    ///
    /// # Arguments
    ///
    /// * `start` - Whether the component is past Loaded, in which case the new
    ///   buffers are handed out immediately
    pub fn enable(&self, start: bool) -> Result<()> {
        let component = self.component.get()?;
        self.port_sem.reset();
        component.send_command(ComponentCommand::PortEnable(self.index))?;
        self.allocate_buffers()?;
        if start {
            self.start_buffers();
        }
        self.resume();
        self.wait_port("enable")
    }

    /// Disables the port outside of a resolution change, freeing its buffers.
    pub fn disable(&self) -> Result<()> {
        let component = self.component.get()?;
        self.port_sem.reset();
        component.send_command(ComponentCommand::PortDisable(self.index))?;
        self.pause();
        if let Err(error) = self.flush() {
            warn!(port = self.index, %error, "Flush before disable failed");
        }
        self.free_buffers();
        self.wait_port("disable")
    }

    fn wait_port(&self, what: &str) -> Result<()> {
        if self.port_sem.wait_timeout(self.timeout) {
            Ok(())
        } else {
            error!(port = self.index, timeout = ?self.timeout, "Port {what} did not complete");
            Err(Error::Timeout(format!("{what} of port {}", self.index)))
        }
    }

    /// Marks the port disabled and wakes every blocked requester, for teardown.
    pub fn finish(&self) {
        self.set_enabled(false);
        self.queue.disable();
    }

    pub fn occupancy(&self) -> Occupancy {
        let total = self.lock().slots.iter().flatten().count();
        Occupancy {
            total,
            with_hardware: self.with_hardware.load(Ordering::SeqCst),
            queued: self.queue.len(),
        }
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        let remaining = self.lock().slots.iter().flatten().count();
        if remaining > 0 {
            warn!(port = self.index, remaining, "Port dropped with allocated buffers");
            self.free_buffers();
        }
    }
}
