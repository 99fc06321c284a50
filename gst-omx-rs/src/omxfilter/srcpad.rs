//! Source Pad Bridge
//!
//! Implements [`omx::SourcePad`] on top of the element's source pad: output frames
//! become GStreamer buffers, the output task is the pad's task, and downstream
//! memory for shared output buffers is plain GStreamer buffers kept mapped while
//! the component writes into them.

// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

use std::{
    any::Any,
    sync::{Mutex, OnceLock, PoisonError, Weak},
};

use gst::prelude::*;
use gstreamer as gst;
use omx::{BufferFlags, Filter, FlowError, FlowResult, OutputFrame, OutputPayload, SharedMemory};
use tracing::{debug, error, trace, warn};

use crate::omxfilter::caps;

/// An upstream buffer fed to the input port, mapped for the duration of the feed.
pub(crate) struct ReadableBuffer(pub gst::MappedBuffer<gst::buffer::Readable>);

impl SharedMemory for ReadableBuffer {
    fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn payload_ptr(&self) -> *mut u8 {
        // The component only reads input payloads.
        self.0.as_ptr().cast_mut()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A buffer allocated for downstream, written by the component.
pub(crate) struct WritableBuffer(pub gst::MappedBuffer<gst::buffer::Writable>);

impl SharedMemory for WritableBuffer {
    fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn payload_ptr(&self) -> *mut u8 {
        self.0.as_ptr().cast_mut()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// Memory of a shared output range, when it did not come from [`WritableBuffer`].
struct SharedRange {
    memory: Box<dyn SharedMemory>,
    range: std::ops::Range<usize>,
}

impl AsRef<[u8]> for SharedRange {
    fn as_ref(&self) -> &[u8] {
        self.memory
            .as_slice()
            .get(self.range.clone())
            .unwrap_or_default()
    }
}

pub(crate) fn flow_to_gst(error: FlowError) -> gst::FlowError {
    match error {
        FlowError::Flushing => gst::FlowError::Flushing,
        FlowError::Eos => gst::FlowError::Eos,
        FlowError::NotNegotiated => gst::FlowError::NotNegotiated,
        FlowError::Error => gst::FlowError::Error,
    }
}

pub(crate) fn flow_from_gst(error: gst::FlowError) -> FlowError {
    match error {
        gst::FlowError::Flushing => FlowError::Flushing,
        gst::FlowError::Eos => FlowError::Eos,
        gst::FlowError::NotNegotiated => FlowError::NotNegotiated,
        _ => FlowError::Error,
    }
}

/// Turns an output frame into a buffer without copying its payload.
pub(crate) fn frame_to_buffer(frame: OutputFrame) -> Result<gst::Buffer, FlowError> {
    let mut buffer = match frame.payload {
        OutputPayload::Copied(data) => gst::Buffer::from_mut_slice(data),
        OutputPayload::Shared { memory, range } => shared_to_buffer(memory, range)?,
        OutputPayload::Surface(guard) => gst::Buffer::from_slice(guard),
    };

    let buffer_mut = buffer.make_mut();
    buffer_mut.set_pts(frame.pts.map(gst::ClockTime::from_nseconds));
    buffer_mut.set_duration(frame.duration.map(gst::ClockTime::from_nseconds));
    if frame.flags.contains(BufferFlags::DECODEONLY) {
        buffer_mut.set_flags(gst::BufferFlags::DECODE_ONLY);
    }
    if !frame.flags.contains(BufferFlags::SYNCFRAME) {
        buffer_mut.set_flags(gst::BufferFlags::DELTA_UNIT);
    }
    Ok(buffer)
}

fn shared_to_buffer(
    memory: Box<dyn SharedMemory>,
    range: std::ops::Range<usize>,
) -> Result<gst::Buffer, FlowError> {
    // Only the range the component filled is pushed.
    let len = memory.as_slice().len();
    if range.end > len {
        error!(?range, len, "Shared output range out of bounds");
        return Err(FlowError::Error);
    }
    let full = range.start == 0 && range.end == len;
    match memory.into_any().downcast::<WritableBuffer>() {
        Ok(mapped) => {
            let buffer = mapped.0.into_buffer();
            if full {
                return Ok(buffer);
            }
            buffer
                .copy_region(gst::BufferCopyFlags::MEMORY, range)
                .map_err(|err| {
                    error!(%err, "Failed to share output region");
                    FlowError::Error
                })
        }
        Err(other) => match other.downcast::<Vec<u8>>() {
            Ok(data) => Ok(gst::Buffer::from_slice(SharedRange {
                memory: data,
                range,
            })),
            Err(_) => {
                error!("Shared output memory of unknown type");
                Err(FlowError::Error)
            }
        },
    }
}

/// The element's source pad as seen by the streaming filter.
pub(crate) struct PadBridge {
    srcpad: gst::Pad,
    /// Set right after the filter is created; the task only holds a weak reference.
    filter: OnceLock<Weak<Filter>>,
    /// Caps derived from new output settings, sent ahead of the next buffer.
    pending_caps: Mutex<Option<gst::Caps>>,
}

impl PadBridge {
    pub(crate) fn new(srcpad: gst::Pad) -> Self {
        PadBridge {
            srcpad,
            filter: OnceLock::new(),
            pending_caps: Mutex::new(None),
        }
    }

    /// Queues caps for the output task.
    ///
    /// Settings changes are reported on the component's callback thread, which must
    /// not block on downstream, so the caps event is pushed from the task instead.
    pub(crate) fn set_pending_caps(&self, caps: gst::Caps) {
        let mut pending = self
            .pending_caps
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.is_none() && self.srcpad.current_caps().as_ref() == Some(&caps) {
            trace!(%caps, "Caps unchanged");
            return;
        }
        debug!(%caps, "Queued output caps");
        *pending = Some(caps);
    }

    fn pending_caps(&self) -> Option<gst::Caps> {
        self.pending_caps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes queued caps, if any, before data leaves the pad.
    fn send_pending_caps(&self) -> FlowResult {
        let caps = self
            .pending_caps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(caps) = caps else {
            return Ok(());
        };
        if self.srcpad.push_event(gst::event::Caps::new(&caps)) {
            Ok(())
        } else {
            warn!(%caps, "Downstream refused caps");
            Err(FlowError::NotNegotiated)
        }
    }

    pub(crate) fn bind(&self, filter: Weak<Filter>) {
        if self.filter.set(filter).is_err() {
            warn!("Pad bridge already bound to a filter");
        }
    }
}

impl omx::SourcePad for PadBridge {
    fn push(&self, frame: OutputFrame) -> FlowResult {
        self.send_pending_caps()?;
        let buffer = frame_to_buffer(frame)?;
        trace!(?buffer, "Pushing buffer");
        self.srcpad
            .push(buffer)
            .map(|_| ())
            .map_err(flow_from_gst)
    }

    fn push_eos(&self) {
        if !self.srcpad.push_event(gst::event::Eos::new()) {
            warn!("Downstream did not accept EOS");
        }
    }

    fn push_flush_buffer(&self, data: Vec<u8>) -> FlowResult {
        self.send_pending_caps()?;
        let buffer = gst::Buffer::from_mut_slice(data);
        self.srcpad
            .push(buffer)
            .map(|_| ())
            .map_err(flow_from_gst)
    }

    fn is_negotiated(&self) -> bool {
        self.pending_caps().is_some() || self.srcpad.current_caps().is_some()
    }

    fn negotiated_size(&self) -> Option<(u32, u32)> {
        let caps = self.pending_caps().or_else(|| self.srcpad.current_caps())?;
        caps::picture_size(&caps)
    }

    fn allocate(&self, size: usize) -> Option<Box<dyn SharedMemory>> {
        let buffer = match gst::Buffer::with_size(size) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!(size, %err, "Failed to allocate downstream buffer");
                return None;
            }
        };
        match buffer.into_mapped_buffer_writable() {
            Ok(mapped) => Some(Box::new(WritableBuffer(mapped))),
            Err(_) => {
                warn!(size, "Failed to map downstream buffer");
                None
            }
        }
    }

    fn start_task(&self) -> bool {
        let Some(filter) = self.filter.get().cloned() else {
            error!("Output task started before the filter was bound");
            return false;
        };
        let pad = self.srcpad.clone();
        let result = self.srcpad.start_task(move || match filter.upgrade() {
            Some(filter) => {
                if let Err(reason) = filter.output_iteration() {
                    debug!(%reason, "Output task paused");
                }
            }
            None => {
                debug!("Filter gone, pausing output task");
                if let Err(err) = pad.pause_task() {
                    warn!(%err, "Failed to pause output task");
                }
            }
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                error!(%err, "Failed to start output task");
                false
            }
        }
    }

    fn pause_task(&self) {
        if let Err(err) = self.srcpad.pause_task() {
            warn!(%err, "Failed to pause output task");
        }
    }
}
