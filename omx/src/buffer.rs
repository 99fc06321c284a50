// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer headers and the payloads attached to them.
//!
//! An [`OmxBuffer`] is the application's handle on one `OMX_BUFFERHEADERTYPE`. It is
//! move-only: exactly one party (the hardware, a port queue, or one pipeline-side
//! owner) holds it at any time, and ownership changes through explicit calls such as
//! [`crate::Port::request_buffer`] and [`crate::Port::release_buffer`].

use std::{any::Any, fmt, ptr::NonNull};

use bitflags::bitflags;
use omx_sys::OMX_BUFFERHEADERTYPE;

bitflags! {
    /// Flags carried in `nFlags`.
    ///
    /// Bits without a name here are vendor defined and kept as they are.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        const EOS = omx_sys::OMX_BUFFERFLAG_EOS;
        const STARTTIME = omx_sys::OMX_BUFFERFLAG_STARTTIME;
        const DECODEONLY = omx_sys::OMX_BUFFERFLAG_DECODEONLY;
        const SYNCFRAME = omx_sys::OMX_BUFFERFLAG_SYNCFRAME;
        const CODECCONFIG = omx_sys::OMX_BUFFERFLAG_CODECCONFIG;
    }
}

/// Owned handle on one buffer header.
///
/// Dropping the handle does not free the header: headers are freed by their port
/// (see [`crate::Port::free_buffers`]), which tracks every header in its slot table.
pub struct OmxBuffer {
    header: NonNull<OMX_BUFFERHEADERTYPE>,
}

// Safety: the header is plain data owned by whoever holds the handle. The component
// only touches it between a release call and the matching done callback, during
// which no `OmxBuffer` for it exists on the application side.
unsafe impl Send for OmxBuffer {}

impl OmxBuffer {
    /// Wraps a header pointer handed out by a component.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live header and the caller must own it: no other
    /// `OmxBuffer` for the same header may exist.
    pub unsafe fn from_raw(ptr: *mut OMX_BUFFERHEADERTYPE) -> Option<Self> {
        NonNull::new(ptr).map(|header| OmxBuffer { header })
    }

    pub fn as_ptr(&self) -> *mut OMX_BUFFERHEADERTYPE {
        self.header.as_ptr()
    }

    /// Gives up the handle, typically to pass the header to the component.
    pub fn into_raw(self) -> *mut OMX_BUFFERHEADERTYPE {
        self.header.as_ptr()
    }

    fn header(&self) -> &OMX_BUFFERHEADERTYPE {
        // Safety: ownership of the header is guaranteed by `from_raw`.
        unsafe { self.header.as_ref() }
    }

    fn header_mut(&mut self) -> &mut OMX_BUFFERHEADERTYPE {
        // Safety: as above, and `&mut self` makes the access exclusive.
        unsafe { self.header.as_mut() }
    }

    pub fn alloc_len(&self) -> u32 {
        self.header().nAllocLen
    }

    pub fn set_alloc_len(&mut self, len: u32) {
        self.header_mut().nAllocLen = len;
    }

    pub fn filled_len(&self) -> u32 {
        self.header().nFilledLen
    }

    pub fn set_filled_len(&mut self, len: u32) {
        self.header_mut().nFilledLen = len;
    }

    pub fn offset(&self) -> u32 {
        self.header().nOffset
    }

    pub fn set_offset(&mut self, offset: u32) {
        self.header_mut().nOffset = offset;
    }

    pub fn flags(&self) -> BufferFlags {
        BufferFlags::from_bits_retain(self.header().nFlags)
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.header_mut().nFlags = flags.bits();
    }

    /// Timestamp in OMX ticks (microseconds).
    pub fn timestamp(&self) -> i64 {
        self.header().nTimeStamp
    }

    pub fn set_timestamp(&mut self, ticks: i64) {
        self.header_mut().nTimeStamp = ticks;
    }

    /// Index of this header in its port's slot table, stored in `pAppPrivate`.
    pub fn slot(&self) -> usize {
        self.header().pAppPrivate as usize
    }

    pub fn input_port_index(&self) -> u32 {
        self.header().nInputPortIndex
    }

    pub fn output_port_index(&self) -> u32 {
        self.header().nOutputPortIndex
    }

    /// Current payload pointer (`pBuffer`).
    pub fn payload_ptr(&self) -> *mut u8 {
        self.header().pBuffer
    }

    /// Replaces the payload pointer, as done when a pipeline buffer is shared.
    ///
    /// # Safety
    ///
    /// `data` must stay valid for `alloc_len()` bytes for as long as it is installed.
    pub unsafe fn set_payload_ptr(&mut self, data: *mut u8) {
        self.header_mut().pBuffer = data;
    }

    /// The valid bytes: `filled_len` bytes starting at `offset`.
    ///
    /// Bounds reported by the hardware are clamped to the allocation.
    pub fn data(&self) -> &[u8] {
        let header = self.header();
        if header.pBuffer.is_null() {
            return &[];
        }
        let alloc = header.nAllocLen as usize;
        let start = (header.nOffset as usize).min(alloc);
        let end = start.saturating_add(header.nFilledLen as usize).min(alloc);
        // Safety: the payload is valid for `nAllocLen` bytes while we own the header.
        unsafe { std::slice::from_raw_parts(header.pBuffer.add(start), end - start) }
    }

    /// The whole allocation, for filling an input buffer.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let header = self.header_mut();
        if header.pBuffer.is_null() {
            return &mut [];
        }
        // Safety: the payload is valid for `nAllocLen` bytes while we own the header.
        unsafe { std::slice::from_raw_parts_mut(header.pBuffer, header.nAllocLen as usize) }
    }
}

impl fmt::Debug for OmxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OmxBuffer")
            .field("header", &self.header)
            .field("slot", &self.slot())
            .field("alloc_len", &self.alloc_len())
            .field("filled_len", &self.filled_len())
            .field("offset", &self.offset())
            .field("timestamp", &self.timestamp())
            .field("flags", &self.flags())
            .finish()
    }
}

/// Pipeline-owned memory installed as a header's payload in shared mode.
///
/// The port keeps the attachment in its slot table while the hardware works on it and
/// hands it back on output, so the pipeline can push the very same memory downstream.
pub trait SharedMemory: Send {
    fn as_slice(&self) -> &[u8];

    /// Pointer installed as `pBuffer`.
    fn payload_ptr(&self) -> *mut u8;

    /// Recovers the concrete type, for elements that wrap their own buffer type.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl SharedMemory for Vec<u8> {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn payload_ptr(&self) -> *mut u8 {
        self.as_ptr().cast_mut()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with(data: &mut [u8]) -> Box<OMX_BUFFERHEADERTYPE> {
        let mut header: OMX_BUFFERHEADERTYPE = omx_sys::OmxStruct::init();
        header.pBuffer = data.as_mut_ptr();
        header.nAllocLen = data.len() as u32;
        header.pAppPrivate = 3usize as omx_sys::OMX_PTR;
        Box::new(header)
    }

    #[test]
    fn data_respects_offset_and_filled_length() {
        let mut payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let header = Box::into_raw(header_with(&mut payload));
        let mut buffer = unsafe { OmxBuffer::from_raw(header) }.unwrap();

        buffer.set_offset(2);
        buffer.set_filled_len(3);
        assert_eq!(buffer.data(), &[3, 4, 5]);
        assert_eq!(buffer.slot(), 3);

        buffer.set_filled_len(100);
        assert_eq!(buffer.data(), &[3, 4, 5, 6, 7, 8]);

        drop(unsafe { Box::from_raw(buffer.into_raw()) });
    }

    #[test]
    fn flags_insert_and_remove() {
        let mut flags = BufferFlags::EOS | BufferFlags::SYNCFRAME;
        assert!(flags.contains(BufferFlags::EOS));
        flags.remove(BufferFlags::EOS);
        assert!(!flags.contains(BufferFlags::EOS));
        flags.insert(BufferFlags::CODECCONFIG);
        assert_eq!(flags.bits(), 0xA0);
        assert_eq!(format!("{flags:?}"), "BufferFlags(SYNCFRAME | CODECCONFIG)");

        // Vendor bits survive a read back from the header.
        let vendor = BufferFlags::from_bits_retain(0x1000_0001);
        assert!(vendor.contains(BufferFlags::EOS));
        assert_eq!(vendor.bits(), 0x1000_0001);
    }
}
