// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Zero-copy output surfaces.
//!
//! When the output port works in a hardware-addressable color format, each buffer
//! header carries a vendor image descriptor ([`omx_sys::ScmnImgb`]) pointing at a
//! surface obtained from a [`SurfaceAllocator`]. Surfaces are reference counted: the
//! port slot holds one reference until the buffer is freed, and every output frame
//! pushed downstream holds another until it is finalized.

use std::sync::Arc;

use omx_sys::ScmnImgb;

use crate::Result;

/// Returns true for the vendor color formats whose payload is an image descriptor.
pub fn is_surface_format(color_format: u32) -> bool {
    matches!(
        color_format,
        omx_sys::OMX_EXT_COLOR_FormatNV12T_Phyaddr_Fd | omx_sys::OMX_EXT_COLOR_FormatNV12L_Phyaddr_Fd
    )
}

/// A hardware surface shared between the component and the pipeline.
pub trait Surface: Send + Sync {
    /// The descriptor installed as the payload of the buffer header.
    fn descriptor(&self) -> ScmnImgb;

    /// Bytes pushed downstream for a frame rendered into this surface.
    fn data(&self) -> &[u8];
}

/// Source of surfaces for an output port.
pub trait SurfaceAllocator: Send + Sync {
    fn allocate(&self, width: u32, height: u32, color_format: u32) -> Result<Arc<dyn Surface>>;
}

pub const fn align(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Luma and chroma plane sizes of an NV12 surface.
///
/// Tiled surfaces are laid out in 128x32 luma and 128x16 chroma tiles rounded to 8 KiB,
/// linear ones in 16 byte aligned rows.
pub fn plane_sizes(width: u32, height: u32, color_format: u32) -> (usize, usize) {
    if color_format == omx_sys::OMX_EXT_COLOR_FormatNV12T_Phyaddr_Fd {
        let luma = align(align(width, 128) * align(height, 32), 8192);
        let chroma = align(align(width, 128) * align(height / 2, 16), 8192);
        (luma as usize, chroma as usize)
    } else {
        let stride = align(width, 16);
        ((stride * align(height, 16)) as usize, (stride * align(height / 2, 16)) as usize)
    }
}

/// Descriptor of the synthetic buffer pushed downstream during a resolution change.
///
/// Downstream renderers recognize it by its share method and release any surface they
/// still hold, which returns the old-resolution buffers to the port.
pub fn flush_descriptor(width: u32, height: u32) -> ScmnImgb {
    let mut descriptor = ScmnImgb {
        buf_share_method: omx_sys::BUF_SHARE_METHOD_FLUSH_BUFFER,
        ..Default::default()
    };
    let (width, height) = (width as i32, height as i32);
    descriptor.w[0] = width;
    descriptor.w[1] = width;
    descriptor.h[0] = height;
    descriptor.h[1] = height / 2;
    descriptor.s[0] = align(width as u32, 128) as i32;
    descriptor.s[1] = descriptor.s[0];
    descriptor.e[0] = align(height as u32, 32) as i32;
    descriptor.e[1] = align(height as u32 / 2, 16) as i32;
    descriptor
}

/// Size in bytes of a flush buffer for the negotiated resolution.
pub fn flush_buffer_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3 / 2
}

/// Raw bytes of a descriptor, as laid at the start of a buffer payload.
pub fn descriptor_bytes(descriptor: &ScmnImgb) -> &[u8] {
    // Safety: `ScmnImgb` is a `repr(C)` plain data struct; reading its bytes is sound.
    unsafe {
        std::slice::from_raw_parts(
            (descriptor as *const ScmnImgb).cast::<u8>(),
            std::mem::size_of::<ScmnImgb>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_descriptor_strides() {
        let descriptor = flush_descriptor(1920, 1080);
        assert_eq!(descriptor.buf_share_method, omx_sys::BUF_SHARE_METHOD_FLUSH_BUFFER);
        assert_eq!(&descriptor.w[..2], &[1920, 1920]);
        assert_eq!(&descriptor.h[..2], &[1080, 540]);
        assert_eq!(&descriptor.s[..2], &[1920, 1920]);
        assert_eq!(&descriptor.e[..2], &[1088, 544]);
        assert_eq!(flush_buffer_size(1920, 1080), 3_110_400);
    }

    #[test]
    fn tiled_planes_are_tile_aligned() {
        let (luma, chroma) = plane_sizes(1280, 720, omx_sys::OMX_EXT_COLOR_FormatNV12T_Phyaddr_Fd);
        assert_eq!(luma % 8192, 0);
        assert_eq!(chroma % 8192, 0);
        assert!(luma >= 1280 * 720);
        assert!(is_surface_format(omx_sys::OMX_EXT_COLOR_FormatNV12L_Phyaddr_Fd));
        assert!(!is_surface_format(omx_sys::OMX_COLOR_FormatYUV420SemiPlanar));
    }
}
