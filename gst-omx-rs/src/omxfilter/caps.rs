//! Caps Helpers for OMX Filter
//!
//! Translates between GStreamer caps and what the component understands:
//! - raw video caps for the source pad, built from the output port definition and
//!   the optional crop rectangle
//! - codec data and frame duration taken from upstream caps

// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

use gst::StructureRef;
use gstreamer as gst;
use gstreamer_video as gst_video;
use omx::{CropRect, PortDefinition};

/// Format names of vendor surfaces, which have no `VideoFormat` counterpart.
const TILED_SURFACE_FORMAT: &str = "ST12";
const LINEAR_SURFACE_FORMAT: &str = "SN12";

/// Raw video format produced for an OMX color format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawFormat {
    Video(gst_video::VideoFormat),
    /// Zero-copy vendor surface, pushed as a descriptor.
    Surface(&'static str),
}

pub(crate) fn raw_format(color_format: u32) -> Option<RawFormat> {
    let format = match color_format {
        omx_sys::OMX_COLOR_FormatYUV420Planar | omx_sys::OMX_COLOR_FormatYUV420PackedPlanar => {
            RawFormat::Video(gst_video::VideoFormat::I420)
        }
        omx_sys::OMX_COLOR_FormatYUV420SemiPlanar => RawFormat::Video(gst_video::VideoFormat::Nv12),
        omx_sys::OMX_COLOR_FormatYCbYCr => RawFormat::Video(gst_video::VideoFormat::Yuy2),
        omx_sys::OMX_COLOR_FormatCbYCrY => RawFormat::Video(gst_video::VideoFormat::Uyvy),
        omx_sys::OMX_EXT_COLOR_FormatNV12T_Phyaddr_Fd => RawFormat::Surface(TILED_SURFACE_FORMAT),
        omx_sys::OMX_EXT_COLOR_FormatNV12L_Phyaddr_Fd => RawFormat::Surface(LINEAR_SURFACE_FORMAT),
        _ => return None,
    };
    Some(format)
}

/// Builds the source caps for a video output port.
///
/// # Arguments
/// * `definition` - Output port definition
/// * `crop` - Visible rectangle, when the component reported one
/// * `framerate` - Framerate of the upstream caps
///
/// # Returns
/// `None` for non-video ports and unknown color formats.
pub(crate) fn output_caps(
    definition: &PortDefinition,
    crop: Option<CropRect>,
    framerate: Option<gst::Fraction>,
) -> Option<gst::Caps> {
    if !definition.is_video {
        return None;
    }
    let (width, height) = match crop {
        Some(crop) if crop.width > 0 && crop.height > 0 => (crop.width, crop.height),
        _ => (definition.frame_width, definition.frame_height),
    };
    let width = i32::try_from(width).ok()?;
    let height = i32::try_from(height).ok()?;
    let framerate = framerate.unwrap_or_else(|| gst::Fraction::new(0, 1));

    let caps = match raw_format(definition.color_format)? {
        RawFormat::Video(format) => gst_video::VideoCapsBuilder::new()
            .format(format)
            .width(width)
            .height(height)
            .framerate(framerate)
            .build(),
        RawFormat::Surface(format) => gst::Caps::builder("video/x-raw")
            .field("format", format)
            .field("width", width)
            .field("height", height)
            .field("framerate", framerate)
            .build(),
    };
    Some(caps)
}

/// Picture size of negotiated raw video caps.
pub(crate) fn picture_size(caps: &gst::CapsRef) -> Option<(u32, u32)> {
    let structure = caps.structure(0)?;
    let width = structure.get::<i32>("width").ok()?;
    let height = structure.get::<i32>("height").ok()?;
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}

/// Codec configuration carried by upstream caps.
pub(crate) fn codec_data(structure: &StructureRef) -> Option<Vec<u8>> {
    let buffer = structure.get::<gst::Buffer>("codec_data").ok()?;
    let map = buffer.map_readable().ok()?;
    Some(map.as_slice().to_vec())
}

pub(crate) fn framerate(structure: &StructureRef) -> Option<gst::Fraction> {
    structure
        .get::<gst::Fraction>("framerate")
        .ok()
        .filter(|rate| rate.numer() > 0 && rate.denom() > 0)
}

/// Duration of one frame in nanoseconds.
pub(crate) fn frame_duration(framerate: gst::Fraction) -> Option<u64> {
    let numer = u64::try_from(framerate.numer()).ok().filter(|n| *n > 0)?;
    let denom = u64::try_from(framerate.denom()).ok().filter(|d| *d > 0)?;
    let ns = u128::from(gst::ClockTime::SECOND.nseconds()) * u128::from(denom) / u128::from(numer);
    u64::try_from(ns).ok()
}
