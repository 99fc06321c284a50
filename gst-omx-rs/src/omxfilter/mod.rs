//! OMX Filter Element
//!
//! This module implements `omxfilter`, a GStreamer element wrapping one OpenMAX IL
//! component. Buffers arriving on the sink pad are fed to the component's input
//! port; a task on the source pad drains the output port.
//!
//! ## Responsibilities
//! - Loads the vendor core library and gets the component (NULL → READY)
//! - Allocates port buffers and starts the component on the first buffer
//! - Forwards EOS, flushes and caps, turning codec data into a codec config buffer
//! - Sets raw video caps on the source pad when the component reports new output
//!   settings
//!
//! ## Properties (set before READY state)
//! - `library-name`, `component-name`, `component-role`: which component to run
//! - `input-buffers`, `output-buffers`: buffer counts, 0 keeps the component default
//! - `use-timestamps`, `hls-streaming`, `adapter-size`: streaming behavior
//! - `output-caps`: caps set on the source pad instead of the upstream caps
//!
//! ## Example Pipeline
//! ```bash
//! gst-launch-1.0 filesrc location=clip.h264 ! h264parse ! \
//!     omxfilter library-name=libExynosOMX_Core.so \
//!     component-name=OMX.Exynos.AVC.Decoder component-role=video_decoder.avc ! \
//!     fakesink
//! ```

// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

// Copyright (C) 2020 Sebastian Dröge <sebastian@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use gst::glib;
use gst::prelude::*;
use gstreamer as gst;

/// Caps derived from port definitions and upstream caps
mod caps;

/// Core implementation (properties, pads, state changes)
mod imp;

/// Bridge between the streaming filter and the source pad
mod srcpad;

/// Settings and component configuration resolution
mod state;


/// GLib wrapper type for the OmxFilter element.
///
/// ## Inheritance Chain (GStreamer class hierarchy)
/// - `gst::Object` (base GStreamer object)
/// - `gst::Element` (has pads, state machine)
/// - `OmxFilter` (our custom implementation)
glib::wrapper! {
    pub struct OmxFilter(ObjectSubclass<imp::OmxFilter>) @extends gst::Element, gst::Object;
}

/// Registers the omxfilter element with GStreamer.
///
/// # Arguments
/// * `plugin` - The parent plugin instance
///
/// # Rank
/// The rank is NONE: the element needs a component name and is never autoplugged.
pub fn register(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    gst::Element::register(
        Some(plugin),
        "omxfilter",
        gst::Rank::NONE,
        OmxFilter::static_type(),
    )
}
