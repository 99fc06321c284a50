//! GStreamer Plugin for OpenMAX IL hardware codecs
//!
//! This crate implements a GStreamer plugin providing the `omxfilter` element, which
//! runs a vendor OpenMAX IL component (decoder or encoder) inside a pipeline:
//!
//! - Upstream buffers are fed to the component's input port
//! - A pad task drains the output port and pushes frames downstream
//! - Dynamic resolution changes, flushes and EOS are handled by the [`omx`] core
//!
//! ## Selecting a Component
//! The component is chosen with the `library-name`, `component-name` and
//! `component-role` properties, or from a JSON file named by `GST_OMX_CONFIG` that
//! maps element names to components. Properties win over the file.
//!
//! ## GStreamer Concepts (for non-GStreamer developers)
//! - **Element**: A processing unit in a pipeline (source, filter, or sink)
//! - **Plugin**: A dynamically loadable library containing one or more elements
//! - **Pad task**: A thread owned by a pad, here the one pushing decoded frames
//! - **Caps (Capabilities)**: Media format descriptions (resolution, framerate, etc.)

// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

// Copyright (C) 2017 Sebastian Dröge <sebastian@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::non_send_fields_in_send_ty, unused_doc_comments)]

use gst::glib;
use gstreamer as gst;

/// OMX filter element (feeds a hardware codec, pushes its output)
pub mod omxfilter;

/// Registers all elements of the plugin.
///
/// # Arguments
/// * `plugin` - The GStreamer plugin instance being initialized
fn plugin_init(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    omxfilter::register(plugin)?;

    Ok(())
}

gst::plugin_define!(
    omx,
    env!("CARGO_PKG_DESCRIPTION"),
    plugin_init,
    concat!(env!("CARGO_PKG_VERSION"), "-", env!("COMMIT_ID")),
    "Apache-2.0",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_REPOSITORY"),
    env!("BUILD_REL_DATE")
);
