//! Settings and Component Resolution for OMX Filter
//!
//! Element properties and the optional configuration file both describe which
//! component to run. This module merges them into a [`Resolved`] description the
//! element uses to create its core.
//!
//! ## Key Types
//! - `Settings`: User-configurable properties
//! - `Resolved`: Library, component, role and core settings after merging
//! - `Context`: Runtime state created at NULL → READY

// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use gstreamer as gst;
use omx::{
    CodecHooks, Core, CoreSettings, FilterSettings, INPUT_PORT, OUTPUT_PORT,
    config::ComponentConfig,
};
use tracing::debug;

use crate::omxfilter::srcpad::PadBridge;

/// Core library loaded when neither the property nor the configuration names one.
pub(crate) const DEFAULT_LIBRARY_NAME: &str = "libomxil-bellagio.so.0";

pub(crate) const DEFAULT_USE_TIMESTAMPS: bool = true;

pub(crate) const DEFAULT_HLS_STREAMING: bool = false;

/// User-configurable settings for the omxfilter element.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    /// Vendor core library; empty means configuration file or default
    pub library_name: String,

    /// Component to get from the core library
    pub component_name: String,

    /// Role set on the component before it leaves Loaded
    pub component_role: String,

    /// Input buffer count, 0 keeps the component's count
    pub input_buffers: u32,

    /// Output buffer count, 0 keeps the component's count
    pub output_buffers: u32,

    pub use_timestamps: bool,

    /// Drop output frames whose timestamp goes backwards
    pub hls_streaming: bool,

    /// Accumulate input up to this many bytes, 0 disables the adapter
    pub adapter_size: u32,

    /// Caps set on the source pad in place of the upstream caps
    pub output_caps: Option<gst::Caps>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            library_name: String::new(),
            component_name: String::new(),
            component_role: String::new(),
            input_buffers: 0,
            output_buffers: 0,
            use_timestamps: DEFAULT_USE_TIMESTAMPS,
            hls_streaming: DEFAULT_HLS_STREAMING,
            adapter_size: 0,
            output_caps: None,
        }
    }
}

impl Settings {
    pub(crate) fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            use_timestamps: self.use_timestamps,
            hls_streaming: self.hls_streaming,
            adapter_size: self.adapter_size as usize,
        }
    }

    /// Merges the properties with the configuration of this element, if any.
    ///
    /// Non-empty properties win. The vendor and capabilities only come from the
    /// configuration file.
    ///
    /// # Errors
    ///
    /// Returns a message when no component name is known.
    pub(crate) fn resolve(&self, config: Option<&ComponentConfig>) -> Result<Resolved, String> {
        let pick = |property: &str, configured: Option<&String>| {
            if property.is_empty() {
                configured.cloned()
            } else {
                Some(property.to_string())
            }
        };

        let library_name = pick(
            &self.library_name,
            config.and_then(|config| config.library_name.as_ref()),
        )
        .unwrap_or_else(|| DEFAULT_LIBRARY_NAME.to_string());

        let component_name = pick(
            &self.component_name,
            config.and_then(|config| config.component_name.as_ref()),
        )
        .ok_or_else(|| "No component-name set".to_string())?;

        let component_role = pick(
            &self.component_role,
            config.and_then(|config| config.component_role.as_ref()),
        );

        let core_settings = config
            .map(ComponentConfig::core_settings)
            .unwrap_or_default();

        debug!(
            library_name,
            component_name,
            ?component_role,
            capabilities = ?core_settings.capabilities,
            "Resolved component"
        );

        Ok(Resolved {
            library_name,
            component_name,
            component_role,
            core_settings,
        })
    }
}

/// What the element runs, after merging properties and configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolved {
    pub library_name: String,
    pub component_name: String,
    pub component_role: Option<String>,
    pub core_settings: CoreSettings,
}

/// Codec hooks of the generic element: only applies the buffer-count properties.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ElementHooks {
    pub input_buffers: u32,
    pub output_buffers: u32,
}

impl CodecHooks for ElementHooks {
    fn setup(&self, core: &Core) -> omx::Result<()> {
        for (port, count) in [
            (INPUT_PORT, self.input_buffers),
            (OUTPUT_PORT, self.output_buffers),
        ] {
            if count > 0 {
                core.set_buffer_count(port, count)?;
            }
        }
        Ok(())
    }
}

/// Runtime state of the element, present between NULL → READY and READY → NULL.
pub(crate) struct State {
    pub filter: Arc<omx::Filter>,
    pub bridge: Arc<PadBridge>,
}

/// Context wrapper for the element's mutable state.
#[derive(Default)]
pub(crate) struct Context {
    pub state: Option<State>,
}
