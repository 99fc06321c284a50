// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration of the core.
//!
//! Three sources feed it:
//! - environment switches selecting how port buffers are allocated, read once per
//!   port setup ([`SharingPolicy::from_env`]);
//! - an optional JSON file named by `GST_OMX_CONFIG` describing components per
//!   element ([`ConfigFile`]);
//! - defaults for timeouts and the error retry limit ([`CoreSettings`]).

use std::{collections::HashMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, component::PortDirection};

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV: &str = "GST_OMX_CONFIG";

/// Forces hardware-allocated buffers on both ports.
pub const ALLOCATE_ON_ENV: &str = "OMX_ALLOCATE_ON";
/// Forces sharing of pipeline buffers on both ports.
pub const SHARE_ON_ENV: &str = "OMX_SHARE_HACK_ON";
/// Disables sharing of pipeline buffers on both ports.
pub const SHARE_OFF_ENV: &str = "OMX_SHARE_HACK_OFF";

/// Number of frames per direction logged at a high level after each start or flush.
pub const MAX_DEBUG_FRAME_CNT: u32 = 10;

/// How the memory behind a port's buffer headers is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingMode {
    /// The component allocates the payloads (`AllocateBuffer`).
    Owned,
    /// The port allocates local memory and hands it over (`UseBuffer`).
    #[default]
    Local,
    /// Like [`SharingMode::Local`], but pipeline buffers are installed as payloads
    /// per frame, avoiding a copy.
    Shared,
    /// Output payloads are descriptors of zero-copy surfaces.
    Surface,
}

/// Allocation policy selected by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingPolicy {
    /// No switch set: the component's capabilities decide.
    #[default]
    Vendor,
    AllocateOn,
    ShareOn,
    ShareOff,
}

impl SharingPolicy {
    /// Reads the allocation switches. The first one set wins, in the order
    /// `OMX_ALLOCATE_ON`, `OMX_SHARE_HACK_ON`, `OMX_SHARE_HACK_OFF`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var_os(name).is_some())
    }

    /// Same as [`SharingPolicy::from_env`] with an injectable lookup.
    pub fn from_lookup(is_set: impl Fn(&str) -> bool) -> Self {
        if is_set(ALLOCATE_ON_ENV) {
            SharingPolicy::AllocateOn
        } else if is_set(SHARE_ON_ENV) {
            SharingPolicy::ShareOn
        } else if is_set(SHARE_OFF_ENV) {
            SharingPolicy::ShareOff
        } else {
            SharingPolicy::Vendor
        }
    }

    /// Picks the sharing mode of one port.
    ///
    /// # Arguments
    ///
    /// * `direction` - Direction of the port
    /// * `capabilities` - Capabilities of the component
    /// * `hardware_addressable` - Whether the port's color format carries image
    ///   descriptors rather than pixels
    /// * `has_surfaces` - Whether a surface allocator is available
    pub fn mode_for(
        self,
        direction: PortDirection,
        capabilities: &Capabilities,
        hardware_addressable: bool,
        has_surfaces: bool,
    ) -> SharingMode {
        if self == SharingPolicy::AllocateOn {
            return SharingMode::Owned;
        }
        if direction == PortDirection::Output && hardware_addressable && has_surfaces {
            return SharingMode::Surface;
        }
        match self {
            SharingPolicy::AllocateOn => SharingMode::Owned,
            SharingPolicy::ShareOn => SharingMode::Shared,
            SharingPolicy::ShareOff => SharingMode::Local,
            SharingPolicy::Vendor if !capabilities.share_input_buffers => SharingMode::Local,
            SharingPolicy::Vendor => match direction {
                PortDirection::Input => SharingMode::Shared,
                PortDirection::Output if hardware_addressable => SharingMode::Local,
                PortDirection::Output => SharingMode::Shared,
            },
        }
    }
}

/// Vendor family of a component. Only used to default its [`Capabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Vendor {
    #[default]
    Default,
    SlsiSec,
    SlsiExynos,
}

/// Behavioral differences between components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Capabilities {
    /// The component reconfigures its output port on `PortSettingsChanged`.
    pub reconfiguration: bool,
    /// EOS is signalled to the component with an empty input buffer flagged EOS.
    pub eos_buffer: bool,
    /// Input buffers (and non-surface output buffers) share pipeline memory by default.
    pub share_input_buffers: bool,
    /// The MFC init error is retried instead of failing state changes.
    pub tolerate_init_error: bool,
    /// No flush buffer is pushed for a resolution change before the first output frame.
    pub skip_first_flush_buffer: bool,
}

impl Capabilities {
    pub fn for_vendor(vendor: Vendor) -> Self {
        match vendor {
            Vendor::Default => Capabilities {
                reconfiguration: true,
                eos_buffer: false,
                share_input_buffers: false,
                tolerate_init_error: false,
                skip_first_flush_buffer: false,
            },
            Vendor::SlsiSec => Capabilities {
                reconfiguration: false,
                eos_buffer: true,
                share_input_buffers: true,
                tolerate_init_error: true,
                skip_first_flush_buffer: false,
            },
            Vendor::SlsiExynos => Capabilities {
                reconfiguration: true,
                eos_buffer: true,
                share_input_buffers: true,
                tolerate_init_error: true,
                skip_first_flush_buffer: true,
            },
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::for_vendor(Vendor::Default)
    }
}

/// Bounded waits used by the core and the streaming loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Acknowledgment of a state change.
    pub state_change: Duration,
    /// Completion of a resolution change, waited on by the output loop.
    pub reconfiguration: Duration,
    /// Return of output frames still held downstream at teardown.
    pub live_buffers: Duration,
    /// Port enable, disable and flush completion.
    pub port: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            state_change: Duration::from_secs(3),
            reconfiguration: Duration::from_secs(5),
            live_buffers: Duration::from_millis(500),
            port: Duration::from_secs(3),
        }
    }
}

/// Per-core settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreSettings {
    pub timeouts: Timeouts,
    pub capabilities: Capabilities,
    /// Occurrences of a tolerated error after which the component is forced to Pause.
    pub retry_limit: u32,
}

impl Default for CoreSettings {
    fn default() -> Self {
        CoreSettings {
            timeouts: Timeouts::default(),
            capabilities: Capabilities::default(),
            retry_limit: 10,
        }
    }
}

impl CoreSettings {
    pub fn for_vendor(vendor: Vendor) -> Self {
        CoreSettings {
            capabilities: Capabilities::for_vendor(vendor),
            ..Default::default()
        }
    }
}

/// Component description for one element, as found in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ComponentConfig {
    pub library_name: Option<String>,
    pub component_name: Option<String>,
    pub component_role: Option<String>,
    pub vendor: Vendor,
    /// Replaces the vendor defaults entirely when present.
    pub capabilities: Option<Capabilities>,
}

impl ComponentConfig {
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
            .unwrap_or_else(|| Capabilities::for_vendor(self.vendor))
    }

    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            capabilities: self.capabilities(),
            ..Default::default()
        }
    }
}

/// The configuration file: element names mapped to components.
///
/// ```json
/// {
///   "omxh264dec": {
///     "library-name": "libExynosOMX_Core.so",
///     "component-name": "OMX.Exynos.AVC.Decoder",
///     "component-role": "video_decoder.avc",
///     "vendor": "slsi-exynos"
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigFile {
    pub elements: HashMap<String, ComponentConfig>,
}

impl ConfigFile {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        debug!(path = %path.display(), elements = config.elements.len(), "Loaded configuration");
        Ok(config)
    }

    /// Loads the file named by `GST_OMX_CONFIG`, if set.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path).map(Some),
            None => Ok(None),
        }
    }

    pub fn component(&self, element: &str) -> Option<&ComponentConfig> {
        self.elements.get(element)
    }
}
