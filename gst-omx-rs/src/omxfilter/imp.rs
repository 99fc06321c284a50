//! OMX Filter Implementation
//!
//! This module contains the core implementation of the omxfilter GStreamer element.
//! The element derives directly from `gst::Element` and owns both pads:
//! - Sink pad: `chain` feeds buffers to the component, events drive EOS, flushes
//!   and caps
//! - Source pad: a pad task repeatedly drains one output buffer and pushes it
//!
//! ## Element Lifecycle
//! - NULL → READY: resolve the component (properties, then configuration file),
//!   load the core library and get the component in Loaded state
//! - READY → PAUSED: source pad activation starts the output task once the
//!   component runs; buffers are allocated lazily on the first input buffer
//! - PAUSED → READY: source pad deactivation stops the output task
//! - READY → NULL: stop and unload the component, release it
//!
//! ## Implementation Structure
//! - `OmxFilter`: The struct holding pads, settings and runtime context
//! - `ObjectImpl`: GObject property system integration
//! - `ElementImpl`: Metadata, pad templates and state changes
//! - Pad functions: `sink_chain`, `sink_event`, `src_activatemode`

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
use gst::subclass::prelude::*;
use gstreamer as gst;

use omx::config::ConfigFile;
use omx::{Core, CropRect, InputFrame, OUTPUT_PORT, OmxComponentFactory, SourcePad};
use tracing::trace;

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::omxfilter;
use crate::omxfilter::caps;
use crate::omxfilter::srcpad::{PadBridge, ReadableBuffer, flow_to_gst};
use crate::omxfilter::state::{
    Context, DEFAULT_HLS_STREAMING, DEFAULT_USE_TIMESTAMPS, ElementHooks, Settings, State,
};

/// GStreamer debug category for logging omxfilter-specific messages.
///
/// Set GST_DEBUG=omxfilter:5 to see TRACE-level logs.
pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "omxfilter",
        gst::DebugColorFlags::empty(),
        Some("OpenMAX IL Filter"),
    )
});

/// Output format state carried between caps events and port settings changes.
#[derive(Default)]
struct OutputFormat {
    /// Framerate of the upstream caps, copied into the output caps
    framerate: Option<gst::Fraction>,

    /// Last crop rectangle reported by the component
    crop: Option<CropRect>,
}

/// OMX Filter element implementation.
///
/// Pads are created once in `with_class`. Everything tied to a component lives in
/// `context` between NULL → READY and READY → NULL.
pub struct OmxFilter {
    sinkpad: gst::Pad,
    srcpad: gst::Pad,

    /// User-configurable properties
    settings: Mutex<Settings>,

    /// Runtime state (streaming filter and source pad bridge)
    context: Mutex<Context>,

    output_format: Mutex<OutputFormat>,
}

#[glib::object_subclass]
impl ObjectSubclass for OmxFilter {
    /// Internal type name (must be unique across all GStreamer elements)
    const NAME: &'static str = "GstRsOmxFilter";

    type Type = omxfilter::OmxFilter;

    type ParentType = gst::Element;

    /// Creates the pads and wires their functions to this implementation.
    ///
    /// Every pad function goes through `catch_panic_pad_function`, which posts an
    /// error instead of unwinding into GStreamer.
    fn with_class(klass: &Self::Class) -> Self {
        let sinkpad = match klass.pad_template("sink") {
            Some(templ) => gst::Pad::builder_from_template(&templ),
            None => gst::Pad::builder(gst::PadDirection::Sink).name("sink"),
        }
        .chain_function(|pad, parent, buffer| {
            OmxFilter::catch_panic_pad_function(
                parent,
                || Err(gst::FlowError::Error),
                |filter| filter.sink_chain(pad, buffer),
            )
        })
        .event_function(|pad, parent, event| {
            OmxFilter::catch_panic_pad_function(
                parent,
                || false,
                |filter| filter.sink_event(pad, event),
            )
        })
        .build();

        let srcpad = match klass.pad_template("src") {
            Some(templ) => gst::Pad::builder_from_template(&templ),
            None => gst::Pad::builder(gst::PadDirection::Src).name("src"),
        }
        .activatemode_function(|pad, parent, mode, active| {
            OmxFilter::catch_panic_pad_function(
                parent,
                || Err(gst::loggable_error!(CAT, "Panic activating src pad")),
                |filter| filter.src_activatemode(pad, mode, active),
            )
        })
        .build();

        OmxFilter {
            sinkpad,
            srcpad,
            settings: Mutex::new(Settings::default()),
            context: Mutex::new(Context::default()),
            output_format: Mutex::new(OutputFormat::default()),
        }
    }
}

/// GObject property system implementation.
///
/// All properties describe the component and how it is fed, so they can only be
/// changed in NULL or READY state.
impl ObjectImpl for OmxFilter {
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: LazyLock<Vec<glib::ParamSpec>> = LazyLock::new(|| {
            vec![
                glib::ParamSpecString::builder("library-name")
                    .nick("Library name")
                    .blurb("OpenMAX IL core library, empty for the configured or default one")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecString::builder("component-name")
                    .nick("Component name")
                    .blurb("Name of the component to get from the core")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecString::builder("component-role")
                    .nick("Component role")
                    .blurb("Role set on the component, empty to keep its default")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("input-buffers")
                    .nick("Input buffers")
                    .blurb("Number of input buffers, 0 for the component's count")
                    .default_value(0)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("output-buffers")
                    .nick("Output buffers")
                    .blurb("Number of output buffers, 0 for the component's count")
                    .default_value(0)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecBoolean::builder("use-timestamps")
                    .nick("Use timestamps")
                    .blurb("Pass input timestamps to the component and take them back from its output")
                    .default_value(DEFAULT_USE_TIMESTAMPS)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecBoolean::builder("hls-streaming")
                    .nick("HLS streaming")
                    .blurb("Drop output frames whose timestamp goes backwards")
                    .default_value(DEFAULT_HLS_STREAMING)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecUInt::builder("adapter-size")
                    .nick("Adapter size")
                    .blurb("Accumulate audio input up to this many bytes, 0 to disable")
                    .default_value(0)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecBoxed::builder::<gst::Caps>("output-caps")
                    .nick("Output caps")
                    .blurb("Caps set on the source pad instead of the derived ones")
                    .mutable_ready()
                    .build(),
            ]
        });

        PROPERTIES.as_ref()
    }

    /// Called when the element is constructed (after allocation).
    ///
    /// Sets up tracing (if enabled) and adds both pads.
    fn constructed(&self) {
        #[cfg(feature = "tracing")]
        {
            use tracing_subscriber::filter::LevelFilter;
            use tracing_subscriber::util::SubscriberInitExt;

            let _ = tracing_subscriber::fmt()
                .compact()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(false)
                .with_max_level(LevelFilter::TRACE)
                .with_ansi(true)
                .finish()
                .try_init();
        }

        self.parent_constructed();

        let obj = self.obj();
        for pad in [&self.sinkpad, &self.srcpad] {
            if let Err(err) = obj.add_pad(pad) {
                gst::error!(CAT, imp = self, "Failed to add pad {}: {}", pad.name(), err);
            }
        }
    }

    /// Called when a property is set via g_object_set() or gst-launch.
    ///
    /// # Arguments
    /// * `_id` - Property index (unused; we match by name)
    /// * `value` - New value for the property
    /// * `pspec` - Property specification (contains name)
    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let Ok(mut settings) = self.settings.lock() else {
            gst::error!(
                CAT,
                imp = self,
                "Settings mutex poisoned, property change ignored"
            );
            return;
        };

        match pspec.name() {
            "library-name" | "component-name" | "component-role" => {
                let Ok(new_value) = value.get::<Option<String>>() else {
                    gst::error!(CAT, imp = self, "Invalid type for {}", pspec.name());
                    return;
                };
                let new_value = new_value.unwrap_or_default();
                let field = match pspec.name() {
                    "library-name" => &mut settings.library_name,
                    "component-name" => &mut settings.component_name,
                    _ => &mut settings.component_role,
                };
                gst::info!(
                    CAT,
                    imp = self,
                    "Changing {} from {:?} to {:?}",
                    pspec.name(),
                    field,
                    new_value
                );
                *field = new_value;
            }
            "input-buffers" | "output-buffers" | "adapter-size" => {
                let Ok(new_value) = value.get::<u32>() else {
                    gst::error!(CAT, imp = self, "Invalid type for {}", pspec.name());
                    return;
                };
                let field = match pspec.name() {
                    "input-buffers" => &mut settings.input_buffers,
                    "output-buffers" => &mut settings.output_buffers,
                    _ => &mut settings.adapter_size,
                };
                gst::info!(
                    CAT,
                    imp = self,
                    "Changing {} from {} to {}",
                    pspec.name(),
                    field,
                    new_value
                );
                *field = new_value;
            }
            "use-timestamps" | "hls-streaming" => {
                let Ok(new_value) = value.get::<bool>() else {
                    gst::error!(CAT, imp = self, "Invalid type for {}", pspec.name());
                    return;
                };
                let field = match pspec.name() {
                    "use-timestamps" => &mut settings.use_timestamps,
                    _ => &mut settings.hls_streaming,
                };
                gst::info!(
                    CAT,
                    imp = self,
                    "Changing {} from {} to {}",
                    pspec.name(),
                    field,
                    new_value
                );
                *field = new_value;
            }
            "output-caps" => match value.get::<Option<gst::Caps>>() {
                Ok(caps) => {
                    gst::info!(CAT, imp = self, "Changing output-caps to {:?}", caps);
                    settings.output_caps = caps;
                }
                Err(_) => gst::error!(CAT, imp = self, "Invalid type for output-caps"),
            },
            other => {
                gst::error!(CAT, imp = self, "Unknown property '{}'", other);
            }
        }
    }

    /// Called when a property is retrieved via g_object_get().
    ///
    /// # Returns
    /// GValue containing the property value
    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        match pspec.name() {
            "library-name" => settings.library_name.to_value(),
            "component-name" => settings.component_name.to_value(),
            "component-role" => settings.component_role.to_value(),
            "input-buffers" => settings.input_buffers.to_value(),
            "output-buffers" => settings.output_buffers.to_value(),
            "use-timestamps" => settings.use_timestamps.to_value(),
            "hls-streaming" => settings.hls_streaming.to_value(),
            "adapter-size" => settings.adapter_size.to_value(),
            "output-caps" => settings.output_caps.to_value(),
            _ => {
                gst::error!(CAT, imp = self, "Unknown property {}", pspec.name());
                pspec.default_value().clone()
            }
        }
    }
}

impl GstObjectImpl for OmxFilter {}

/// GStreamer element implementation.
impl ElementImpl for OmxFilter {
    /// Returns element metadata displayed by gst-inspect.
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gst::subclass::ElementMetadata> = LazyLock::new(|| {
            gst::subclass::ElementMetadata::new(
                "OpenMAX IL Filter",
                "Codec/Decoder/Encoder",
                "Runs buffers through an OpenMAX IL hardware component",
                "Contributors to the Media eXchange Layer project",
            )
        });

        Some(&*ELEMENT_METADATA)
    }

    /// Returns pad templates.
    ///
    /// Both pads accept anything: what the component takes and produces is only
    /// known once it is loaded, and the source caps are derived from its output
    /// port.
    fn pad_templates() -> &'static [gst::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Result<Vec<gst::PadTemplate>, glib::BoolError>> =
            LazyLock::new(|| {
                let caps = gst::Caps::new_any();
                let sink_pad_template = gst::PadTemplate::new(
                    "sink",
                    gst::PadDirection::Sink,
                    gst::PadPresence::Always,
                    &caps,
                )?;
                let src_pad_template = gst::PadTemplate::new(
                    "src",
                    gst::PadDirection::Src,
                    gst::PadPresence::Always,
                    &caps,
                )?;

                Ok(vec![sink_pad_template, src_pad_template])
            });

        match PAD_TEMPLATES.as_ref() {
            Ok(templates) => templates,
            Err(err) => {
                trace!("Failed to create pad templates: {:?}", err);
                &[]
            }
        }
    }

    /// Handles state transitions (NULL->READY->PAUSED->PLAYING).
    ///
    /// The component is created on the way up before the parent transition, and
    /// released on the way down after it, once the pads are deactivated.
    fn change_state(
        &self,
        transition: gst::StateChange,
    ) -> Result<gst::StateChangeSuccess, gst::StateChangeError> {
        gst::debug!(CAT, imp = self, "Changing state {:?}", transition);

        match transition {
            gst::StateChange::NullToReady => {
                if let Err(err) = self.open() {
                    self.post_error_message(err);
                    return Err(gst::StateChangeError);
                }
            }
            gst::StateChange::ReadyToPaused => {
                if let Some(filter) = self.filter() {
                    filter.reset_live_buffers();
                }
            }
            _ => {}
        }

        let success = self.parent_change_state(transition)?;

        match transition {
            gst::StateChange::PausedToReady => {
                if let Some(filter) = self.filter() {
                    filter.reset_reconfiguration();
                }
            }
            gst::StateChange::ReadyToNull => self.close(),
            _ => {}
        }

        Ok(success)
    }
}

impl OmxFilter {
    /// Streaming filter of the current component, if one is open.
    fn filter(&self) -> Option<Arc<omx::Filter>> {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .as_ref()
            .map(|state| state.filter.clone())
    }

    /// Creates the streaming filter and gets the component. Element NULL → READY.
    ///
    /// # Returns
    /// * `Ok(())` if the component is in Loaded state
    /// * `Err(ErrorMessage)` if the settings are incomplete or the component could
    ///   not be created
    fn open(&self) -> Result<(), gst::ErrorMessage> {
        let settings = self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let config_file = ConfigFile::from_env().map_err(|e| {
            gst::error_msg!(
                gst::LibraryError::Settings,
                ["Failed to read configuration file: {}", e]
            )
        })?;

        // Entries are keyed by element name first, then by factory name.
        let obj = self.obj();
        let element_name = obj.name();
        let factory_name = obj.factory().map(|factory| factory.name());
        let config = config_file.as_ref().and_then(|file| {
            file.component(&element_name)
                .or_else(|| factory_name.as_deref().and_then(|name| file.component(name)))
        });

        let resolved = settings
            .resolve(config)
            .map_err(|e| gst::error_msg!(gst::LibraryError::Settings, ["{}", e]))?;

        gst::info!(
            CAT,
            imp = self,
            "Opening {} from {}",
            resolved.component_name,
            resolved.library_name
        );

        let core = Core::new(&resolved.component_name, resolved.core_settings);
        self.install_callbacks(&core);

        let bridge = Arc::new(PadBridge::new(self.srcpad.clone()));
        let hooks = Arc::new(ElementHooks {
            input_buffers: settings.input_buffers,
            output_buffers: settings.output_buffers,
        });
        let filter = Arc::new(omx::Filter::new(
            core,
            hooks,
            bridge.clone(),
            settings.filter_settings(),
        ));
        bridge.bind(Arc::downgrade(&filter));

        let factory = OmxComponentFactory::new(
            resolved.library_name.as_str(),
            resolved.component_name.as_str(),
        );
        if let Err(e) = filter.open(&factory, resolved.component_role.as_deref()) {
            if let Err(close_err) = filter.close() {
                gst::debug!(CAT, imp = self, "Closing after failed open: {}", close_err);
            }
            return Err(gst::error_msg!(
                gst::LibraryError::Init,
                [
                    "Failed to open {} from {}: {}",
                    resolved.component_name,
                    resolved.library_name,
                    e
                ]
            ));
        }

        *self.output_format.lock().unwrap_or_else(PoisonError::into_inner) =
            OutputFormat::default();
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state = Some(State { filter, bridge });

        Ok(())
    }

    /// Stops, unloads and releases the component. Element READY → NULL.
    fn close(&self) {
        let state = self
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .take();
        let Some(state) = state else {
            return;
        };
        if let Err(e) = state.filter.close() {
            gst::warning!(CAT, imp = self, "Failed to close component: {}", e);
        }
        gst::info!(CAT, imp = self, "Closed");
    }

    /// Routes core notifications back to the element through weak references, so
    /// the core never keeps the element alive.
    fn install_callbacks(&self, core: &Core) {
        let weak = self.obj().downgrade();
        core.set_settings_changed_callback(Arc::new(move |core: &Core| {
            if let Some(element) = weak.upgrade() {
                element.imp().output_settings_changed(core);
            }
        }));

        let weak = self.obj().downgrade();
        core.set_element_error_callback(Arc::new(move |error: &omx::Error| {
            if let Some(element) = weak.upgrade() {
                gst::element_error!(
                    element,
                    gst::StreamError::Failed,
                    ("Component failed"),
                    ["{}", error]
                );
            }
        }));
    }

    /// Called to process each buffer received on the sink pad.
    ///
    /// # Returns
    /// * `Ok(FlowSuccess::Ok)` once the payload was handed to the component
    /// * `Err(FlowError)` mirroring the state of the output side
    fn sink_chain(
        &self,
        pad: &gst::Pad,
        buffer: gst::Buffer,
    ) -> Result<gst::FlowSuccess, gst::FlowError> {
        let Some(filter) = self.filter() else {
            gst::error!(CAT, obj = pad, "No component");
            return Err(gst::FlowError::Error);
        };

        let pts = buffer.pts().map(gst::ClockTime::nseconds);
        let duration = buffer.duration().map(gst::ClockTime::nseconds);
        let discont = buffer.flags().contains(gst::BufferFlags::DISCONT);

        let mapped = buffer.into_mapped_buffer_readable().map_err(|_| {
            gst::error!(CAT, obj = pad, "Failed to map input buffer");
            gst::FlowError::Error
        })?;

        let mut frame = InputFrame::new(ReadableBuffer(mapped));
        frame.pts = pts;
        frame.duration = duration;
        frame.discont = discont;

        filter
            .chain(frame)
            .map(|()| gst::FlowSuccess::Ok)
            .map_err(flow_to_gst)
    }

    /// Handles events arriving on the sink pad.
    ///
    /// EOS is handed to the component when it supports an EOS buffer, and then
    /// leaves through the output task. Flushes are forwarded first, then applied
    /// to the component.
    fn sink_event(&self, pad: &gst::Pad, event: gst::Event) -> bool {
        use gst::EventView;

        gst::log!(CAT, obj = pad, "Handling event {:?}", event);

        match event.view() {
            EventView::Eos(_) => {
                if self.filter().is_some_and(|filter| filter.handle_eos()) {
                    return true;
                }
                self.srcpad.push_event(event)
            }
            EventView::FlushStart(_) => {
                let forwarded = self.srcpad.push_event(event);
                if let Some(filter) = self.filter().filter(|filter| filter.accepts_flush()) {
                    filter.flush_start();
                }
                forwarded
            }
            EventView::FlushStop(_) => {
                let forwarded = self.srcpad.push_event(event);
                if let Some(filter) = self.filter().filter(|filter| filter.accepts_flush()) {
                    filter.flush_stop();
                }
                forwarded
            }
            EventView::Caps(caps_event) => {
                let caps = caps_event.caps_owned();
                self.sink_caps(&caps)
            }
            _ => gst::Pad::event_default(pad, Some(&*self.obj()), event),
        }
    }

    /// Applies upstream caps: codec data and frame duration go to the filter.
    ///
    /// Source caps are the `output-caps` property when set. Otherwise video output
    /// gets its caps from the component's port settings, and anything else
    /// forwards the upstream caps.
    fn sink_caps(&self, caps: &gst::Caps) -> bool {
        let Some(structure) = caps.structure(0) else {
            gst::warning!(CAT, imp = self, "Empty caps {}", caps);
            return false;
        };

        let framerate = caps::framerate(structure);
        self.output_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .framerate = framerate;

        let filter = self.filter();
        if let Some(filter) = &filter {
            filter.set_codec_data(caps::codec_data(structure));
            filter.set_frame_duration(framerate.and_then(caps::frame_duration));
        }

        let output_caps = self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output_caps
            .clone();
        if let Some(output_caps) = output_caps {
            gst::debug!(CAT, imp = self, "Replacing {} with {}", caps, output_caps);
            return self.srcpad.push_event(gst::event::Caps::new(&output_caps));
        }

        let video_output = filter
            .and_then(|filter| filter.core().port_definition(OUTPUT_PORT).ok())
            .is_some_and(|definition| definition.is_video);
        if video_output {
            gst::debug!(CAT, imp = self, "Source caps follow the output port settings");
            return true;
        }
        self.srcpad.push_event(gst::event::Caps::new(caps))
    }

    /// Called when the source pad is (de)activated.
    ///
    /// Only push mode is supported: activation resumes the ports and starts the
    /// output task when the component already runs, deactivation unblocks and
    /// stops it.
    fn src_activatemode(
        &self,
        pad: &gst::Pad,
        mode: gst::PadMode,
        active: bool,
    ) -> Result<(), gst::LoggableError> {
        if mode != gst::PadMode::Push {
            return Err(gst::loggable_error!(CAT, "Unsupported pad mode {:?}", mode));
        }

        let state = self
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .as_ref()
            .map(|state| (state.filter.clone(), state.bridge.clone()));
        let Some((filter, bridge)) = state else {
            return Ok(());
        };

        if active {
            if filter.set_active(true) && !bridge.start_task() {
                return Err(gst::loggable_error!(CAT, "Failed to start output task"));
            }
        } else {
            filter.set_active(false);
            pad.stop_task()
                .map_err(|e| gst::loggable_error!(CAT, "Failed to stop output task: {}", e))?;
        }
        gst::debug!(CAT, obj = pad, "Source pad active: {}", active);
        Ok(())
    }

    /// Derives source caps after the component reported new output settings.
    ///
    /// Runs on whichever thread the core notifies from: the component's event
    /// thread or the output task. The caps are queued on the pad bridge and leave
    /// with the next output buffer.
    pub(crate) fn output_settings_changed(&self, core: &Core) {
        let output_caps = self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output_caps
            .clone();

        let caps = match output_caps {
            Some(caps) => caps,
            None => {
                let definition = match core.port_definition(OUTPUT_PORT) {
                    Ok(definition) => definition,
                    Err(e) => {
                        gst::error!(CAT, imp = self, "Failed to get output port definition: {}", e);
                        return;
                    }
                };

                let mut format = self
                    .output_format
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if core.take_crop_changed() {
                    match core.output_crop(OUTPUT_PORT) {
                        Ok(crop) => format.crop = Some(crop),
                        Err(e) => gst::warning!(CAT, imp = self, "Failed to get crop: {}", e),
                    }
                }

                match caps::output_caps(&definition, format.crop, format.framerate) {
                    Some(caps) => caps,
                    None => {
                        gst::warning!(
                            CAT,
                            imp = self,
                            "No raw caps for output port {:?}",
                            definition
                        );
                        return;
                    }
                }
            }
        };

        let bridge = self
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .as_ref()
            .map(|state| state.bridge.clone());
        match bridge {
            Some(bridge) => {
                gst::info!(CAT, imp = self, "New output caps {}", caps);
                bridge.set_pending_caps(caps);
            }
            None => gst::debug!(CAT, imp = self, "Settings changed without a component"),
        }
    }
}
