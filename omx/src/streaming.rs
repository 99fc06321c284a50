// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The element-side streaming logic, independent of any pipeline framework.
//!
//! A [`Filter`] feeds input frames into the input port ([`Filter::chain`]) and drains
//! the output port from a dedicated task ([`Filter::output_iteration`]). Everything the
//! filter needs from the pipeline goes through the [`SourcePad`] trait, so the same
//! logic drives a GStreamer element and the tests.
//!
//! ```text
//!   chain(frame) ──► input Port ──► component ──► output Port ──► output_iteration()
//!                                                                   │
//!                                                      SourcePad::push(OutputFrame)
//! ```

use std::{
    fmt,
    ops::Range,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tracing::{debug, error, info, trace, warn};

use crate::{
    Error, Result,
    adapter::ByteAdapter,
    buffer::{BufferFlags, OmxBuffer, SharedMemory},
    command::Command,
    component::{ComponentFactory, PortDirection, State},
    config::{SharingMode, SharingPolicy},
    core::{Core, WeakCore},
    hooks::{CodecHooks, CodecType, HookResult},
    reconfig::ReconfState,
    surface::{self, Surface},
};

/// Clock rate of component timestamps.
pub const OMX_TICKS_PER_SECOND: u64 = 1_000_000;

const NSECS_PER_TICK: u64 = 1_000_000_000 / OMX_TICKS_PER_SECOND;

/// Converts a pipeline timestamp in nanoseconds to component ticks.
///
/// A missing timestamp and values out of range saturate to `i64::MAX`.
pub fn to_ticks(ns: Option<u64>) -> i64 {
    match ns {
        Some(ns) => i64::try_from(ns / NSECS_PER_TICK).unwrap_or(i64::MAX),
        None => i64::MAX,
    }
}

/// Converts component ticks back to nanoseconds. `i64::MAX` and negative values
/// carry no timestamp.
pub fn from_ticks(ticks: i64) -> Option<u64> {
    if ticks == i64::MAX || ticks < 0 {
        return None;
    }
    Some((ticks as u64).saturating_mul(NSECS_PER_TICK))
}

/// Timestamp of the bytes at `offset` in a frame of `size` bytes, assuming they are
/// spread evenly over the frame's duration.
pub fn interpolate(pts: Option<u64>, offset: usize, size: usize, duration: Option<u64>) -> Option<u64> {
    let pts = pts?;
    match duration {
        Some(duration) if offset > 0 && size > 0 => {
            let shift = (offset as u128 * duration as u128 / size as u128).min(u64::MAX as u128);
            Some(pts.saturating_add(shift as u64))
        }
        _ => Some(pts),
    }
}

/// Why streaming stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("flushing")]
    Flushing,
    #[error("end of stream")]
    Eos,
    #[error("not negotiated")]
    NotNegotiated,
    #[error("stream error")]
    Error,
}

pub type FlowResult = std::result::Result<(), FlowError>;

/// An upstream frame entering [`Filter::chain`].
pub struct InputFrame {
    pub payload: Box<dyn SharedMemory>,
    /// Presentation timestamp in nanoseconds.
    pub pts: Option<u64>,
    pub duration: Option<u64>,
    pub discont: bool,
}

impl InputFrame {
    pub fn new(payload: impl SharedMemory + 'static) -> Self {
        InputFrame {
            payload: Box::new(payload),
            pts: None,
            duration: None,
            discont: false,
        }
    }

    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn data(&self) -> &[u8] {
        self.payload.as_slice()
    }
}

impl fmt::Debug for InputFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFrame")
            .field("size", &self.data().len())
            .field("pts", &self.pts)
            .field("duration", &self.duration)
            .field("discont", &self.discont)
            .finish()
    }
}

/// Memory of a frame leaving the filter.
pub enum OutputPayload {
    /// Copied out of a buffer header.
    Copied(Vec<u8>),
    /// Pipeline memory the component wrote into directly.
    Shared {
        memory: Box<dyn SharedMemory>,
        range: Range<usize>,
    },
    /// A zero-copy surface. Dropping the guard hands the buffer back to the component.
    Surface(OutputGuard),
}

impl OutputPayload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            OutputPayload::Copied(data) => data,
            OutputPayload::Shared { memory, range } => memory.as_slice().get(range.clone()).unwrap_or_default(),
            OutputPayload::Surface(guard) => guard.as_ref(),
        }
    }
}

impl fmt::Debug for OutputPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            OutputPayload::Copied(_) => "Copied",
            OutputPayload::Shared { .. } => "Shared",
            OutputPayload::Surface(_) => "Surface",
        };
        write!(f, "{kind}({} bytes)", self.as_slice().len())
    }
}

/// A frame produced by the component.
#[derive(Debug)]
pub struct OutputFrame {
    pub payload: OutputPayload,
    pub pts: Option<u64>,
    pub duration: Option<u64>,
    pub flags: BufferFlags,
    /// Picture size carried by a zero-copy surface.
    pub dimensions: Option<(u32, u32)>,
}

/// What the filter needs from the pipeline's source side.
pub trait SourcePad: Send + Sync {
    fn push(&self, frame: OutputFrame) -> FlowResult;

    fn push_eos(&self);

    /// Pushes the synthetic buffer that makes downstream release old surfaces.
    fn push_flush_buffer(&self, data: Vec<u8>) -> FlowResult;

    /// Whether output caps have been set.
    fn is_negotiated(&self) -> bool;

    /// Picture size of the negotiated caps, for video.
    fn negotiated_size(&self) -> Option<(u32, u32)>;

    /// Memory for a shared output buffer, `None` when downstream cannot provide it.
    fn allocate(&self, size: usize) -> Option<Box<dyn SharedMemory>>;

    /// Starts the task calling [`Filter::output_iteration`]. Returns false on failure.
    fn start_task(&self) -> bool;

    fn pause_task(&self);
}

/// Count of zero-copy frames held outside the filter.
#[derive(Default)]
pub struct LiveBuffers {
    count: Mutex<usize>,
    cond: Condvar,
}

impl LiveBuffers {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self) -> usize {
        *self.lock()
    }

    fn acquire(&self) {
        *self.lock() += 1;
    }

    fn release(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        drop(count);
        self.cond.notify_all();
    }

    fn reset(&self) {
        *self.lock() = 0;
    }

    /// Waits until every frame came back. Gives up once no frame came back for
    /// `timeout`, and returns whether all did.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut count = self.lock();
        while *count > 0 {
            error!(live = *count, "Waiting for live output buffers");
            let (guard, result) = self
                .cond
                .wait_timeout(count, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
            if result.timed_out() {
                error!(live = *count, ?timeout, "Live buffer wait timed out");
                break;
            }
        }
        *count == 0
    }
}

/// A zero-copy output buffer pushed downstream.
///
/// Holds the buffer header and a reference on its surface. Dropping it returns the
/// header according to the core's situation at that moment: back to the queue while
/// flushing, to the free path during a resolution change, to the hardware while
/// streaming, and nowhere once the core stopped (the header is then freed with the
/// port).
pub struct OutputGuard {
    buffer: Option<OmxBuffer>,
    core: WeakCore,
    port: u32,
    surface: Arc<dyn Surface>,
    len: usize,
    live: Arc<LiveBuffers>,
}

// Safety: the guard is the only owner of its header, and the surface is `Sync`.
unsafe impl Sync for OutputGuard {}

impl OutputGuard {
    fn new(buffer: OmxBuffer, core: &Core, surface: Arc<dyn Surface>, len: usize, live: Arc<LiveBuffers>) -> Self {
        live.acquire();
        OutputGuard {
            port: core.output_port().index(),
            buffer: Some(buffer),
            core: core.downgrade(),
            surface,
            len,
            live,
        }
    }

    pub fn descriptor(&self) -> omx_sys::ScmnImgb {
        self.surface.descriptor()
    }
}

impl AsRef<[u8]> for OutputGuard {
    fn as_ref(&self) -> &[u8] {
        let data = self.surface.data();
        &data[..self.len.min(data.len())]
    }
}

impl fmt::Debug for OutputGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputGuard")
            .field("buffer", &self.buffer)
            .field("port", &self.port)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        self.live.release();
        let Some(mut buffer) = self.buffer.take() else {
            return;
        };
        let Some(core) = self.core.upgrade() else {
            error!(?buffer, "Output buffer finalized after its core was freed");
            return;
        };
        let state = core.state();
        if !state.is_streaming() {
            error!(?buffer, %state, "Output buffer finalized in wrong state");
            return;
        }
        let Some(port) = core.port(self.port) else {
            return;
        };
        if port.is_flushing() {
            warn!(?buffer, "Flushing, queueing output buffer");
            port.push_buffer(buffer);
            return;
        }
        if core.reconfiguration().in_session() && !port.is_enabled() {
            info!(?buffer, "Freeing output buffer during settings change");
            core.push_command(Command::FreeBuffer(port.index(), buffer));
            return;
        }
        trace!(?buffer, "FillThisBuffer from finalized output buffer");
        buffer.set_filled_len(0);
        if let Err(error) = port.release_buffer(buffer) {
            warn!(%error, "Failed to return output buffer");
        }
    }
}

/// Element settings the streaming logic depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSettings {
    /// Carry timestamps through the component.
    pub use_timestamps: bool,
    /// Drop output frames whose timestamp goes backwards.
    pub hls_streaming: bool,
    /// Accumulate input up to this many bytes before feeding it, 0 to disable.
    pub adapter_size: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        FilterSettings {
            use_timestamps: true,
            hls_streaming: false,
            adapter_size: 0,
        }
    }
}

/// Streaming state of one element.
pub struct Filter {
    core: Core,
    hooks: Arc<dyn CodecHooks>,
    src: Arc<dyn SourcePad>,
    settings: FilterSettings,
    ready: Mutex<bool>,
    last_push: Mutex<FlowResult>,
    /// Last pushed timestamp, for the monotonic timestamp guard.
    previous_ts: AtomicU64,
    /// Duration set on output frames, `u64::MAX` when unknown.
    duration: AtomicU64,
    produced_output: AtomicBool,
    codec_data: Mutex<Option<Vec<u8>>>,
    adapter: Mutex<ByteAdapter>,
    live: Arc<LiveBuffers>,
}

impl Filter {
    pub fn new(
        core: Core,
        hooks: Arc<dyn CodecHooks>,
        src: Arc<dyn SourcePad>,
        settings: FilterSettings,
    ) -> Self {
        Filter {
            core,
            hooks,
            src,
            settings,
            ready: Mutex::new(false),
            last_push: Mutex::new(Ok(())),
            previous_ts: AtomicU64::new(0),
            duration: AtomicU64::new(u64::MAX),
            produced_output: AtomicBool::new(false),
            codec_data: Mutex::new(None),
            adapter: Mutex::new(ByteAdapter::default()),
            live: Arc::new(LiveBuffers::default()),
        }
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn settings(&self) -> FilterSettings {
        self.settings
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_push(&self) -> FlowResult {
        *self.last_push.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_push(&self, result: FlowResult) {
        *self.last_push.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }

    pub fn live_buffers(&self) -> &LiveBuffers {
        &self.live
    }

    /// Codec configuration sent with `CODECCONFIG` right after the component starts.
    pub fn set_codec_data(&self, codec_data: Option<Vec<u8>>) {
        *self.codec_data.lock().unwrap_or_else(PoisonError::into_inner) = codec_data;
    }

    /// Duration stamped on every output frame, usually one frame at the negotiated rate.
    pub fn set_frame_duration(&self, duration: Option<u64>) {
        self.duration
            .store(duration.unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    fn frame_duration(&self) -> Option<u64> {
        let duration = self.duration.load(Ordering::Relaxed);
        (duration != u64::MAX).then_some(duration)
    }

    /// Gets the component and runs the codec's instance hook. Element NULL → READY.
    ///
    /// # Errors
    ///
    /// Returns an error if the component cannot be created or is not Loaded.
    pub fn open(&self, factory: &dyn ComponentFactory, role: Option<&str>) -> Result<()> {
        self.core.init(factory, role)?;
        self.hooks.instance_init(&self.core);
        self.core.reset_log_counts();
        let state = self.core.state();
        if state != State::Loaded {
            return Err(Error::WrongState {
                expected: State::Loaded,
                current: state,
            });
        }
        self.adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    /// Element READY → PAUSED.
    pub fn reset_live_buffers(&self) {
        self.live.reset();
    }

    /// Element PAUSED → READY.
    pub fn reset_reconfiguration(&self) {
        self.core.reconfiguration().reset();
    }

    /// Stops and unloads the component, waiting for zero-copy frames still held
    /// downstream, then releases it. Element READY → NULL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongState`] if the component did not get back to Loaded. The
    /// component is released in any case.
    pub fn close(&self) -> Result<()> {
        let mut unload_result = Ok(());
        {
            let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
            if *ready {
                debug!("Finishing ports and unloading component");
                self.core.input_port().finish();
                self.core.output_port().finish();
                self.core.finish_commands();
                if let Err(error) = self.core.stop() {
                    warn!(%error, "Failed to stop component");
                }
                self.live
                    .wait_idle(self.core.settings().timeouts.live_buffers);
                unload_result = self.core.unload();
                *ready = false;
            }
        }
        let state = self.core.state();
        self.adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.core.reset_log_counts();
        self.hooks.instance_deinit(&self.core);
        self.core.deinit();
        unload_result?;
        if !matches!(state, State::Loaded | State::Invalid) {
            return Err(Error::WrongState {
                expected: State::Loaded,
                current: state,
            });
        }
        Ok(())
    }

    /// Source pad (de)activation. Returns whether the output task should be started.
    pub fn set_active(&self, active: bool) -> bool {
        let ready = self.is_ready();
        if active {
            self.set_last_push(Ok(()));
            if ready {
                self.core.input_port().resume();
                self.core.output_port().resume();
            }
            ready
        } else {
            self.set_last_push(Err(FlowError::Flushing));
            if ready {
                self.core.input_port().pause();
                self.core.output_port().pause();
            }
            false
        }
    }

    /// Turns the current situation into a flow error, posting an element error for
    /// component errors and wrong states.
    fn stream_failure(&self, fallback: FlowError) -> FlowError {
        let state = self.core.state();
        let error = match self.core.error() {
            Some(code) => Some(Error::Omx { code }),
            None if !state.is_streaming() => Some(Error::WrongState {
                expected: State::Executing,
                current: state,
            }),
            None => None,
        };
        match error {
            Some(error) => {
                self.core.post_error_once(&error);
                FlowError::Error
            }
            None => self.last_push().err().unwrap_or(fallback),
        }
    }

    fn setup_ports(&self) {
        let policy = SharingPolicy::from_env();
        debug!(?policy, "Setting up ports");
        self.core.input_port().setup(policy);
        self.core.output_port().setup(policy);
        debug!(
            input = ?self.core.input_port().sharing_mode(),
            output = ?self.core.output_port().sharing_mode(),
            "Sharing modes"
        );
    }

    fn loaded_to_idle(&self) -> FlowResult {
        let prepared = {
            let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
            warn!("Preparing component");
            let result = self
                .hooks
                .setup(&self.core)
                .and_then(|()| {
                    self.setup_ports();
                    self.core.prepare()
                });
            if self.core.state() == State::Idle {
                *ready = true;
                if !self.src.start_task() {
                    error!("Failed to start output task");
                }
            }
            result
        };
        if self.core.state() != State::Idle {
            if let Err(error) = prepared {
                error!(%error, "Failed to prepare component");
            }
            return Err(self.stream_failure(FlowError::Flushing));
        }
        Ok(())
    }

    fn idle_to_executing(&self) -> FlowResult {
        warn!("Starting component");
        if let Err(error) = self.core.start() {
            error!(%error, "Failed to start component");
        }
        if self.core.state() != State::Executing {
            return Err(self.stream_failure(FlowError::Flushing));
        }
        self.produced_output.store(false, Ordering::Relaxed);

        let codec_data = self
            .codec_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(codec_data) = codec_data {
            let input = self.core.input_port();
            if let Some(mut buffer) = input.request_buffer() {
                let written = copy_into(&mut buffer, &codec_data);
                let mut flags = buffer.flags();
                flags.insert(BufferFlags::CODECCONFIG);
                buffer.set_flags(flags);
                debug!(size = written, "Sending codec data");
                if let Err(error) = input.release_buffer(buffer) {
                    warn!(%error, "Failed to send codec data");
                }
            }
        }
        Ok(())
    }

    /// Feeds one upstream frame to the component. Blocks while no input buffer is
    /// free.
    pub fn chain(&self, mut frame: InputFrame) -> FlowResult {
        let state = self.core.state();
        match self.core.next_log_index(PortDirection::Input) {
            Some(index) => warn!(index, ?frame, %state, "IN_BUF"),
            None => trace!(?frame, %state, "IN_BUF"),
        }

        if self.core.state() == State::Loaded {
            self.loaded_to_idle()?;
        }

        let input = self.core.input_port();
        if !input.is_enabled() {
            warn!("Input port disabled");
            return Err(FlowError::Eos);
        }

        if self.core.state() == State::Idle {
            self.idle_to_executing()?;
        }
        if self.core.state() != State::Executing {
            error!(state = %self.core.state(), "Component not executing");
        }

        match self.hooks.process_input(&self.core, &mut frame) {
            HookResult::Ok => {}
            HookResult::Skip => return Ok(()),
            HookResult::Error => return Err(FlowError::Error),
        }

        if self.settings.adapter_size > 0 {
            let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
            if frame.discont {
                info!("Discontinuity, clearing adapter");
                adapter.clear();
            }
            let current_len = frame.data().len();
            adapter.push(frame.data(), frame.pts);
            let available = adapter.available();
            if available < self.settings.adapter_size {
                trace!(available, "Not enough data in adapter");
                return Ok(());
            }
            let size = if available > self.settings.adapter_size {
                available - current_len
            } else {
                available
            };
            let pts = adapter.prev_timestamp();
            let data = adapter.take(size);
            drop(adapter);
            let duration = match (frame.pts, pts) {
                (Some(current), Some(previous)) => current.checked_sub(previous),
                _ => None,
            };
            trace!(size, ?pts, ?duration, "Took data from adapter");
            self.feed(Box::new(data), pts, duration)
        } else {
            self.feed(frame.payload, frame.pts, frame.duration)
        }
    }

    fn feed(&self, payload: Box<dyn SharedMemory>, pts: Option<u64>, duration: Option<u64>) -> FlowResult {
        let input = self.core.input_port();
        let size = payload.as_slice().len();
        let shared = input.sharing_mode() == SharingMode::Shared;
        let mut payload = Some(payload);
        let mut offset = 0;

        while offset < size {
            if self.last_push().is_err() || !self.core.state().is_streaming() {
                if self.core.reconfiguration().in_session() {
                    warn!("Settings change in progress, feeding anyway");
                } else {
                    warn!(last_push = ?self.last_push(), state = %self.core.state(), "Leaving input loop");
                    return Err(self.stream_failure(FlowError::Flushing));
                }
            }

            let Some(mut buffer) = input.request_buffer() else {
                warn!("No input buffer");
                return Err(self.stream_failure(FlowError::Flushing));
            };

            let attach = shared && offset == 0 && buffer.offset() == 0;
            let written = match payload.take() {
                Some(memory) if attach => match input.attach(&mut buffer, memory) {
                    Ok(()) => {
                        buffer.set_filled_len(size as u32);
                        size
                    }
                    Err(memory) => {
                        let written = copy_into(&mut buffer, &memory.as_slice()[offset..]);
                        payload = Some(memory);
                        written
                    }
                },
                Some(memory) => {
                    let written = copy_into(&mut buffer, &memory.as_slice()[offset..]);
                    payload = Some(memory);
                    written
                }
                None => 0,
            };
            if written == 0 {
                error!(?buffer, "Input buffer has no room");
                input.push_buffer(buffer);
                self.core
                    .post_error_once(&Error::Allocation("input buffer without payload".to_string()));
                return Err(FlowError::Error);
            }

            if self.settings.use_timestamps {
                buffer.set_timestamp(to_ticks(interpolate(pts, offset, size, duration)));
            }
            offset += written;

            trace!(?buffer, "EmptyThisBuffer");
            if let Err(error) = input.release_buffer(buffer) {
                error!(%error, "Failed to feed input buffer");
                self.core.post_error_once(&error);
                return Err(FlowError::Error);
            }
        }
        Ok(())
    }

    /// One iteration of the output task. Pauses the task when the result is not Ok.
    pub fn output_iteration(&self) -> FlowResult {
        let result = match self.core.error() {
            Some(code) => {
                self.core.post_error_once(&Error::Omx { code });
                Err(FlowError::Error)
            }
            None => self.drain_one(),
        };
        self.set_last_push(result);
        if let Err(reason) = result {
            info!(%reason, "Pausing output task");
            self.src.pause_task();
        }
        result
    }

    fn drain_one(&self) -> FlowResult {
        self.last_push()?;
        if !self.is_ready() {
            error!("Output task running before the component is ready");
            return Err(FlowError::Error);
        }

        let output = self.core.output_port().clone();
        if output.is_flushing() {
            debug!("Output port flushing");
            return Ok(());
        }

        if !output.is_enabled() {
            if self.core.reconfig_state() == ReconfState::Start {
                self.send_flush_buffer_and_wait();
            }
            return Ok(());
        }

        let Some(mut buffer) = output.request_buffer() else {
            if self.core.reconfiguration().in_session() {
                warn!("No output buffer during settings change");
                return Ok(());
            }
            warn!("No output buffer, leaving");
            return Err(FlowError::Flushing);
        };
        trace!(?buffer, "Output buffer");

        let flags = buffer.flags();
        let eos = flags.contains(BufferFlags::EOS);
        if buffer.filled_len() == 0 && !eos {
            debug!("Empty output buffer, recycling");
            if let Err(error) = output.release_buffer(buffer) {
                warn!(%error, "Failed to recycle empty buffer");
            }
            return Ok(());
        }

        if buffer.filled_len() > 0
            && self.core.input_port().is_enabled()
            && !self.src.is_negotiated()
        {
            warn!("Output not negotiated, faking settings changed notification");
            self.core.notify_settings_changed();
        }

        let pts = if self.settings.use_timestamps {
            from_ticks(buffer.timestamp())
        } else {
            None
        };
        let mode = output.sharing_mode();
        let mut result = Ok(());

        let remaining = if buffer.filled_len() == 0 {
            Some(buffer)
        } else if flags.contains(BufferFlags::CODECCONFIG) {
            warn!(size = buffer.filled_len(), "Codec config from component");
            self.hooks.process_output_caps(&self.core, buffer.data());
            Some(buffer)
        } else if mode == SharingMode::Surface {
            if flags.contains(BufferFlags::DECODEONLY) {
                info!("Decode-only frame, recycling");
                if let Err(error) = output.release_buffer(buffer) {
                    warn!(%error, "Failed to recycle decode-only buffer");
                }
                return Ok(());
            }
            let frame = self.wrap_surface(buffer, pts, flags)?;
            result = self.push_frame(frame);
            None
        } else {
            let attached = if mode == SharingMode::Shared && !eos {
                output.detach(&mut buffer)
            } else {
                None
            };
            let payload = match attached {
                Some(memory) => {
                    let start = buffer.offset() as usize;
                    OutputPayload::Shared {
                        memory,
                        range: start..start + buffer.filled_len() as usize,
                    }
                }
                None => {
                    if mode == SharingMode::Shared {
                        warn!("Could not hand off output memory, copying");
                    }
                    OutputPayload::Copied(buffer.data().to_vec())
                }
            };
            result = self.push_frame(OutputFrame {
                payload,
                pts,
                duration: None,
                flags,
                dimensions: None,
            });
            if mode == SharingMode::Shared {
                self.attach_downstream_memory(&mut buffer);
            }
            Some(buffer)
        };

        match remaining {
            Some(mut buffer) if eos => {
                warn!("Got EOS");
                let mut flags = buffer.flags();
                flags.remove(BufferFlags::EOS);
                buffer.set_flags(flags);
                output.push_buffer(buffer);
                self.src.push_eos();
                return Err(FlowError::Eos);
            }
            Some(mut buffer) => {
                buffer.set_filled_len(0);
                if let Err(error) = output.release_buffer(buffer) {
                    warn!(%error, "Failed to return output buffer");
                }
            }
            None if eos => {
                warn!("Got EOS on surface frame");
                self.src.push_eos();
                return Err(FlowError::Eos);
            }
            None => {}
        }
        result
    }

    fn attach_downstream_memory(&self, buffer: &mut OmxBuffer) {
        let output = self.core.output_port();
        match self.src.allocate(buffer.alloc_len() as usize) {
            Some(memory) => {
                if output.attach(buffer, memory).is_err() {
                    warn!("Output port refused shared memory");
                }
            }
            None => warn!("Could not allocate downstream memory, using initial memory"),
        }
    }

    fn wrap_surface(
        &self,
        buffer: OmxBuffer,
        pts: Option<u64>,
        flags: BufferFlags,
    ) -> std::result::Result<OutputFrame, FlowError> {
        let output = self.core.output_port();
        let Some(surface) = output.surface(&buffer) else {
            error!(?buffer, "Surface buffer without surface");
            if let Err(error) = output.release_buffer(buffer) {
                warn!(%error, "Failed to recycle buffer");
            }
            return Err(FlowError::Error);
        };
        let descriptor = surface.descriptor();
        let (width, height) = (descriptor.w[0], descriptor.h[0]);
        if width <= 0 || height <= 0 {
            error!(width, height, "Invalid surface size");
            if let Err(error) = output.release_buffer(buffer) {
                warn!(%error, "Failed to recycle buffer");
            }
            return Err(FlowError::Eos);
        }
        let (width, height) = (width as u32, height as u32);
        if let Some(negotiated) = self.src.negotiated_size() {
            if negotiated != (width, height) {
                info!(?negotiated, width, height, "Surface size differs from caps");
            }
        }
        let len = surface::flush_buffer_size(width, height);
        let guard = OutputGuard::new(buffer, &self.core, surface, len, self.live.clone());
        Ok(OutputFrame {
            payload: OutputPayload::Surface(guard),
            pts,
            duration: None,
            flags,
            dimensions: Some((width, height)),
        })
    }

    fn push_frame(&self, mut frame: OutputFrame) -> FlowResult {
        match self.hooks.process_output(&self.core, &mut frame) {
            HookResult::Ok => {}
            HookResult::Skip => return Ok(()),
            HookResult::Error => return Err(FlowError::Error),
        }
        frame.duration = self.frame_duration();

        let index = self.core.next_log_index(PortDirection::Output);
        match index {
            Some(index) => warn!(index, ?frame, "OUT_BUF"),
            None => trace!(?frame, "OUT_BUF"),
        }

        if let Some(pts) = frame.pts {
            let previous = self.previous_ts.load(Ordering::Relaxed);
            if self.settings.hls_streaming && pts < previous {
                warn!(pts, previous, "Dropping frame with earlier timestamp");
                return Ok(());
            }
            self.previous_ts.store(pts, Ordering::Relaxed);
        }

        self.produced_output.store(true, Ordering::Relaxed);
        let result = self.src.push(frame);
        match index {
            Some(index) => warn!(index, ?result, "Pushed"),
            None => trace!(?result, "Pushed"),
        }
        result
    }

    fn send_flush_buffer_and_wait(&self) {
        let capabilities = self.core.settings().capabilities;
        if capabilities.skip_first_flush_buffer && !self.produced_output.load(Ordering::Relaxed) {
            warn!("No output produced yet, waiting for settings change without flush buffer");
        } else if let Some((width, height)) = self.src.negotiated_size() {
            let descriptor = surface::flush_descriptor(width, height);
            let mut data = vec![0u8; surface::flush_buffer_size(width, height)];
            let bytes = surface::descriptor_bytes(&descriptor);
            let n = bytes.len().min(data.len());
            data[..n].copy_from_slice(&bytes[..n]);
            warn!(width, height, "Pushing flush buffer");
            let result = self.src.push_flush_buffer(data);
            warn!(?result, "Flush buffer pushed");
        } else {
            error!("No negotiated size for flush buffer");
        }

        let timeout = self.core.settings().timeouts.reconfiguration;
        let started = Instant::now();
        if self.core.reconfiguration().wait_done(timeout) {
            warn!(elapsed = ?started.elapsed(), "Settings change done");
        } else {
            error!(?timeout, "Settings change wait timed out, going on");
        }
    }

    /// Handles an EOS event. Returns true when EOS was handed to the component, in
    /// which case the output task forwards it; false means the caller forwards the
    /// event itself.
    pub fn handle_eos(&self) -> bool {
        self.core.reset_log_counts();
        if !(self.is_ready() && self.last_push().is_ok()) {
            return false;
        }
        if !self.core.settings().capabilities.eos_buffer {
            return false;
        }
        let input = self.core.input_port();
        let Some(mut buffer) = input.request_buffer() else {
            warn!("No input buffer for EOS");
            return false;
        };

        buffer.set_filled_len(0);
        if self.settings.adapter_size > 0 && self.hooks.codec_type() == CodecType::AudioDecoder {
            let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
            let available = adapter.available();
            if available > 0 && available < self.settings.adapter_size {
                buffer.set_timestamp(to_ticks(adapter.prev_timestamp()));
                let leftover = adapter.take(available);
                copy_into(&mut buffer, &leftover);
            }
            adapter.clear();
        }
        let mut flags = buffer.flags();
        flags.insert(BufferFlags::EOS);
        buffer.set_flags(flags);
        warn!(size = buffer.filled_len(), "Sending EOS buffer");
        if let Err(error) = input.release_buffer(buffer) {
            warn!(%error, "Failed to send EOS buffer");
            return false;
        }
        true
    }

    /// Handles a flush-start event, after it was forwarded downstream.
    pub fn flush_start(&self) {
        self.core.reset_log_counts();
        self.set_last_push(Err(FlowError::Flushing));
        self.core.flush_start();
        self.src.pause_task();
        warn!("Flush started");
    }

    /// Handles a flush-stop event, after it was forwarded downstream.
    pub fn flush_stop(&self) {
        self.set_last_push(Ok(()));
        self.previous_ts.store(0, Ordering::Relaxed);
        self.core.flush_stop();
        self.adapter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if self.is_ready() && !self.src.start_task() {
            error!("Failed to restart output task");
        }
        warn!("Flush stopped");
    }

    /// Whether flush events can be handled in the component's current state.
    pub fn accepts_flush(&self) -> bool {
        self.core.state().is_streaming()
    }
}

/// Copies `src` into the payload of `buffer` after its offset. Returns the number of
/// bytes copied, which is also the new filled length.
fn copy_into(buffer: &mut OmxBuffer, src: &[u8]) -> usize {
    let offset = buffer.offset() as usize;
    let dst = buffer.data_mut().get_mut(offset..).unwrap_or_default();
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    buffer.set_filled_len(n as u32);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_conversion() {
        assert_eq!(to_ticks(Some(1_500_000)), 1_500);
        assert_eq!(to_ticks(None), i64::MAX);
        assert_eq!(to_ticks(Some(u64::MAX)), (u64::MAX / 1_000) as i64);
        assert_eq!(from_ticks(1_500), Some(1_500_000));
        assert_eq!(from_ticks(i64::MAX), None);
        assert_eq!(from_ticks(-1), None);
    }

    #[test]
    fn interpolation_spreads_duration_over_bytes() {
        assert_eq!(interpolate(Some(1_000), 0, 100, Some(40)), Some(1_000));
        assert_eq!(interpolate(Some(1_000), 50, 100, Some(40)), Some(1_020));
        assert_eq!(interpolate(Some(1_000), 50, 100, None), Some(1_000));
        assert_eq!(interpolate(None, 50, 100, Some(40)), None);
        assert_eq!(interpolate(Some(u64::MAX), 50, 100, Some(u64::MAX)), Some(u64::MAX));
    }

    #[test]
    fn live_buffers_wait() {
        let live = LiveBuffers::default();
        assert!(live.wait_idle(Duration::ZERO));
        live.acquire();
        assert!(!live.wait_idle(Duration::from_millis(10)));
        live.release();
        assert_eq!(live.count(), 0);
        live.release();
        assert_eq!(live.count(), 0);
    }
}
