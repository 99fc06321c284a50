// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Scripted component used by the integration tests.
//!
//! The mock behaves like a well-mannered OMX IL component: every notification is
//! delivered from its own thread, state changes to Idle and port enables complete
//! once the buffers are populated, Loaded and port disables once they are freed, and
//! flushes hand back every buffer the "hardware" holds. Input buffers are consumed
//! immediately and, in passthrough mode, copied into the next free output buffer.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, Once, PoisonError, mpsc},
    thread,
    time::{Duration, Instant},
};

use omx::{
    BufferFlags, Component, ComponentCallbacks, ComponentCommand, ComponentEvent,
    ComponentFactory, CropRect, OmxBuffer, PortDefinition, PortDirection, Rejected, Result, State,
};
use omx_sys::{OMX_BUFFERHEADERTYPE, OmxStruct};

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: Once = Once::new();

pub fn init_logging() {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_test_writer()
            .init();
    });
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

pub const INPUT_SIZE: u32 = 1024;
pub const OUTPUT_SIZE: u32 = 4096;
pub const BUFFER_COUNT: u32 = 4;

pub fn input_definition() -> PortDefinition {
    PortDefinition {
        index: 0,
        direction: PortDirection::Input,
        buffer_count_actual: BUFFER_COUNT,
        buffer_count_min: 2,
        buffer_size: INPUT_SIZE,
        enabled: true,
        ..Default::default()
    }
}

pub fn output_definition(width: u32, height: u32, size: u32) -> PortDefinition {
    PortDefinition {
        index: 1,
        direction: PortDirection::Output,
        buffer_count_actual: BUFFER_COUNT,
        buffer_count_min: 2,
        buffer_size: size,
        enabled: true,
        is_video: true,
        frame_width: width,
        frame_height: height,
        stride: width as i32,
        slice_height: height,
        color_format: omx_sys::OMX_COLOR_FormatYUV420SemiPlanar,
        ..Default::default()
    }
}

/// An input buffer as the mock received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub flags: BufferFlags,
}

enum Delivery {
    Event(ComponentEvent),
    EmptyDone(OmxBuffer),
    FillDone(OmxBuffer),
    /// Answered once every earlier delivery has been handled.
    Barrier(mpsc::Sender<()>),
}

enum Pending {
    Idle,
    Loaded,
    PortEnable(u32),
    PortDisable(u32),
}

struct HeaderRecord {
    port: u32,
    /// Payload allocated by the mock itself (`AllocateBuffer`).
    _payload: Option<Box<[u8]>>,
}

struct MockState {
    state: State,
    definitions: [PortDefinition; 2],
    headers: HashMap<usize, HeaderRecord>,
    held: [Vec<OmxBuffer>; 2],
    pending: Vec<Pending>,
    backlog: VecDeque<Consumed>,
    commands: Vec<ComponentCommand>,
    consumed: Vec<Consumed>,
    roles: Vec<String>,
    allocations: usize,
    frees: usize,
    ack_states: bool,
    passthrough: bool,
    fail_state: Option<(State, u32)>,
    fail_sync: bool,
    defer_disable: bool,
    crop: CropRect,
}

pub struct MockShared {
    state: Mutex<MockState>,
    sender: Mutex<Option<mpsc::Sender<Delivery>>>,
}

/// The test's view on the mock component.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, delivery: Delivery) {
        if let Some(sender) = self
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = sender.send(delivery);
        }
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn commands(&self) -> Vec<ComponentCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn consumed(&self) -> Vec<Consumed> {
        self.lock().consumed.clone()
    }

    pub fn roles(&self) -> Vec<String> {
        self.lock().roles.clone()
    }

    pub fn allocations(&self) -> usize {
        self.lock().allocations
    }

    pub fn frees(&self) -> usize {
        self.lock().frees
    }

    /// Number of buffer headers currently allocated on `port`.
    pub fn buffer_count(&self, port: u32) -> usize {
        self.lock()
            .headers
            .values()
            .filter(|record| record.port == port)
            .count()
    }

    /// Number of buffers of `port` the mock holds as the hardware.
    pub fn held(&self, port: u32) -> usize {
        self.lock().held[port as usize].len()
    }

    /// Sizes of the output buffers currently held.
    pub fn held_sizes(&self, port: u32) -> Vec<u32> {
        self.lock().held[port as usize]
            .iter()
            .map(OmxBuffer::alloc_len)
            .collect()
    }

    /// Filled lengths of the buffers currently held.
    pub fn held_filled(&self, port: u32) -> Vec<u32> {
        self.lock().held[port as usize]
            .iter()
            .map(OmxBuffer::filled_len)
            .collect()
    }

    /// Holds back port disable completions until [`MockHandle::complete_deferred`].
    pub fn defer_disable(&self) {
        self.lock().defer_disable = true;
    }

    pub fn complete_deferred(&self) {
        let deliveries = {
            let mut state = self.lock();
            state.defer_disable = false;
            self.check_pending(&mut state)
        };
        self.send_all(deliveries);
    }

    /// Stops acknowledging state changes.
    pub fn set_ack_states(&self, ack: bool) {
        self.lock().ack_states = ack;
    }

    pub fn set_passthrough(&self, passthrough: bool) {
        self.lock().passthrough = passthrough;
    }

    /// Answers the next StateSet to `target` with an error event instead.
    pub fn fail_state(&self, target: State, code: u32) {
        let mut state = self.lock();
        state.fail_state = Some((target, code));
        state.fail_sync = false;
    }

    /// Like [`MockHandle::fail_state`], but `send_command` only returns once the
    /// error has been handled by the core.
    pub fn fail_state_during_command(&self, target: State, code: u32) {
        let mut state = self.lock();
        state.fail_state = Some((target, code));
        state.fail_sync = true;
    }

    /// Blocks until every delivery queued so far has been handled.
    pub fn sync_callbacks(&self) {
        let (sender, receiver) = mpsc::channel();
        self.deliver(Delivery::Barrier(sender));
        let _ = receiver.recv_timeout(Duration::from_secs(2));
    }

    pub fn set_crop(&self, crop: CropRect) {
        self.lock().crop = crop;
    }

    pub fn update_definition(&self, port: u32, update: impl FnOnce(&mut PortDefinition)) {
        update(&mut self.lock().definitions[port as usize]);
    }

    /// Delivers `event` from the mock's thread.
    pub fn emit(&self, event: ComponentEvent) {
        self.deliver(Delivery::Event(event));
    }

    /// Queues all `events` before the mock can react to any of them.
    pub fn emit_all(&self, events: &[ComponentEvent]) {
        let sender = self.shared.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = sender.as_ref() {
            for event in events {
                let _ = sender.send(Delivery::Event(*event));
            }
        }
    }

    /// Fills one held output buffer with `data` and returns it.
    ///
    /// Returns false when the mock holds no output buffer.
    pub fn produce(&self, data: &[u8], timestamp: i64, flags: BufferFlags) -> bool {
        let buffer = {
            let mut state = self.lock();
            let Some(mut buffer) = state.held[1].pop() else {
                return false;
            };
            fill(&mut buffer, data, timestamp, flags);
            buffer
        };
        if flags.contains(BufferFlags::EOS) {
            self.emit(ComponentEvent::BufferFlag {
                port: 1,
                flags: flags.bits(),
            });
        }
        self.deliver(Delivery::FillDone(buffer));
        true
    }

    /// Returns one held output buffer as rendered into its surface, leaving the
    /// descriptor payload untouched.
    pub fn produce_surface(&self, timestamp: i64, flags: BufferFlags) -> bool {
        let buffer = {
            let mut state = self.lock();
            let Some(mut buffer) = state.held[1].pop() else {
                return false;
            };
            buffer.set_offset(0);
            buffer.set_filled_len(buffer.alloc_len());
            buffer.set_timestamp(timestamp);
            buffer.set_flags(flags);
            buffer
        };
        self.deliver(Delivery::FillDone(buffer));
        true
    }

    /// Hands back every buffer the mock holds, as after a flush.
    pub fn return_all(&self, port: u32) {
        let buffers: Vec<OmxBuffer> = std::mem::take(&mut self.lock().held[port as usize]);
        for buffer in buffers {
            self.deliver(done(port, buffer));
        }
    }

    /// Completes pending commands whose condition holds. Called with the lock held.
    fn check_pending(&self, state: &mut MockState) -> Vec<Delivery> {
        let count = |state: &MockState, port: u32| {
            state
                .headers
                .values()
                .filter(|record| record.port == port)
                .count() as u32
        };
        let mut deliveries = Vec::new();
        let mut still = Vec::new();
        for pending in std::mem::take(&mut state.pending) {
            let complete = match pending {
                Pending::Idle => (0..2).all(|port| {
                    !state.definitions[port as usize].enabled
                        || count(state, port) == state.definitions[port as usize].buffer_count_actual
                }),
                Pending::Loaded => state.headers.is_empty(),
                Pending::PortEnable(port) => {
                    count(state, port) == state.definitions[port as usize].buffer_count_actual
                }
                Pending::PortDisable(port) => !state.defer_disable && count(state, port) == 0,
            };
            if !complete {
                still.push(pending);
                continue;
            }
            let command = match pending {
                Pending::Idle => {
                    state.state = State::Idle;
                    ComponentCommand::StateSet(State::Idle)
                }
                Pending::Loaded => {
                    state.state = State::Loaded;
                    ComponentCommand::StateSet(State::Loaded)
                }
                Pending::PortEnable(port) => ComponentCommand::PortEnable(port),
                Pending::PortDisable(port) => ComponentCommand::PortDisable(port),
            };
            deliveries.push(Delivery::Event(ComponentEvent::CommandComplete(command)));
        }
        state.pending = still;
        deliveries
    }

    fn send_all(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.deliver(delivery);
        }
    }
}

fn done(port: u32, buffer: OmxBuffer) -> Delivery {
    if port == 0 {
        Delivery::EmptyDone(buffer)
    } else {
        Delivery::FillDone(buffer)
    }
}

fn disabled(buffer: OmxBuffer) -> Rejected {
    Rejected {
        buffer,
        error: omx::Error::Omx {
            code: omx_sys::OMX_ErrorIncorrectStateOperation,
        },
    }
}

fn fill(buffer: &mut OmxBuffer, data: &[u8], timestamp: i64, flags: BufferFlags) {
    buffer.set_offset(0);
    let dst = buffer.data_mut();
    let n = data.len().min(dst.len());
    dst[..n].copy_from_slice(&data[..n]);
    buffer.set_filled_len(n as u32);
    buffer.set_timestamp(timestamp);
    buffer.set_flags(flags);
}

/// Creates mock components, all sharing one [`MockHandle`].
pub struct MockFactory {
    handle: MockHandle,
}

impl MockFactory {
    pub fn new() -> (Self, MockHandle) {
        Self::with_output(output_definition(320, 240, OUTPUT_SIZE))
    }

    pub fn with_output(output: PortDefinition) -> (Self, MockHandle) {
        let handle = MockHandle {
            shared: Arc::new(MockShared {
                state: Mutex::new(MockState {
                    state: State::Loaded,
                    definitions: [input_definition(), output],
                    headers: HashMap::new(),
                    held: [Vec::new(), Vec::new()],
                    pending: Vec::new(),
                    backlog: VecDeque::new(),
                    commands: Vec::new(),
                    consumed: Vec::new(),
                    roles: Vec::new(),
                    allocations: 0,
                    frees: 0,
                    ack_states: true,
                    passthrough: true,
                    fail_state: None,
                    fail_sync: false,
                    defer_disable: false,
                    crop: CropRect::default(),
                }),
                sender: Mutex::new(None),
            }),
        };
        (
            MockFactory {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl ComponentFactory for MockFactory {
    fn create(&self, callbacks: Arc<dyn ComponentCallbacks>) -> Result<Arc<dyn Component>> {
        let (sender, receiver) = mpsc::channel::<Delivery>();
        thread::Builder::new()
            .name("mock-callbacks".to_string())
            .spawn(move || {
                while let Ok(delivery) = receiver.recv() {
                    match delivery {
                        Delivery::Event(event) => callbacks.event(event),
                        Delivery::EmptyDone(buffer) => callbacks.empty_buffer_done(buffer),
                        Delivery::FillDone(buffer) => callbacks.fill_buffer_done(buffer),
                        Delivery::Barrier(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            })?;
        *self
            .handle
            .shared
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
        {
            let mut state = self.handle.lock();
            state.state = State::Loaded;
        }
        Ok(Arc::new(MockComponent {
            handle: self.handle.clone(),
        }))
    }
}

pub struct MockComponent {
    handle: MockHandle,
}

impl MockComponent {
    fn new_header(
        &self,
        port: u32,
        size: u32,
        data: Option<*mut u8>,
        slot: usize,
    ) -> Result<OmxBuffer> {
        let mut payload = match data {
            Some(_) => None,
            None => Some(vec![0u8; size as usize].into_boxed_slice()),
        };
        let mut header = OMX_BUFFERHEADERTYPE::init();
        header.pBuffer = match (&mut payload, data) {
            (Some(payload), _) => payload.as_mut_ptr(),
            (None, Some(data)) => data,
            (None, None) => std::ptr::null_mut(),
        };
        header.nAllocLen = size;
        header.pAppPrivate = slot as omx_sys::OMX_PTR;
        header.nInputPortIndex = port;
        header.nOutputPortIndex = port;
        let raw = Box::into_raw(Box::new(header));

        let deliveries = {
            let mut state = self.handle.lock();
            state.allocations += 1;
            state.headers.insert(
                raw as usize,
                HeaderRecord {
                    port,
                    _payload: payload,
                },
            );
            self.handle.check_pending(&mut state)
        };
        self.handle.send_all(deliveries);
        // Safety: freshly allocated, the port becomes its only owner.
        Ok(unsafe { OmxBuffer::from_raw(raw) }.expect("non-null header"))
    }
}

impl Component for MockComponent {
    fn name(&self) -> &str {
        "OMX.mock.codec"
    }

    fn send_command(&self, command: ComponentCommand) -> Result<()> {
        let mut deliveries = Vec::new();
        {
            let mut state = self.handle.lock();
            state.commands.push(command);
            match command {
                ComponentCommand::StateSet(target) => {
                    if let Some((failing, code)) = state.fail_state {
                        if failing == target {
                            state.fail_state = None;
                            let sync = std::mem::take(&mut state.fail_sync);
                            deliveries.push(Delivery::Event(ComponentEvent::Error(code)));
                            drop(state);
                            self.handle.send_all(deliveries);
                            if sync {
                                self.handle.sync_callbacks();
                            }
                            return Ok(());
                        }
                    }
                    if !state.ack_states {
                        return Ok(());
                    }
                    match (state.state, target) {
                        (State::Loaded, State::Idle) => state.pending.push(Pending::Idle),
                        (State::Idle, State::Loaded) => state.pending.push(Pending::Loaded),
                        (current, State::Idle) if current.is_streaming() => {
                            for port in 0..2u32 {
                                for buffer in std::mem::take(&mut state.held[port as usize]) {
                                    deliveries.push(done(port, buffer));
                                }
                            }
                            state.backlog.clear();
                            state.state = State::Idle;
                            deliveries.push(Delivery::Event(ComponentEvent::CommandComplete(
                                command,
                            )));
                        }
                        _ => {
                            state.state = target;
                            deliveries.push(Delivery::Event(ComponentEvent::CommandComplete(
                                command,
                            )));
                        }
                    }
                }
                ComponentCommand::Flush(port) => {
                    for buffer in std::mem::take(&mut state.held[port as usize]) {
                        deliveries.push(done(port, buffer));
                    }
                    if port == 0 {
                        state.backlog.clear();
                    }
                    deliveries.push(Delivery::Event(ComponentEvent::CommandComplete(command)));
                }
                ComponentCommand::PortDisable(port) => {
                    state.definitions[port as usize].enabled = false;
                    for buffer in std::mem::take(&mut state.held[port as usize]) {
                        deliveries.push(done(port, buffer));
                    }
                    state.pending.push(Pending::PortDisable(port));
                }
                ComponentCommand::PortEnable(port) => {
                    state.definitions[port as usize].enabled = true;
                    state.pending.push(Pending::PortEnable(port));
                }
            }
            deliveries.extend(self.handle.check_pending(&mut state));
        }
        self.handle.send_all(deliveries);
        Ok(())
    }

    fn port_definition(&self, port: u32) -> Result<PortDefinition> {
        self.handle
            .lock()
            .definitions
            .get(port as usize)
            .cloned()
            .ok_or(omx::Error::Omx {
                code: omx_sys::OMX_ErrorBadPortIndex,
            })
    }

    fn set_port_definition(&self, definition: &PortDefinition) -> Result<()> {
        let mut state = self.handle.lock();
        let current = &mut state.definitions[definition.index as usize];
        current.buffer_count_actual = definition.buffer_count_actual;
        current.buffer_size = definition.buffer_size;
        Ok(())
    }

    fn set_role(&self, role: &str) -> Result<()> {
        self.handle.lock().roles.push(role.to_string());
        Ok(())
    }

    fn output_crop(&self, _port: u32) -> Result<CropRect> {
        Ok(self.handle.lock().crop)
    }

    fn allocate_buffer(&self, port: u32, size: u32, slot: usize) -> Result<OmxBuffer> {
        self.new_header(port, size, None, slot)
    }

    unsafe fn use_buffer(
        &self,
        port: u32,
        size: u32,
        data: *mut u8,
        slot: usize,
    ) -> Result<OmxBuffer> {
        self.new_header(port, size, Some(data), slot)
    }

    fn free_buffer(&self, _port: u32, buffer: OmxBuffer) -> Result<()> {
        let raw = buffer.into_raw();
        let deliveries = {
            let mut state = self.handle.lock();
            state.frees += 1;
            state.headers.remove(&(raw as usize));
            for held in &mut state.held {
                held.retain(|buffer| buffer.as_ptr() != raw);
            }
            self.handle.check_pending(&mut state)
        };
        // Safety: allocated by `new_header`, the port handed back its only handle.
        drop(unsafe { Box::from_raw(raw) });
        self.handle.send_all(deliveries);
        Ok(())
    }

    fn empty_this_buffer(&self, buffer: OmxBuffer) -> std::result::Result<(), Rejected> {
        if !self.handle.lock().definitions[0].enabled {
            return Err(disabled(buffer));
        }
        let consumed = Consumed {
            data: buffer.data().to_vec(),
            timestamp: buffer.timestamp(),
            flags: buffer.flags(),
        };
        let mut deliveries = vec![Delivery::EmptyDone(buffer)];
        {
            let mut state = self.handle.lock();
            state.consumed.push(consumed.clone());
            let config = consumed.flags.contains(BufferFlags::CODECCONFIG);
            if state.passthrough && !config {
                match state.held[1].pop() {
                    Some(mut output) => {
                        fill(&mut output, &consumed.data, consumed.timestamp, consumed.flags);
                        if consumed.flags.contains(BufferFlags::EOS) {
                            deliveries.push(Delivery::Event(ComponentEvent::BufferFlag {
                                port: 1,
                                flags: consumed.flags.bits(),
                            }));
                        }
                        deliveries.push(Delivery::FillDone(output));
                    }
                    None => state.backlog.push_back(consumed),
                }
            }
        }
        self.handle.send_all(deliveries);
        Ok(())
    }

    fn fill_this_buffer(&self, mut buffer: OmxBuffer) -> std::result::Result<(), Rejected> {
        let delivery = {
            let mut state = self.handle.lock();
            if !state.definitions[1].enabled {
                return Err(disabled(buffer));
            }
            match state.backlog.pop_front() {
                Some(pending) => {
                    fill(&mut buffer, &pending.data, pending.timestamp, pending.flags);
                    Some(Delivery::FillDone(buffer))
                }
                None => {
                    state.held[1].push(buffer);
                    None
                }
            }
        };
        if let Some(delivery) = delivery {
            self.handle.deliver(delivery);
        }
        Ok(())
    }
}
