// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The state machine around one component.
//!
//! A [`Core`] owns the component handle, its two ports, the command worker and the
//! resolution change session. State transitions always go through "send StateSet,
//! then wait for the acknowledgment": the stored state is only written by the
//! completion handler, and waiters are woken through a condition variable.
//!
//! Component callbacks only update state, push buffers into port queues, queue
//! commands for the worker and notify waiters. They never block on the component.

use std::{
    fmt,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Instant,
};

use tracing::{debug, error, info, trace, warn};

use crate::{
    Error, Result,
    buffer::{BufferFlags, OmxBuffer},
    command::{Command, CommandQueue},
    component::{
        ComponentCallbacks, ComponentCommand, ComponentEvent, ComponentFactory, ComponentSlot,
        CropRect, PortDefinition, PortDirection, State,
    },
    config::{CoreSettings, MAX_DEBUG_FRAME_CNT},
    error::error_description,
    port::Port,
    queue::Semaphore,
    reconfig::{ReconfState, Reconfiguration, SettingsChange},
};

/// Index of the input port.
pub const INPUT_PORT: u32 = 0;
/// Index of the output port.
pub const OUTPUT_PORT: u32 = 1;

/// Invoked from the callback thread when the component reports new output settings.
pub type SettingsChangedCallback = Arc<dyn Fn(&Core) + Send + Sync>;

/// Invoked at most once per session with the error to show to the application.
pub type ElementErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

#[derive(Debug, Default)]
struct StateData {
    state: State,
    error: Option<u32>,
    /// Bumped on every error event, so waiters can tell new errors from stale ones.
    error_seq: u64,
    unrecoverable_count: u32,
    error_posted: bool,
}

pub(crate) struct CoreShared {
    name: String,
    settings: CoreSettings,
    commands: CommandQueue,
    ports: [Arc<Port>; 2],
    component: Arc<ComponentSlot>,
    state: Mutex<StateData>,
    state_cond: Condvar,
    reconfig: Reconfiguration,
    done: Semaphore,
    crop_changed: AtomicBool,
    input_log_count: AtomicU32,
    output_log_count: AtomicU32,
    settings_changed: RwLock<Option<SettingsChangedCallback>>,
    element_error: RwLock<Option<ElementErrorCallback>>,
}

/// Handle on a component and its state machine. Cheap to clone.
#[derive(Clone)]
pub struct Core {
    shared: Arc<CoreShared>,
}

/// Non-owning handle, e.g. for frames that may outlive the element.
#[derive(Clone)]
pub struct WeakCore {
    shared: Weak<CoreShared>,
}

impl WeakCore {
    pub fn upgrade(&self) -> Option<Core> {
        self.shared.upgrade().map(|shared| Core { shared })
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("reconfig", &self.reconfig_state())
            .finish()
    }
}

impl Core {
    /// Creates a core without a component. `name` is only used in logs.
    pub fn new(name: &str, settings: CoreSettings) -> Self {
        let component = Arc::new(ComponentSlot::default());
        let port = |index, direction| {
            Arc::new(Port::new(
                index,
                direction,
                component.clone(),
                settings.capabilities,
                settings.timeouts.port,
            ))
        };
        let ports = [
            port(INPUT_PORT, PortDirection::Input),
            port(OUTPUT_PORT, PortDirection::Output),
        ];
        Core {
            shared: Arc::new(CoreShared {
                name: name.to_string(),
                settings,
                commands: CommandQueue::new(),
                ports,
                component,
                state: Mutex::new(StateData::default()),
                state_cond: Condvar::new(),
                reconfig: Reconfiguration::new(),
                done: Semaphore::new(),
                crop_changed: AtomicBool::new(false),
                input_log_count: AtomicU32::new(0),
                output_log_count: AtomicU32::new(0),
                settings_changed: RwLock::new(None),
                element_error: RwLock::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakCore {
        WeakCore {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, StateData> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> State {
        self.lock_state().state
    }

    /// The last error reported by the component, if any.
    pub fn error(&self) -> Option<u32> {
        self.lock_state().error
    }

    pub fn has_component(&self) -> bool {
        self.shared.component.is_set()
    }

    pub fn component_name(&self) -> Option<String> {
        self.shared
            .component
            .get()
            .ok()
            .map(|component| component.name().to_string())
    }

    pub fn input_port(&self) -> &Arc<Port> {
        &self.shared.ports[0]
    }

    pub fn output_port(&self) -> &Arc<Port> {
        &self.shared.ports[1]
    }

    pub fn port(&self, index: u32) -> Option<&Arc<Port>> {
        self.shared.ports.iter().find(|port| port.index() == index)
    }

    pub fn reconfiguration(&self) -> &Reconfiguration {
        &self.shared.reconfig
    }

    pub fn reconfig_state(&self) -> ReconfState {
        self.shared.reconfig.state()
    }

    pub fn set_settings_changed_callback(&self, callback: SettingsChangedCallback) {
        *self
            .shared
            .settings_changed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn set_element_error_callback(&self, callback: ElementErrorCallback) {
        *self
            .shared
            .element_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Runs the settings-changed callback, as if the component had notified.
    pub fn notify_settings_changed(&self) {
        let callback = self
            .shared
            .settings_changed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(self);
        }
    }

    /// Returns whether the component reported a crop change since the last call.
    pub fn take_crop_changed(&self) -> bool {
        self.shared.crop_changed.swap(false, Ordering::SeqCst)
    }

    /// Queues work for the command worker.
    pub fn push_command(&self, command: Command) {
        self.shared.commands.push(command);
    }

    /// Gets the component handle and enters Loaded.
    ///
    /// # Arguments
    ///
    /// * `factory` - Creates the component bound to this core's callbacks
    /// * `role` - Optional standard component role to set on the new component
    ///
    /// # Errors
    ///
    /// Returns an error if the component cannot be created or the command worker
    /// cannot be started. A failing role is only logged.
    pub fn init(&self, factory: &dyn ComponentFactory, role: Option<&str>) -> Result<()> {
        let callbacks: Arc<dyn ComponentCallbacks> = Arc::new(CallbackHandler {
            core: Arc::downgrade(&self.shared),
        });
        let component = factory.create(callbacks)?;
        if let Some(role) = role {
            if let Err(error) = component.set_role(role) {
                warn!(core = %self.shared.name, role, %error, "Failed to set component role");
            }
        }
        info!(core = %self.shared.name, component = component.name(), "Got component handle");
        self.shared.component.set(component);
        {
            let mut data = self.lock_state();
            *data = StateData {
                state: State::Loaded,
                ..Default::default()
            };
        }
        self.shared.reconfig.reset();

        let weak = Arc::downgrade(&self.shared);
        self.shared.commands.start(&self.shared.name, move |command| {
            if let Some(shared) = weak.upgrade() {
                Core { shared }.run_command(command);
            }
        })
    }

    /// Stops the command worker. Commands still queued are dropped.
    pub fn finish_commands(&self) {
        self.shared.commands.finish();
    }

    /// Stops the command worker and releases the component handle.
    pub fn deinit(&self) {
        self.shared.commands.finish();
        if let Some(component) = self.shared.component.take() {
            info!(core = %self.shared.name, component = component.name(), "Releasing component handle");
            drop(component);
        }
        let mut data = self.lock_state();
        data.state = State::Invalid;
        drop(data);
        self.shared.state_cond.notify_all();
    }

    /// Sends StateSet and returns the error sequence number seen before sending.
    ///
    /// Errors reported from then on, including ones raised inside `send_command`,
    /// abandon the wait in [`Core::wait_for_state_since`].
    fn change_state(&self, target: State) -> Result<u64> {
        let component = self.shared.component.get()?;
        let error_seq = self.lock_state().error_seq;
        info!(core = %self.shared.name, from = %self.state(), to = %target, "Changing state");
        component.send_command(ComponentCommand::StateSet(target))?;
        Ok(error_seq)
    }

    fn tolerates(&self, code: u32) -> bool {
        self.shared.settings.capabilities.tolerate_init_error && code == omx_sys::OMX_ErrorMFCInit
    }

    /// Waits until the component acknowledged `target`.
    ///
    /// # Errors
    ///
    /// - [`Error::Omx`] if the component reports an error (other than a tolerated
    ///   one) while waiting
    /// - [`Error::StateTimeout`] if the state is not reached within the state change
    ///   timeout
    pub fn wait_for_state(&self, target: State) -> Result<()> {
        let error_seq = self.lock_state().error_seq;
        self.wait_for_state_since(target, error_seq)
    }

    /// Like [`Core::wait_for_state`], failing on any error reported after
    /// `error_seq` was read.
    fn wait_for_state_since(&self, target: State, error_seq: u64) -> Result<()> {
        let timeout = self.shared.settings.timeouts.state_change;
        let deadline = Instant::now() + timeout;
        let mut data = self.lock_state();
        if let Some(code) = data.error.filter(|_| data.error_seq == error_seq) {
            if self.tolerates(code) {
                debug!(core = %self.shared.name, "Ignoring init failure while changing state");
            } else {
                warn!(
                    core = %self.shared.name,
                    error = error_description(code),
                    "Component has an error, waiting for state change anyway"
                );
            }
        }
        loop {
            if data.state == target {
                return Ok(());
            }
            if data.error_seq != error_seq {
                if let Some(code) = data.error.filter(|code| !self.tolerates(*code)) {
                    error!(
                        core = %self.shared.name,
                        target = %target,
                        error = error_description(code),
                        "Component error while waiting for state"
                    );
                    return Err(Error::Omx { code });
                }
            }
            let now = Instant::now();
            if now >= deadline {
                error!(
                    core = %self.shared.name,
                    from = %data.state,
                    to = %target,
                    "Timed out switching state"
                );
                return Err(Error::StateTimeout {
                    target,
                    current: data.state,
                    timeout,
                });
            }
            data = self
                .shared
                .state_cond
                .wait_timeout(data, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Loaded → Idle, allocating the buffers of both ports.
    pub fn prepare(&self) -> Result<()> {
        let error_seq = self.change_state(State::Idle)?;
        for port in &self.shared.ports {
            port.allocate_buffers().inspect_err(|error| {
                error!(core = %self.shared.name, port = port.index(), %error, "Buffer allocation failed");
            })?;
        }
        self.wait_for_state_since(State::Idle, error_seq)
    }

    /// Idle → Executing, then hands out the buffers: input buffers to the queue,
    /// output buffers to the hardware.
    pub fn start(&self) -> Result<()> {
        let error_seq = self.change_state(State::Executing)?;
        self.wait_for_state_since(State::Executing, error_seq)?;
        self.reset_log_counts();
        for port in &self.shared.ports {
            port.start_buffers();
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let error_seq = self.change_state(State::Pause)?;
        self.wait_for_state_since(State::Pause, error_seq)
    }

    /// Executing/Pause → Idle. Does nothing in other states.
    pub fn stop(&self) -> Result<()> {
        if !self.state().is_streaming() {
            debug!(core = %self.shared.name, state = %self.state(), "Not streaming, nothing to stop");
            return Ok(());
        }
        let error_seq = self.change_state(State::Idle)?;
        self.wait_for_state_since(State::Idle, error_seq)
    }

    /// Idle/WaitForResources/Invalid → Loaded, freeing every port buffer.
    pub fn unload(&self) -> Result<()> {
        let state = self.state();
        if !matches!(state, State::Idle | State::WaitForResources | State::Invalid) {
            debug!(core = %self.shared.name, %state, "Not unloading");
            return Ok(());
        }
        let error_seq = if state != State::Invalid {
            Some(self.change_state(State::Loaded)?)
        } else {
            None
        };
        for port in &self.shared.ports {
            let disposals = port.free_buffers();
            trace!(core = %self.shared.name, port = port.index(), ?disposals, "Freed port buffers");
        }
        if let Some(error_seq) = error_seq {
            self.wait_for_state_since(State::Loaded, error_seq)?;
        }
        Ok(())
    }

    /// Pauses every port queue, waking blocked requesters.
    pub fn flush_start(&self) {
        for port in &self.shared.ports {
            port.pause();
        }
    }

    /// Flushes every port, then resumes them.
    pub fn flush_stop(&self) {
        for port in &self.shared.ports {
            if let Err(error) = port.flush() {
                warn!(core = %self.shared.name, port = port.index(), %error, "Port flush failed");
            }
        }
        for port in &self.shared.ports {
            port.resume();
        }
        self.reset_log_counts();
    }

    /// Enables a port outside of a resolution change.
    pub fn enable_port(&self, index: u32) -> Result<()> {
        let port = self.port(index).ok_or(Error::PortUninitialized(index))?;
        port.enable(self.state() != State::Loaded)
    }

    /// Disables a port outside of a resolution change.
    pub fn disable_port(&self, index: u32) -> Result<()> {
        let port = self.port(index).ok_or(Error::PortUninitialized(index))?;
        port.disable()
    }

    /// Queries the current definition of a port from the component.
    pub fn port_definition(&self, index: u32) -> Result<PortDefinition> {
        self.shared.component.get()?.port_definition(index)
    }

    /// Queries the output crop rectangle of a port.
    pub fn output_crop(&self, index: u32) -> Result<CropRect> {
        self.shared.component.get()?.output_crop(index)
    }

    /// Requests `count` buffers on a port. Only valid while Loaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `count` is below the component's minimum, and
    /// [`Error::WrongState`] outside Loaded.
    pub fn set_buffer_count(&self, index: u32, count: u32) -> Result<()> {
        let state = self.state();
        if state != State::Loaded {
            return Err(Error::WrongState {
                expected: State::Loaded,
                current: state,
            });
        }
        let component = self.shared.component.get()?;
        let mut definition = component.port_definition(index)?;
        if count < definition.buffer_count_min {
            return Err(Error::Config(format!(
                "port {index} needs at least {} buffers, {count} requested",
                definition.buffer_count_min
            )));
        }
        debug!(core = %self.shared.name, port = index, count, "Setting buffer count");
        definition.buffer_count_actual = count;
        component.set_port_definition(&definition)
    }

    /// Records that the EOS buffer left the component.
    pub fn set_done(&self) {
        self.shared.done.post();
    }

    /// Waits for [`Core::set_done`]. Returns false on timeout.
    pub fn wait_for_done(&self, timeout: std::time::Duration) -> bool {
        self.shared.done.wait_timeout(timeout)
    }

    /// Reports `error` to the application unless an error was already reported.
    ///
    /// Returns whether the error was reported.
    pub fn post_error_once(&self, error: &Error) -> bool {
        {
            let mut data = self.lock_state();
            if data.error_posted {
                debug!(core = %self.shared.name, %error, "Error already posted");
                return false;
            }
            data.error_posted = true;
        }
        self.report_error(error);
        true
    }

    fn report_error(&self, error: &Error) {
        error!(core = %self.shared.name, %error, "Posting error");
        let callback = self
            .shared
            .element_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    pub(crate) fn reset_log_counts(&self) {
        self.shared.input_log_count.store(0, Ordering::Relaxed);
        self.shared.output_log_count.store(0, Ordering::Relaxed);
    }

    /// Index of the next frame to log verbosely, `None` once enough were logged.
    pub(crate) fn next_log_index(&self, direction: PortDirection) -> Option<u32> {
        let counter = match direction {
            PortDirection::Input => &self.shared.input_log_count,
            PortDirection::Output => &self.shared.output_log_count,
        };
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                (count < MAX_DEBUG_FRAME_CNT).then_some(count + 1)
            })
            .ok()
    }

    fn run_command(&self, command: Command) {
        match command {
            Command::PortDisable(index) => {
                let Some(port) = self.port(index).cloned() else {
                    error!(core = %self.shared.name, port = index, "PortDisable for unknown port");
                    return;
                };
                if let Err(error) = self.send(ComponentCommand::PortDisable(index)) {
                    error!(core = %self.shared.name, port = index, %error, "PortDisable failed");
                }
                if port.direction() == PortDirection::Output {
                    let reclaim = self.shared.reconfig.in_session() && !port.is_enabled();
                    for buffer in port.clean() {
                        if reclaim {
                            port.free_one(buffer);
                        } else {
                            port.push_buffer(buffer);
                        }
                    }
                }
            }
            Command::PortEnable(index) => {
                let Some(port) = self.port(index).cloned() else {
                    error!(core = %self.shared.name, port = index, "PortEnable for unknown port");
                    return;
                };
                if let Err(error) = self.send(ComponentCommand::PortEnable(index)) {
                    error!(core = %self.shared.name, port = index, %error, "PortEnable failed");
                }
                if let Err(error) = port.allocate_buffers() {
                    error!(core = %self.shared.name, port = index, %error, "Reallocation failed");
                }
            }
            Command::FreeBuffer(index, buffer) => match self.port(index) {
                Some(port) => {
                    port.free_one(buffer);
                }
                None => error!(core = %self.shared.name, port = index, "FreeBuffer for unknown port"),
            },
            Command::Pause => {
                if let Err(error) = self.pause() {
                    error!(core = %self.shared.name, %error, "Forced pause failed");
                }
            }
        }
    }

    fn send(&self, command: ComponentCommand) -> Result<()> {
        info!(core = %self.shared.name, ?command, "Sending command");
        self.shared.component.get()?.send_command(command)
    }

    fn handle_event(&self, event: ComponentEvent) {
        match event {
            ComponentEvent::CommandComplete(ComponentCommand::StateSet(state)) => {
                info!(core = %self.shared.name, %state, "State change complete");
                self.lock_state().state = state;
                self.shared.state_cond.notify_all();
            }
            ComponentEvent::CommandComplete(ComponentCommand::Flush(index)) => {
                self.flush_complete(index)
            }
            ComponentEvent::CommandComplete(ComponentCommand::PortDisable(index)) => {
                self.port_disable_complete(index)
            }
            ComponentEvent::CommandComplete(ComponentCommand::PortEnable(index)) => {
                self.port_enable_complete(index)
            }
            ComponentEvent::BufferFlag { port, flags } => {
                debug!(core = %self.shared.name, port, flags, "Buffer flag");
                if BufferFlags::from_bits_retain(flags).contains(BufferFlags::EOS) {
                    self.set_done();
                }
            }
            ComponentEvent::PortSettingsChanged { port, index } => {
                warn!(core = %self.shared.name, port, index, state = %self.state(), "Port settings changed");
                if index == 0 || index == omx_sys::OMX_IndexParamPortDefinition {
                    self.port_settings_changed(port);
                } else if index == omx_sys::OMX_IndexConfigCommonOutputCrop {
                    self.shared.crop_changed.store(true, Ordering::SeqCst);
                }
                self.notify_settings_changed();
            }
            ComponentEvent::Error(code) => self.handle_error(code),
            ComponentEvent::Other { event, data1, data2 } => {
                debug!(core = %self.shared.name, event, data1, data2, "Unhandled event");
            }
        }
    }

    fn flush_complete(&self, index: u32) {
        let Some(port) = self.port(index) else {
            warn!(core = %self.shared.name, port = index, "Flush complete for unknown port");
            return;
        };
        info!(core = %self.shared.name, port = index, "Flush complete");
        port.set_enabled(true);
        if port.direction() == PortDirection::Output && self.shared.reconfig.take_pending() {
            info!(core = %self.shared.name, "Resuming pending settings change");
            port.set_flushing(false);
            port.flush_sem.post();
            self.port_settings_changed(index);
            return;
        }
        if port.direction() == PortDirection::Output {
            let buffers = port.clean();
            debug!(core = %self.shared.name, buffers = buffers.len(), "Returning flushed output buffers");
            for buffer in buffers {
                if let Err(error) = port.release_buffer(buffer) {
                    warn!(core = %self.shared.name, %error, "FillThisBuffer after flush failed");
                }
            }
            port.set_flushing(false);
        }
        port.flush_sem.post();
    }

    fn port_disable_complete(&self, index: u32) {
        let Some(port) = self.port(index) else {
            warn!(core = %self.shared.name, port = index, "PortDisable complete for unknown port");
            return;
        };
        info!(core = %self.shared.name, port = index, "PortDisable complete");
        port.set_enabled(false);
        if port.direction() == PortDirection::Output
            && self.shared.reconfig.state() == ReconfState::Start
        {
            self.push_command(Command::PortEnable(index));
        } else {
            port.port_sem.post();
        }
    }

    fn port_enable_complete(&self, index: u32) {
        let Some(port) = self.port(index) else {
            warn!(core = %self.shared.name, port = index, "PortEnable complete for unknown port");
            return;
        };
        info!(core = %self.shared.name, port = index, "PortEnable complete");
        port.set_enabled(true);
        if port.direction() == PortDirection::Output
            && self.shared.reconfig.state() == ReconfState::Start
        {
            if self.state() == State::Executing {
                port.start_buffers();
            } else {
                port.flush_queue();
            }
            port.resume();
            self.shared.reconfig.complete();
            info!(core = %self.shared.name, "Settings change done");
            return;
        }
        port.port_sem.post();
        if port.direction() == PortDirection::Output && self.shared.reconfig.take_pending() {
            info!(core = %self.shared.name, "Resuming pending settings change");
            self.port_settings_changed(index);
        }
    }

    fn port_settings_changed(&self, index: u32) {
        if !self.shared.settings.capabilities.reconfiguration {
            warn!(core = %self.shared.name, "Component does not reconfigure, ignoring settings change");
            return;
        }
        let state = self.state();
        if state != State::Executing {
            warn!(core = %self.shared.name, %state, "Settings change outside Executing, ignoring");
            return;
        }
        let port = self.output_port();
        if port.index() != index {
            warn!(core = %self.shared.name, port = index, "Settings change on input port, ignoring");
            return;
        }
        match self.shared.reconfig.begin(port.is_enabled()) {
            SettingsChange::Ignored => {
                warn!(core = %self.shared.name, "Settings change already in progress");
            }
            SettingsChange::Deferred => {
                info!(core = %self.shared.name, "Output port disabled, settings change pending");
            }
            SettingsChange::Started => {
                info!(core = %self.shared.name, "Starting settings change");
                port.set_enabled(false);
                port.pause();
                self.push_command(Command::PortDisable(index));
            }
        }
    }

    fn handle_error(&self, code: u32) {
        error!(
            core = %self.shared.name,
            error = error_description(code),
            code = format_args!("0x{code:08x}"),
            "Unrecoverable error"
        );
        // The component may leave us waiting for buffers.
        self.flush_start();

        let tolerated = self.tolerates(code);
        let mut report = false;
        let mut force_pause = false;
        {
            let mut data = self.lock_state();
            data.error = Some(code);
            data.error_seq += 1;
            if tolerated {
                warn!(core = %self.shared.name, count = data.unrecoverable_count, "Not waking state waiters on init failure");
                if data.unrecoverable_count == 0 {
                    if data.error_posted {
                        debug!(core = %self.shared.name, "Error already posted");
                    } else {
                        data.error_posted = true;
                        report = true;
                    }
                }
                data.unrecoverable_count += 1;
                if data.unrecoverable_count >= self.shared.settings.retry_limit {
                    data.unrecoverable_count = 0;
                    force_pause = true;
                }
            } else {
                self.shared.state_cond.notify_all();
            }
        }
        if report {
            self.report_error(&Error::Omx { code });
        }
        if force_pause {
            warn!(core = %self.shared.name, "Too many unrecoverable errors, forcing Pause");
            self.push_command(Command::Pause);
        }
    }

    fn empty_buffer_done(&self, buffer: OmxBuffer) {
        trace!(core = %self.shared.name, ?buffer, "EmptyBufferDone");
        self.input_port().buffer_done(buffer);
    }

    fn fill_buffer_done(&self, buffer: OmxBuffer) {
        trace!(core = %self.shared.name, ?buffer, "FillBufferDone");
        let port = self.output_port();
        if self.shared.reconfig.in_session() && !port.is_enabled() && self.state() == State::Executing
        {
            debug!(core = %self.shared.name, "Freeing buffer returned during settings change");
            port.returned_from_hardware();
            self.push_command(Command::FreeBuffer(port.index(), buffer));
            return;
        }
        port.buffer_done(buffer);
    }
}

/// The callbacks registered with the component. Holds the core weakly, so the
/// component does not keep its own core alive.
struct CallbackHandler {
    core: Weak<CoreShared>,
}

impl CallbackHandler {
    fn core(&self) -> Option<Core> {
        self.core.upgrade().map(|shared| Core { shared })
    }
}

impl ComponentCallbacks for CallbackHandler {
    fn event(&self, event: ComponentEvent) {
        match self.core() {
            Some(core) => core.handle_event(event),
            None => warn!(?event, "Event after core was dropped"),
        }
    }

    fn empty_buffer_done(&self, buffer: OmxBuffer) {
        match self.core() {
            Some(core) => core.empty_buffer_done(buffer),
            None => warn!(?buffer, "EmptyBufferDone after core was dropped"),
        }
    }

    fn fill_buffer_done(&self, buffer: OmxBuffer) {
        match self.core() {
            Some(core) => core.fill_buffer_done(buffer),
            None => warn!(?buffer, "FillBufferDone after core was dropped"),
        }
    }
}
