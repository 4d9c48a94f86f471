//! # Capability Kernel
//!
//! This crate is the kernel core: a capability-based microkernel's
//! scheduling, blocking and IPC machinery, implemented as a hosted,
//! deterministic simulation.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing system behavior without hardware:
//! - Runs under `cargo test`
//! - Deterministic (controlled time, no real concurrency)
//! - Inspectable (all state is accessible)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! This is not a mock: it is a full implementation of the syscall surface
//! that happens to run in-process. Tasks are driven by the host (tests
//! issue syscalls on their behalf); time advances only when the host says
//! so; every wakeup, preemption and capability operation lands in an
//! audit log a test can assert against.
//!
//! ## Structure
//!
//! - [`Kernel`] is the boot-time context owning everything.
//! - Objects live once in the [`registry`](crate::registry); domains
//!   reach them through per-domain [`captable`](crate::captable) slots.
//! - A task that cannot complete a syscall gets exactly one
//!   [`blocker`](crate::blocker); the kernel re-scans every blocked task
//!   on each tick advance and object mutation.

pub mod blocker;
pub mod captable;
pub mod channel;
pub mod dispatch;
pub mod object;
pub mod registry;
pub mod scheduler;
pub mod smp;
pub mod space;
pub mod task;
pub mod wait;

use std::collections::HashMap;

use core_types::{CapHandle, ObjectId, Rights, Signals, TaskId};
use hal::{IrqLine, SimIrqLine, SimTimerDevice, TimerDevice};
use kernel_api::{SysError, Syscall, SyscallPort, SyscallReturn, Ticks};

use blocker::{Blocker, BlockerKind};
use captable::CapTable;
use object::KObject;
use registry::ObjectRegistry;
use scheduler::{Scheduler, SchedulerConfig};
use task::{StartContext, Task, TaskArena};

pub use dispatch::{syscall_name, SyscallAuditLog, SyscallEvent, SyscallOutcome};

/// Kernel configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Slots per domain capability table.
    pub captable_capacity: usize,
    /// Queue depth of newly created channels.
    pub channel_capacity: usize,
    pub scheduler: SchedulerConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            captable_capacity: 64,
            channel_capacity: channel::DEFAULT_CHANNEL_CAPACITY,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// A domain: an isolation boundary owning a capability table and tasks.
pub struct Domain {
    table: CapTable,
    tasks: Vec<TaskId>,
}

impl Domain {
    fn new(captable_capacity: usize) -> Self {
        Self {
            table: CapTable::new(captable_capacity),
            tasks: Vec::new(),
        }
    }

    pub fn table(&self) -> &CapTable {
        &self.table
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }
}

/// The kernel: the process-wide boot context.
pub struct Kernel {
    config: KernelConfig,
    registry: ObjectRegistry,
    domains: HashMap<ObjectId, Domain>,
    tasks: TaskArena,
    scheduler: Scheduler,
    syscall_log: SyscallAuditLog,
    console: Vec<String>,
    timer: SimTimerDevice,
    irq_lines: Vec<SimIrqLine>,
    irq_bindings: HashMap<u32, Vec<ObjectId>>,
    now: Ticks,
}

impl Kernel {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let scheduler = Scheduler::with_config(config.scheduler.clone());
        Self {
            config,
            registry: ObjectRegistry::new(),
            domains: HashMap::new(),
            tasks: TaskArena::new(),
            scheduler,
            syscall_log: SyscallAuditLog::default(),
            console: Vec::new(),
            timer: SimTimerDevice::new(),
            irq_lines: Vec::new(),
            irq_bindings: HashMap::new(),
            now: Ticks::ZERO,
        }
    }

    // Boot-time API. A loader would do this work on hardware; tests do it
    // directly.

    /// Creates a domain outside any syscall. The kernel itself holds the
    /// creation reference, so boot domains live until shutdown.
    pub fn boot_domain(&mut self) -> ObjectId {
        self.new_domain()
    }

    /// Creates a runnable task in `domain` with a fresh address space and
    /// no parent. Tests drive syscalls as this task.
    pub fn boot_task(&mut self, domain: ObjectId) -> TaskId {
        let space = self.registry.insert(KObject::Space(space::AddressSpace::new()));
        let task_id = self.new_task(domain, space, None);
        self.scheduler.enqueue(task_id);
        task_id
    }

    /// Mints a handle for an existing object into a domain's table, as a
    /// loader wiring initial capabilities would.
    pub fn boot_mint(
        &mut self,
        domain: ObjectId,
        object: ObjectId,
        rights: Rights,
    ) -> Result<CapHandle, SysError> {
        if !self.registry.contains(object) {
            return Err(SysError::InvalidHandle);
        }
        let table = self.table_mut(domain)?;
        let handle = table.insert(object, rights)?;
        self.registry.retain(object);
        Ok(handle)
    }

    // Host-driven simulation surface

    /// Advances simulated time, expiring deadlines and latching interrupt
    /// lines.
    pub fn advance_ticks(&mut self, delta: u64) {
        self.timer.advance(delta);
        self.now = Ticks(self.timer.poll_ticks());
        self.scheduler.on_tick_advanced(delta);
        self.poll_irq_lines();
        self.poll_blockers();
    }

    /// Adds a simulated interrupt line the kernel will poll.
    pub fn add_irq_line(&mut self, line: u32) {
        self.irq_lines.push(SimIrqLine::new(line));
    }

    /// Asserts a simulated interrupt line, waking waiters on bound irq
    /// objects.
    pub fn assert_irq(&mut self, line: u32) {
        for device in &mut self.irq_lines {
            if device.line() == line {
                device.assert_line();
            }
        }
        self.poll_irq_lines();
        self.poll_blockers();
    }

    /// Records a task's exit. The exit value becomes claimable through
    /// the wait engine; EXITED is raised on the task object.
    pub fn exit_task(&mut self, task_id: TaskId, value: u64) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.set_exit(value);
            let object = task.object();
            self.registry.set_value(object, value);
            self.registry.assert_signals(object, Signals::EXITED);
        }
        self.scheduler.exit_task(task_id);
        self.poll_blockers();
    }

    /// Takes the stored result of the syscall `task_id` was blocked in.
    pub fn take_wake(&mut self, task_id: TaskId) -> Option<Result<SyscallReturn, SysError>> {
        self.tasks.get_mut(task_id).and_then(|task| task.take_wake())
    }

    // Inspection

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn syscall_log(&self) -> &SyscallAuditLog {
        &self.syscall_log
    }

    pub fn console(&self) -> &[String] {
        &self.console
    }

    pub fn domain(&self, id: ObjectId) -> Option<&Domain> {
        self.domains.get(&id)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn object_count(&self) -> usize {
        self.registry.len()
    }

    /// One line per live object, sorted, for diagnostics.
    pub fn dump_objects(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .registry
            .iter()
            .map(|(id, entry)| {
                format!(
                    "{} refs={} label={} {}",
                    entry.object().kind(),
                    entry.refs(),
                    entry.label().unwrap_or("-"),
                    id,
                )
            })
            .collect();
        lines.sort();
        lines
    }

    // Internal plumbing shared with the dispatcher.

    pub(crate) fn now(&self) -> Ticks {
        self.now
    }

    pub(crate) fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.registry
    }

    pub(crate) fn syscall_log_mut(&mut self) -> &mut SyscallAuditLog {
        &mut self.syscall_log
    }

    pub(crate) fn console_push(&mut self, line: String) {
        self.console.push(line);
    }

    pub(crate) fn channel_capacity(&self) -> usize {
        self.config.channel_capacity
    }

    pub(crate) fn has_task(&self, task_id: TaskId) -> bool {
        self.tasks.contains(task_id)
    }

    pub(crate) fn domain_of(&self, task_id: TaskId) -> Result<ObjectId, SysError> {
        self.tasks
            .get(task_id)
            .map(|task| task.domain())
            .ok_or_else(|| SysError::BadArguments("unknown calling task".into()))
    }

    pub(crate) fn table_mut(&mut self, domain: ObjectId) -> Result<&mut CapTable, SysError> {
        self.domains
            .get_mut(&domain)
            .map(|d| &mut d.table)
            .ok_or(SysError::ObjectClosed)
    }

    /// Mints a handle backed by an object's creation reference. On
    /// failure the reference is dropped, destroying the object.
    pub(crate) fn mint_creation(
        &mut self,
        domain: ObjectId,
        object: ObjectId,
        rights: Rights,
    ) -> Result<CapHandle, SysError> {
        let minted = self
            .table_mut(domain)
            .and_then(|table| table.insert(object, rights));
        match minted {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.release_object(object);
                Err(err)
            }
        }
    }

    pub(crate) fn new_domain(&mut self) -> ObjectId {
        let id = self.registry.insert(KObject::Domain);
        self.domains
            .insert(id, Domain::new(self.config.captable_capacity));
        id
    }

    /// Creates a task in `domain` executing in `space`. Takes a reference
    /// on the space for the task's lifetime.
    pub(crate) fn new_task(
        &mut self,
        domain: ObjectId,
        space: ObjectId,
        parent: Option<TaskId>,
    ) -> TaskId {
        let task_id = TaskId::new();
        let object = self.registry.insert(KObject::Task(task_id));
        self.registry.retain(space);
        self.tasks
            .insert(Task::new(task_id, object, domain, space, parent));
        if let Some(domain) = self.domains.get_mut(&domain) {
            domain.tasks.push(task_id);
        }
        if let Some(parent) = parent {
            if let Some(parent) = self.tasks.get_mut(parent) {
                parent.add_child(task_id);
            }
        }
        task_id
    }

    pub(crate) fn task_object(&self, task_id: TaskId) -> Option<ObjectId> {
        self.tasks.get(task_id).map(|task| task.object())
    }

    pub(crate) fn start_task(
        &mut self,
        task_id: TaskId,
        context: StartContext,
    ) -> Result<(), SysError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or(SysError::ObjectClosed)?;
        if task.is_started() {
            return Err(SysError::BadArguments("task already started".into()));
        }
        task.set_start_context(context);
        self.scheduler.enqueue(task_id);
        Ok(())
    }

    pub(crate) fn claim_exit(&mut self, task_id: TaskId) -> bool {
        self.tasks
            .get_mut(task_id)
            .map(|task| task.claim_exit())
            .unwrap_or(false)
    }

    pub(crate) fn detach_child(&mut self, parent: TaskId, child: TaskId) {
        if let Some(parent) = self.tasks.get_mut(parent) {
            parent.remove_child(child);
        }
        if let Some(child) = self.tasks.get_mut(child) {
            child.clear_parent();
        }
    }

    /// Where a send on `channel` delivers: the peer once paired, the
    /// channel itself while unpaired.
    pub(crate) fn delivery_target(&self, channel: ObjectId) -> Result<ObjectId, SysError> {
        Ok(self.registry.channel(channel)?.peer().unwrap_or(channel))
    }

    /// Recomputes a channel's queue-derived signal bits. CONNECTED and
    /// PEER_CLOSED are sticky and untouched here.
    pub(crate) fn refresh_channel_signals(&mut self, id: ObjectId) {
        let Ok(channel) = self.registry.channel(id) else {
            return;
        };
        let mut bits = Signals::NONE;
        if !channel.is_empty() {
            bits = bits.union(Signals::READABLE);
        }
        if !channel.is_full() {
            bits = bits.union(Signals::WRITABLE);
        }
        if channel.has_pending_connects() {
            bits = bits.union(Signals::ACCEPTABLE);
        }
        let derived = Signals::READABLE
            .union(Signals::WRITABLE)
            .union(Signals::ACCEPTABLE);
        self.registry.deassert_signals(id, derived.difference(bits));
        self.registry.assert_signals(id, bits);
    }

    pub(crate) fn bind_irq(&mut self, line: u32, object: ObjectId) {
        self.irq_bindings.entry(line).or_default().push(object);
    }

    /// Acks the hardware line behind an irq object when the holder
    /// clears its pending bit.
    pub(crate) fn ack_irq_object(&mut self, object: ObjectId) {
        let Ok(irq) = self.registry.irq(object) else {
            return;
        };
        let line = irq.line();
        for device in &mut self.irq_lines {
            if device.line() == line {
                device.ack();
            }
        }
    }

    fn poll_irq_lines(&mut self) {
        let mut pending = Vec::new();
        for device in &self.irq_lines {
            if device.pending() {
                pending.push(device.line());
            }
        }
        for line in pending {
            if let Some(objects) = self.irq_bindings.get(&line) {
                for object in objects.clone() {
                    self.registry.assert_signals(object, Signals::IRQ_PENDING);
                }
            }
        }
    }

    // Blocking machinery

    pub(crate) fn install_blocker(&mut self, task_id: TaskId, blocker: Blocker) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.attach_blocker(blocker);
        }
        self.scheduler.block_task(task_id);
    }

    /// Re-evaluates every blocked task until no more can make progress.
    ///
    /// Runs after every tick advance and after every completed syscall,
    /// so no task stays blocked past the first moment its predicate
    /// holds. Wakeups within one pass happen in blocking order; a wake
    /// effect (an accept completing a handshake, a send filling a queue)
    /// can enable further wakeups, hence the fixpoint loop.
    pub(crate) fn poll_blockers(&mut self) {
        loop {
            let mut progressed = false;
            for task_id in self.scheduler.blocked_tasks() {
                let Some(task) = self.tasks.get(task_id) else {
                    continue;
                };
                let Some(blocker) = task.blocker() else {
                    continue;
                };
                if blocker.can_unblock(&self.registry, self.now) {
                    let Some(mut blocker) =
                        self.tasks.get_mut(task_id).and_then(Task::take_blocker)
                    else {
                        continue;
                    };
                    blocker.mark_unblocked();
                    let result = self.apply_unblock(task_id, blocker.into_kind());
                    if let Some(task) = self.tasks.get_mut(task_id) {
                        task.set_wake(result);
                    }
                    self.scheduler.unblock_task(task_id);
                    progressed = true;
                } else if blocker.is_expired(self.now) {
                    let Some(mut blocker) =
                        self.tasks.get_mut(task_id).and_then(Task::take_blocker)
                    else {
                        continue;
                    };
                    blocker.mark_timed_out();
                    if let Some(task) = self.tasks.get_mut(task_id) {
                        task.set_wake(Err(SysError::Timeout));
                    }
                    self.scheduler.timeout_task(task_id);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Runs a woken blocker's effect. The blocker was already resolved;
    /// this is the one place its consequence happens.
    fn apply_unblock(
        &mut self,
        task_id: TaskId,
        kind: BlockerKind,
    ) -> Result<SyscallReturn, SysError> {
        match kind {
            BlockerKind::Accept { listener } => self.commit_accept(task_id, listener),
            BlockerKind::Connect { .. } => Ok(SyscallReturn::None),
            BlockerKind::Read { channel } => {
                let closed = self.registry.channel(channel)?.is_empty()
                    && self.registry.signals(channel).contains(Signals::PEER_CLOSED);
                if closed {
                    return Err(SysError::ObjectClosed);
                }
                self.commit_recv(task_id, channel)
            }
            BlockerKind::Write { channel, message } => {
                if self.registry.signals(channel).contains(Signals::PEER_CLOSED) {
                    return Err(SysError::ObjectClosed);
                }
                self.commit_send(task_id, channel, message)
            }
            BlockerKind::Select { watches } => wait::first_ready(&watches, &self.registry)
                .map(|event| SyscallReturn::Word(event.index as u64))
                .ok_or(SysError::Timeout),
            BlockerKind::Timer { .. } => Ok(SyscallReturn::Events(Vec::new())),
            BlockerKind::WaitChild { task } => self.commit_wait_child(task_id, task),
            BlockerKind::Conditions { watches } => Ok(SyscallReturn::Events(wait::ready_events(
                &watches,
                &self.registry,
            ))),
        }
    }

    /// Resolves every blocker waiting on `object` with ObjectClosed.
    /// Teardown never leaves a silent hang.
    fn cancel_blockers_referencing(&mut self, object: ObjectId) {
        for task_id in self.scheduler.blocked_tasks() {
            let references = self
                .tasks
                .get(task_id)
                .and_then(Task::blocker)
                .map(|blocker| blocker.references(object))
                .unwrap_or(false);
            if !references {
                continue;
            }
            if let Some(mut blocker) = self.tasks.get_mut(task_id).and_then(Task::take_blocker) {
                blocker.mark_unblocked();
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.set_wake(Err(SysError::ObjectClosed));
                }
                self.scheduler.unblock_task(task_id);
            }
        }
    }

    // Teardown

    /// Drops one reference to `object`, running teardown when the count
    /// reaches zero. Teardown releases the references the object held,
    /// so destruction cascades through a worklist rather than recursion.
    pub(crate) fn release_object(&mut self, object: ObjectId) {
        let mut worklist = vec![object];
        while let Some(id) = worklist.pop() {
            let Some(removed) = self.registry.release(id) else {
                continue;
            };
            self.cancel_blockers_referencing(id);
            self.teardown(id, removed, &mut worklist);
        }
        self.poll_blockers();
    }

    fn teardown(&mut self, id: ObjectId, object: KObject, worklist: &mut Vec<ObjectId>) {
        match object {
            KObject::Channel(mut channel) => {
                let (messages, _offers) = channel.drain();
                for message in messages {
                    for (object, _) in message.caps {
                        worklist.push(object);
                    }
                }
                if let Some(peer) = channel.peer() {
                    if self.registry.contains(peer) {
                        if let Ok(peer_channel) = self.registry.channel_mut(peer) {
                            peer_channel.clear_peer();
                        }
                        self.registry.assert_signals(peer, Signals::PEER_CLOSED);
                    }
                }
            }
            KObject::Domain => {
                if let Some(mut domain) = self.domains.remove(&id) {
                    for entry in domain.table.drain() {
                        worklist.push(entry.object);
                    }
                    for task_id in domain.tasks {
                        self.kill_task(task_id, worklist);
                    }
                }
            }
            KObject::Task(task_id) => {
                self.kill_task(task_id, worklist);
            }
            KObject::Space(space) => {
                for mapping in space.mappings() {
                    worklist.push(mapping.vmo);
                }
            }
            KObject::Irq(irq) => {
                if let Some(bound) = self.irq_bindings.get_mut(&irq.line()) {
                    bound.retain(|object| *object != id);
                }
            }
            KObject::Vmo(_) | KObject::IoRange(_) => {}
        }
    }

    /// Removes a task outright: domain teardown or destruction of its
    /// task object. The task's space reference is released; its children
    /// are orphaned, not killed.
    fn kill_task(&mut self, task_id: TaskId, worklist: &mut Vec<ObjectId>) {
        self.scheduler.cancel_task(task_id);
        let Some(task) = self.tasks.remove(task_id) else {
            return;
        };
        worklist.push(task.space());
        if let Some(parent) = task.parent() {
            if let Some(parent) = self.tasks.get_mut(parent) {
                parent.remove_child(task_id);
            }
        }
        for child in task.children() {
            if let Some(child) = self.tasks.get_mut(*child) {
                child.clear_parent();
            }
        }
        if let Some(domain) = self.domains.get_mut(&task.domain()) {
            domain.tasks.retain(|id| *id != task_id);
        }
        // Holders of the task object see it as terminated.
        if self.registry.contains(task.object()) {
            self.registry.assert_signals(task.object(), Signals::EXITED);
        }
    }

    pub(crate) fn destroy_task(&mut self, task_id: TaskId) {
        let object = self.task_object(task_id);
        let mut worklist = Vec::new();
        self.kill_task(task_id, &mut worklist);
        if let Some(object) = object {
            worklist.push(object);
        }
        for id in worklist {
            self.release_object(id);
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-task view of the kernel implementing [`SyscallPort`].
///
/// When a call suspends, the port advances simulated time until the
/// kernel delivers the task's wake result, so straight-line code sees a
/// plain blocking call. A call that can never complete (a NEVER deadline
/// on a quiescent system) deadlocks, exactly as it would on hardware.
pub struct TaskPort<'k> {
    kernel: &'k mut Kernel,
    task: TaskId,
}

impl Kernel {
    /// A [`SyscallPort`] issuing calls on behalf of `task`.
    pub fn port(&mut self, task: TaskId) -> TaskPort<'_> {
        TaskPort { kernel: self, task }
    }
}

impl SyscallPort for TaskPort<'_> {
    fn syscall(&mut self, call: Syscall) -> Result<SyscallReturn, SysError> {
        match self.kernel.syscall(self.task, call) {
            SyscallOutcome::Complete(result) => result,
            SyscallOutcome::Suspended => loop {
                if let Some(result) = self.kernel.take_wake(self.task) {
                    break result;
                }
                self.kernel.advance_ticks(1);
            },
        }
    }
}
