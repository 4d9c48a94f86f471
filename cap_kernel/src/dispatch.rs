//! The syscall gate.
//!
//! Every kernel operation a task requests passes through here. The gate
//! resolves handles against the caller's capability table, checks rights,
//! and either completes the call, rejects it, or suspends the caller
//! behind a blocker. All outcomes land in the audit log.

use core_types::{CapHandle, Condition, Message, ObjectKind, Rights, Signals, TaskId};
use kernel_api::{Deadline, SysError, Syscall, SyscallFrame, SyscallReturn, Ticks, FRAME_ARGS};
use serde::{Deserialize, Serialize};

use crate::blocker::{Blocker, BlockerKind};
use crate::captable::CapEntry;
use crate::channel::QueuedMessage;
use crate::object::KObject;
use crate::task::StartContext;
use crate::wait::{self, Watch};
use crate::Kernel;

/// How a syscall left the gate.
#[derive(Debug, PartialEq)]
pub enum SyscallOutcome {
    /// The call finished synchronously with this result.
    Complete(Result<SyscallReturn, SysError>),
    /// The caller was blocked; its result arrives through
    /// [`Kernel::take_wake`] after it unblocks.
    Suspended,
}

/// Syscall audit event (for testing and verification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallEvent {
    /// Syscall was invoked
    Invoked {
        caller: TaskId,
        syscall_name: String,
        timestamp_ticks: u64,
    },
    /// Syscall completed successfully
    Completed {
        caller: TaskId,
        syscall_name: String,
        timestamp_ticks: u64,
    },
    /// Syscall suspended the caller behind a blocker
    Suspended {
        caller: TaskId,
        syscall_name: String,
        timestamp_ticks: u64,
    },
    /// Syscall was rejected
    Rejected {
        caller: TaskId,
        syscall_name: String,
        reason: String,
        timestamp_ticks: u64,
    },
}

/// Audit log for syscall operations.
#[derive(Debug, Default)]
pub struct SyscallAuditLog {
    events: Vec<SyscallEvent>,
}

impl SyscallAuditLog {
    pub fn record(&mut self, event: SyscallEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SyscallEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

/// Stable name of a syscall for audit records.
pub fn syscall_name(call: &Syscall) -> &'static str {
    match call {
        Syscall::DebugLog { .. } => "debug_log",
        Syscall::CreateDomain => "create_domain",
        Syscall::CreateTask { .. } => "create_task",
        Syscall::CreateSpace => "create_space",
        Syscall::CreateVmo { .. } => "create_vmo",
        Syscall::CreateIo { .. } => "create_io",
        Syscall::CreateChannel => "create_channel",
        Syscall::CreateIrq { .. } => "create_irq",
        Syscall::Label { .. } => "label",
        Syscall::Drop { .. } => "drop",
        Syscall::Dup { .. } => "dup",
        Syscall::Start { .. } => "start",
        Syscall::Map { .. } => "map",
        Syscall::Unmap { .. } => "unmap",
        Syscall::In { .. } => "in",
        Syscall::Out { .. } => "out",
        Syscall::Send { .. } => "send",
        Syscall::Recv { .. } => "recv",
        Syscall::Accept { .. } => "accept",
        Syscall::Connect { .. } => "connect",
        Syscall::Signal { .. } => "signal",
        Syscall::Wait { .. } => "wait",
        Syscall::Select { .. } => "select",
    }
}

/// What `perform` decided: finish now, or park the caller.
pub(crate) enum Step {
    Done(SyscallReturn),
    Block(Blocker),
}

impl Kernel {
    /// Executes a syscall on behalf of `caller`.
    ///
    /// This is the only entry point from task code into the kernel. A
    /// blocking call returns [`SyscallOutcome::Suspended`]; the result is
    /// delivered through [`Kernel::take_wake`] once the task unblocks.
    pub fn syscall(&mut self, caller: TaskId, call: Syscall) -> SyscallOutcome {
        let name = syscall_name(&call);
        let timestamp_ticks = self.now().0;
        self.syscall_log_mut().record(SyscallEvent::Invoked {
            caller,
            syscall_name: name.to_string(),
            timestamp_ticks,
        });

        if !self.has_task(caller) {
            let err = SysError::BadArguments("unknown calling task".into());
            self.syscall_log_mut().record(SyscallEvent::Rejected {
                caller,
                syscall_name: name.to_string(),
                reason: err.to_string(),
                timestamp_ticks,
            });
            return SyscallOutcome::Complete(Err(err));
        }

        match self.perform(caller, call) {
            Ok(Step::Done(ret)) => {
                self.syscall_log_mut().record(SyscallEvent::Completed {
                    caller,
                    syscall_name: name.to_string(),
                    timestamp_ticks,
                });
                // A completed call may have satisfied someone's predicate.
                self.poll_blockers();
                SyscallOutcome::Complete(Ok(ret))
            }
            Ok(Step::Block(blocker)) => {
                self.install_blocker(caller, blocker);
                self.syscall_log_mut().record(SyscallEvent::Suspended {
                    caller,
                    syscall_name: name.to_string(),
                    timestamp_ticks,
                });
                // Connect offers (and similar side effects made before
                // blocking) may already have made another task ready.
                self.poll_blockers();
                SyscallOutcome::Suspended
            }
            Err(err) => {
                self.syscall_log_mut().record(SyscallEvent::Rejected {
                    caller,
                    syscall_name: name.to_string(),
                    reason: err.to_string(),
                    timestamp_ticks,
                });
                SyscallOutcome::Complete(Err(err))
            }
        }
    }

    /// Executes a syscall delivered as raw words: one opcode plus six
    /// arguments, as a hardware trap path would marshal them.
    ///
    /// Only scalar calls decode from a frame; a frame naming a
    /// buffer-carrying opcode is rejected before dispatch.
    pub fn syscall_raw(
        &mut self,
        caller: TaskId,
        opcode: u64,
        args: [u64; FRAME_ARGS],
    ) -> SyscallOutcome {
        match SyscallFrame::decode(opcode, args).and_then(Syscall::try_from) {
            Ok(call) => self.syscall(caller, call),
            Err(err) => {
                let timestamp_ticks = self.now().0;
                self.syscall_log_mut().record(SyscallEvent::Rejected {
                    caller,
                    syscall_name: "frame".to_string(),
                    reason: err.to_string(),
                    timestamp_ticks,
                });
                SyscallOutcome::Complete(Err(err))
            }
        }
    }

    fn perform(&mut self, caller: TaskId, call: Syscall) -> Result<Step, SysError> {
        match call {
            Syscall::DebugLog { message } => {
                self.console_push(message);
                Ok(Step::Done(SyscallReturn::None))
            }

            Syscall::CreateDomain => self.sys_create_domain(caller),
            Syscall::CreateTask { domain, space } => self.sys_create_task(caller, domain, space),
            Syscall::CreateSpace => {
                let space = crate::space::AddressSpace::new();
                self.sys_create_object(caller, KObject::Space(space))
            }
            Syscall::CreateVmo { size } => {
                let vmo = crate::object::Vmo::new(size)?;
                self.sys_create_object(caller, KObject::Vmo(vmo))
            }
            Syscall::CreateIo { base, len } => {
                let io = crate::object::IoRange::new(base, len)?;
                self.sys_create_object(caller, KObject::IoRange(io))
            }
            Syscall::CreateChannel => self.sys_create_channel(caller),
            Syscall::CreateIrq { line } => self.sys_create_irq(caller, line),

            Syscall::Label { handle, label } => self.sys_label(caller, handle, label),
            Syscall::Drop { handle } => self.sys_drop(caller, handle),
            Syscall::Dup { handle } => self.sys_dup(caller, handle),
            Syscall::Start { task, ip, sp, args } => self.sys_start(caller, task, ip, sp, args),

            Syscall::Map {
                space,
                vmo,
                virt,
                offset,
                len,
            } => self.sys_map(caller, space, vmo, virt, offset, len),
            Syscall::Unmap { space, virt, len } => self.sys_unmap(caller, space, virt, len),

            Syscall::In { io, offset, width } => {
                let entry = self.resolve(caller, io, Rights::READ)?;
                let value = self.registry().io_range(entry.object)?.read(offset, width)?;
                Ok(Step::Done(SyscallReturn::Word(value)))
            }
            Syscall::Out {
                io,
                offset,
                width,
                value,
            } => {
                let entry = self.resolve(caller, io, Rights::WRITE)?;
                self.registry_mut()
                    .io_range_mut(entry.object)?
                    .write(offset, width, value)?;
                Ok(Step::Done(SyscallReturn::None))
            }

            Syscall::Send {
                channel,
                message,
                deadline,
            } => self.sys_send(caller, channel, message, deadline),
            Syscall::Recv { channel, deadline } => self.sys_recv(caller, channel, deadline),
            Syscall::Accept { listener, deadline } => self.sys_accept(caller, listener, deadline),
            Syscall::Connect {
                listener,
                channel,
                deadline,
            } => self.sys_connect(caller, listener, channel, deadline),

            Syscall::Signal { handle, set, clear } => self.sys_signal(caller, handle, set, clear),
            Syscall::Wait {
                conditions,
                deadline,
            } => self.sys_wait(caller, &conditions, deadline),
            Syscall::Select {
                conditions,
                deadline,
            } => self.sys_select(caller, &conditions, deadline),
        }
    }

    // Object creation

    /// Creates an object and mints a full-rights handle for it into the
    /// caller's table. The creation reference becomes the handle's.
    fn sys_create_object(&mut self, caller: TaskId, object: KObject) -> Result<Step, SysError> {
        let domain = self.domain_of(caller)?;
        let id = self.registry_mut().insert(object);
        let handle = self.mint_creation(domain, id, Rights::all())?;
        Ok(Step::Done(SyscallReturn::Handle(handle)))
    }

    fn sys_create_domain(&mut self, caller: TaskId) -> Result<Step, SysError> {
        let caller_domain = self.domain_of(caller)?;
        let id = self.new_domain();
        let handle = self.mint_creation(caller_domain, id, Rights::all())?;
        Ok(Step::Done(SyscallReturn::Handle(handle)))
    }

    fn sys_create_channel(&mut self, caller: TaskId) -> Result<Step, SysError> {
        let domain = self.domain_of(caller)?;
        let channel = crate::channel::Channel::new(self.channel_capacity());
        let id = self.registry_mut().insert(KObject::Channel(channel));
        self.refresh_channel_signals(id);
        let handle = self.mint_creation(domain, id, Rights::all())?;
        Ok(Step::Done(SyscallReturn::Handle(handle)))
    }

    fn sys_create_irq(&mut self, caller: TaskId, line: u32) -> Result<Step, SysError> {
        let domain = self.domain_of(caller)?;
        let id = self
            .registry_mut()
            .insert(KObject::Irq(crate::object::IrqObject::new(line)));
        self.bind_irq(line, id);
        let handle = self.mint_creation(domain, id, Rights::all())?;
        Ok(Step::Done(SyscallReturn::Handle(handle)))
    }

    fn sys_create_task(
        &mut self,
        caller: TaskId,
        domain: CapHandle,
        space: CapHandle,
    ) -> Result<Step, SysError> {
        let caller_domain = self.domain_of(caller)?;
        let domain_entry = self.resolve(caller, domain, Rights::MANAGE)?;
        self.registry().expect_kind(domain_entry.object, ObjectKind::Domain)?;
        let space_entry = self.resolve(caller, space, Rights::EXECUTE)?;
        self.registry().expect_kind(space_entry.object, ObjectKind::Space)?;

        let task_id = self.new_task(domain_entry.object, space_entry.object, Some(caller));
        let object = self
            .task_object(task_id)
            .ok_or(SysError::InvalidHandle)?;
        let handle = match self.mint_creation(caller_domain, object, Rights::all()) {
            Ok(handle) => handle,
            Err(err) => {
                self.destroy_task(task_id);
                return Err(err);
            }
        };
        Ok(Step::Done(SyscallReturn::Handle(handle)))
    }

    // Handle management

    fn sys_label(
        &mut self,
        caller: TaskId,
        handle: CapHandle,
        label: String,
    ) -> Result<Step, SysError> {
        let entry = self.resolve(caller, handle, Rights::NONE)?;
        self.registry_mut().set_label(entry.object, label);
        Ok(Step::Done(SyscallReturn::None))
    }

    fn sys_drop(&mut self, caller: TaskId, handle: CapHandle) -> Result<Step, SysError> {
        let domain = self.domain_of(caller)?;
        let entry = self.table_mut(domain)?.remove(handle)?;
        self.release_object(entry.object);
        Ok(Step::Done(SyscallReturn::None))
    }

    fn sys_dup(&mut self, caller: TaskId, handle: CapHandle) -> Result<Step, SysError> {
        let domain = self.domain_of(caller)?;
        let entry = self.resolve(caller, handle, Rights::DUPLICATE)?;
        let duplicate = self.table_mut(domain)?.insert(entry.object, entry.rights)?;
        self.registry_mut().retain(entry.object);
        Ok(Step::Done(SyscallReturn::Handle(duplicate)))
    }

    fn sys_start(
        &mut self,
        caller: TaskId,
        task: CapHandle,
        ip: u64,
        sp: u64,
        args: [u64; 3],
    ) -> Result<Step, SysError> {
        let entry = self.resolve(caller, task, Rights::MANAGE)?;
        let task_id = self.registry().task_id(entry.object)?;
        self.start_task(task_id, StartContext { ip, sp, args })?;
        Ok(Step::Done(SyscallReturn::None))
    }

    // Memory

    fn sys_map(
        &mut self,
        caller: TaskId,
        space: CapHandle,
        vmo: CapHandle,
        virt: u64,
        offset: u64,
        len: u64,
    ) -> Result<Step, SysError> {
        let space_entry = self.resolve(caller, space, Rights::WRITE)?;
        let vmo_entry = self.resolve(caller, vmo, Rights::MAP)?;
        let vmo_size = self.registry().vmo(vmo_entry.object)?.size();
        let chosen = self
            .registry_mut()
            .space_mut(space_entry.object)?
            .map(vmo_entry.object, vmo_size, virt, offset, len)?;
        // The mapping holds its own reference to the VMO.
        self.registry_mut().retain(vmo_entry.object);
        Ok(Step::Done(SyscallReturn::VirtAddr(chosen)))
    }

    fn sys_unmap(
        &mut self,
        caller: TaskId,
        space: CapHandle,
        virt: u64,
        len: u64,
    ) -> Result<Step, SysError> {
        let space_entry = self.resolve(caller, space, Rights::WRITE)?;
        let vmo = self
            .registry_mut()
            .space_mut(space_entry.object)?
            .unmap(virt, len)?;
        self.release_object(vmo);
        Ok(Step::Done(SyscallReturn::None))
    }

    // IPC

    fn sys_send(
        &mut self,
        caller: TaskId,
        channel: CapHandle,
        message: Message,
        deadline: Option<Deadline>,
    ) -> Result<Step, SysError> {
        let entry = self.resolve(caller, channel, Rights::WRITE)?;
        let id = entry.object;
        self.registry().channel(id)?;
        self.validate_transfer(caller, &message)?;

        if self.registry().signals(id).contains(Signals::PEER_CLOSED) {
            return Err(SysError::ObjectClosed);
        }
        let target = self.delivery_target(id)?;
        if self.registry().channel(target)?.is_full() {
            return match deadline {
                None => Err(SysError::WouldBlock),
                Some(deadline) => Ok(Step::Block(Blocker::new(
                    BlockerKind::Write { channel: id, message },
                    deadline,
                ))),
            };
        }
        let ret = self.commit_send(caller, id, message)?;
        Ok(Step::Done(ret))
    }

    fn sys_recv(
        &mut self,
        caller: TaskId,
        channel: CapHandle,
        deadline: Option<Deadline>,
    ) -> Result<Step, SysError> {
        let entry = self.resolve(caller, channel, Rights::READ)?;
        let id = entry.object;
        if self.registry().channel(id)?.is_empty() {
            if self.registry().signals(id).contains(Signals::PEER_CLOSED) {
                return Err(SysError::ObjectClosed);
            }
            return match deadline {
                None => Err(SysError::WouldBlock),
                Some(deadline) => Ok(Step::Block(Blocker::new(
                    BlockerKind::Read { channel: id },
                    deadline,
                ))),
            };
        }
        let ret = self.commit_recv(caller, id)?;
        Ok(Step::Done(ret))
    }

    fn sys_accept(
        &mut self,
        caller: TaskId,
        listener: CapHandle,
        deadline: Option<Deadline>,
    ) -> Result<Step, SysError> {
        let entry = self.resolve(caller, listener, Rights::READ)?;
        let id = entry.object;
        if self.registry().channel(id)?.has_pending_connects() {
            let ret = self.commit_accept(caller, id)?;
            return Ok(Step::Done(ret));
        }
        match deadline {
            None => Err(SysError::WouldBlock),
            Some(deadline) => Ok(Step::Block(Blocker::new(
                BlockerKind::Accept { listener: id },
                deadline,
            ))),
        }
    }

    fn sys_connect(
        &mut self,
        caller: TaskId,
        listener: CapHandle,
        channel: CapHandle,
        deadline: Option<Deadline>,
    ) -> Result<Step, SysError> {
        let listener_entry = self.resolve(caller, listener, Rights::WRITE)?;
        let channel_entry = self.resolve(caller, channel, Rights::TRANSFER)?;
        let listener_id = listener_entry.object;
        let channel_id = channel_entry.object;
        self.registry().channel(listener_id)?;
        if listener_id == channel_id {
            return Err(SysError::BadArguments("cannot connect a listener to itself".into()));
        }
        let offered = self.registry().channel(channel_id)?;
        if offered.peer().is_some()
            || self.registry().signals(channel_id).contains(Signals::CONNECTED)
        {
            return Err(SysError::BadArguments("channel is already connected".into()));
        }

        self.registry_mut()
            .channel_mut(listener_id)?
            .offer_connect(channel_id);
        self.refresh_channel_signals(listener_id);

        match deadline {
            // Fire-and-forget offer; the caller can wait on CONNECTED later.
            None => Ok(Step::Done(SyscallReturn::None)),
            Some(deadline) => Ok(Step::Block(Blocker::new(
                BlockerKind::Connect {
                    listener: listener_id,
                    channel: channel_id,
                },
                deadline,
            ))),
        }
    }

    // Signals and waiting

    fn sys_signal(
        &mut self,
        caller: TaskId,
        handle: CapHandle,
        set: Signals,
        clear: Signals,
    ) -> Result<Step, SysError> {
        let entry = self.resolve(caller, handle, Rights::SIGNAL)?;
        let id = entry.object;

        let mut allowed = Signals::from_bits(0xFF << 24);
        if self.registry().kind(id) == Some(ObjectKind::Irq) {
            allowed = allowed.union(Signals::IRQ_PENDING);
        }
        let requested = set.union(clear);
        if !allowed.contains(requested) {
            return Err(SysError::BadArguments(
                "only user signals (and IRQ_PENDING on irq objects) may be signalled".into(),
            ));
        }

        self.registry_mut().assert_signals(id, set);
        self.registry_mut().deassert_signals(id, clear);
        if clear.contains(Signals::IRQ_PENDING) {
            self.ack_irq_object(id);
        }
        Ok(Step::Done(SyscallReturn::None))
    }

    fn sys_wait(
        &mut self,
        caller: TaskId,
        conditions: &[Condition],
        deadline: Deadline,
    ) -> Result<Step, SysError> {
        if conditions.is_empty() {
            if deadline == Deadline::NEVER {
                return Err(SysError::BadArguments(
                    "wait with no conditions and no deadline would never return".into(),
                ));
            }
            if deadline.is_expired(self.now()) {
                return Ok(Step::Done(SyscallReturn::Events(Vec::new())));
            }
            return Ok(Step::Block(Blocker::new(
                BlockerKind::Timer {
                    wake: Ticks(deadline.to_word()),
                },
                Deadline::NEVER,
            )));
        }

        let watches = self.resolve_conditions(caller, conditions)?;

        // A lone wait on a task's exit is the child-wait path: waking
        // claims the exit value.
        let child_wait = watches.len() == 1
            && self.registry().kind(watches[0].0) == Some(ObjectKind::Task)
            && watches[0].1.contains(Signals::EXITED);

        if child_wait {
            let task_object = watches[0].0;
            if self.registry().signals(task_object).contains(Signals::EXITED) {
                let ret = self.commit_wait_child(caller, task_object)?;
                return Ok(Step::Done(ret));
            }
            if deadline.is_expired(self.now()) {
                return Err(SysError::Timeout);
            }
            return Ok(Step::Block(Blocker::new(
                BlockerKind::WaitChild { task: task_object },
                deadline,
            )));
        }

        let events = wait::ready_events(&watches, self.registry());
        if !events.is_empty() {
            return Ok(Step::Done(SyscallReturn::Events(events)));
        }
        if deadline.is_expired(self.now()) {
            return Err(SysError::Timeout);
        }
        Ok(Step::Block(Blocker::new(
            BlockerKind::Conditions { watches },
            deadline,
        )))
    }

    fn sys_select(
        &mut self,
        caller: TaskId,
        conditions: &[Condition],
        deadline: Deadline,
    ) -> Result<Step, SysError> {
        if conditions.is_empty() {
            return Err(SysError::BadArguments("select needs at least one condition".into()));
        }
        let watches = self.resolve_conditions(caller, conditions)?;
        if let Some(event) = wait::first_ready(&watches, self.registry()) {
            return Ok(Step::Done(SyscallReturn::Word(event.index as u64)));
        }
        if deadline.is_expired(self.now()) {
            return Err(SysError::Timeout);
        }
        Ok(Step::Block(Blocker::new(
            BlockerKind::Select { watches },
            deadline,
        )))
    }

    fn resolve_conditions(
        &mut self,
        caller: TaskId,
        conditions: &[Condition],
    ) -> Result<Vec<Watch>, SysError> {
        let mut watches = Vec::with_capacity(conditions.len());
        for condition in conditions {
            if condition.interest.is_empty() {
                return Err(SysError::BadArguments("condition with empty interest".into()));
            }
            let entry = self.resolve(caller, condition.handle, Rights::WAIT)?;
            watches.push((entry.object, condition.interest));
        }
        Ok(watches)
    }

    // Commit paths. These run either synchronously (predicate already
    // held) or as the wake effect of a blocker, exactly once per call.

    pub(crate) fn commit_send(
        &mut self,
        caller: TaskId,
        channel: core_types::ObjectId,
        message: Message,
    ) -> Result<SyscallReturn, SysError> {
        let target = self.delivery_target(channel)?;
        if self.registry().channel(target)?.is_full() {
            return Err(SysError::WouldBlock);
        }
        let caps = self.take_transfer(caller, &message)?;
        let (data, _) = message.into_parts();
        let queued = QueuedMessage { data, caps };
        if let Err(queued) = self.registry_mut().channel_mut(target)?.push(queued) {
            self.restore_transfer(caller, queued.caps);
            return Err(SysError::ResourceExhausted("channel full".into()));
        }
        self.refresh_channel_signals(target);
        Ok(SyscallReturn::None)
    }

    pub(crate) fn commit_recv(
        &mut self,
        caller: TaskId,
        channel: core_types::ObjectId,
    ) -> Result<SyscallReturn, SysError> {
        let domain = self.domain_of(caller)?;
        let queued = match self.registry_mut().channel_mut(channel)?.pop() {
            Some(queued) => queued,
            None => return Err(SysError::WouldBlock),
        };

        // All attached capabilities land or none do.
        if self.table_mut(domain)?.free_slots() < queued.caps.len() {
            self.registry_mut().channel_mut(channel)?.push_front(queued);
            return Err(SysError::ResourceExhausted(
                "no room in capability table for attached handles".into(),
            ));
        }
        let mut handles = Vec::with_capacity(queued.caps.len());
        for (object, rights) in queued.caps {
            handles.push(self.table_mut(domain)?.insert(object, rights)?);
        }
        let message = Message::new(queued.data, handles)
            .map_err(|err| SysError::BadArguments(err.to_string()))?;
        self.refresh_channel_signals(channel);
        Ok(SyscallReturn::Message(message))
    }

    pub(crate) fn commit_accept(
        &mut self,
        caller: TaskId,
        listener: core_types::ObjectId,
    ) -> Result<SyscallReturn, SysError> {
        let domain = self.domain_of(caller)?;

        // Offers whose channel has since been destroyed are skipped.
        let offered = loop {
            let candidate = self.registry_mut().channel_mut(listener)?.take_connect();
            match candidate {
                Some(channel) => {
                    if self.registry().contains(channel) {
                        break channel;
                    }
                }
                None => {
                    self.refresh_channel_signals(listener);
                    return Err(SysError::WouldBlock);
                }
            }
        };

        let capacity = self.channel_capacity();
        let peer = self
            .registry_mut()
            .insert(KObject::Channel(crate::channel::Channel::new(capacity)));
        self.registry_mut().channel_mut(offered)?.set_peer(peer);
        self.registry_mut().channel_mut(peer)?.set_peer(offered);
        self.registry_mut().assert_signals(offered, Signals::CONNECTED);
        self.refresh_channel_signals(offered);
        self.refresh_channel_signals(peer);
        self.refresh_channel_signals(listener);

        match self.mint_creation(domain, peer, Rights::all()) {
            Ok(handle) => Ok(SyscallReturn::Handle(handle)),
            Err(err) => {
                // Unwind the pairing; the offer is consumed either way.
                if let Ok(channel) = self.registry_mut().channel_mut(offered) {
                    channel.clear_peer();
                }
                self.registry_mut()
                    .deassert_signals(offered, Signals::CONNECTED);
                Err(err)
            }
        }
    }

    pub(crate) fn commit_wait_child(
        &mut self,
        caller: TaskId,
        task_object: core_types::ObjectId,
    ) -> Result<SyscallReturn, SysError> {
        let exited = self.registry().task_id(task_object)?;
        let observed = self.registry().signals(task_object);
        let value = self
            .registry()
            .get(task_object)
            .map(|entry| entry.value())
            .unwrap_or(0);

        // First claim reaps the child from the waiter's child list; the
        // exit value itself stays readable for later waiters.
        if self.claim_exit(exited) {
            self.detach_child(caller, exited);
        }
        Ok(SyscallReturn::Events(vec![core_types::WaitEvent::new(
            0, observed, value,
        )]))
    }

    // Capability transfer bookkeeping

    /// Checks a message's attached handles without consuming them: each
    /// must resolve with the transfer right and appear only once.
    fn validate_transfer(&mut self, caller: TaskId, message: &Message) -> Result<(), SysError> {
        for (position, handle) in message.caps().iter().enumerate() {
            if message.caps()[..position].contains(handle) {
                return Err(SysError::BadArguments(
                    "duplicate handle in transfer list".into(),
                ));
            }
            self.resolve(caller, *handle, Rights::TRANSFER)?;
        }
        Ok(())
    }

    /// Consumes a message's attached handles from the caller's table,
    /// returning the (object, rights) pairs whose references now belong
    /// to the queued message. All handles move or none do.
    fn take_transfer(
        &mut self,
        caller: TaskId,
        message: &Message,
    ) -> Result<Vec<(core_types::ObjectId, Rights)>, SysError> {
        self.validate_transfer(caller, message)?;
        let domain = self.domain_of(caller)?;
        let mut caps = Vec::with_capacity(message.caps().len());
        for handle in message.caps() {
            let entry = self.table_mut(domain)?.remove(*handle)?;
            caps.push((entry.object, entry.rights));
        }
        Ok(caps)
    }

    /// Puts consumed handles back after a failed enqueue. The slots were
    /// just freed, so reinsertion cannot hit the capacity limit.
    fn restore_transfer(&mut self, caller: TaskId, caps: Vec<(core_types::ObjectId, Rights)>) {
        if let Ok(domain) = self.domain_of(caller) {
            for (object, rights) in caps {
                if let Ok(table) = self.table_mut(domain) {
                    let _ = table.insert(object, rights);
                }
            }
        }
    }

    fn resolve(
        &mut self,
        caller: TaskId,
        handle: CapHandle,
        required: Rights,
    ) -> Result<CapEntry, SysError> {
        let domain = self.domain_of(caller)?;
        self.table_mut(domain)?.resolve_with(handle, required)
    }
}
