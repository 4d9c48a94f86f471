//! End-to-end channel scenarios: blocking send/recv, the connect/accept
//! handshake, capability transfer, and teardown behavior.

use cap_kernel::{Kernel, SyscallOutcome};
use core_types::{CapHandle, Condition, Message, ObjectId, Rights, Signals, TaskId};
use kernel_api::{Deadline, SysError, Syscall, SyscallReturn};

fn boot() -> (Kernel, ObjectId, TaskId) {
    let mut kernel = Kernel::new();
    let domain = kernel.boot_domain();
    let task = kernel.boot_task(domain);
    (kernel, domain, task)
}

fn expect_handle(outcome: SyscallOutcome) -> CapHandle {
    match outcome {
        SyscallOutcome::Complete(Ok(SyscallReturn::Handle(handle))) => handle,
        other => panic!("expected a handle, got {:?}", other),
    }
}

fn expect_ok(outcome: SyscallOutcome) -> SyscallReturn {
    match outcome {
        SyscallOutcome::Complete(Ok(ret)) => ret,
        other => panic!("expected success, got {:?}", other),
    }
}

fn expect_err(outcome: SyscallOutcome) -> SysError {
    match outcome {
        SyscallOutcome::Complete(Err(err)) => err,
        other => panic!("expected an error, got {:?}", other),
    }
}

fn object_of(kernel: &Kernel, domain: ObjectId, handle: CapHandle) -> ObjectId {
    kernel
        .domain(domain)
        .unwrap()
        .table()
        .entries()
        .into_iter()
        .find(|(h, _)| *h == handle)
        .map(|(_, entry)| entry.object)
        .unwrap()
}

#[test]
fn test_recv_blocks_until_send() {
    let (mut kernel, domain, sender) = boot();
    let receiver = kernel.boot_task(domain);

    let channel = expect_handle(kernel.syscall(sender, Syscall::CreateChannel));

    // Nothing queued: the receiver suspends.
    let outcome = kernel.syscall(
        receiver,
        Syscall::Recv {
            channel,
            deadline: Some(Deadline::NEVER),
        },
    );
    assert_eq!(outcome, SyscallOutcome::Suspended);
    assert!(kernel.take_wake(receiver).is_none());

    // The send completes synchronously and wakes the receiver in the
    // same step.
    expect_ok(kernel.syscall(
        sender,
        Syscall::Send {
            channel,
            message: Message::from_data(vec![7, 8]).unwrap(),
            deadline: None,
        },
    ));

    let woken = kernel.take_wake(receiver).unwrap().unwrap();
    match woken {
        SyscallReturn::Message(message) => assert_eq!(message.data(), &[7, 8]),
        other => panic!("expected a message, got {:?}", other),
    }
}

#[test]
fn test_nonblocking_recv_would_block() {
    let (mut kernel, _domain, task) = boot();
    let channel = expect_handle(kernel.syscall(task, Syscall::CreateChannel));

    let err = expect_err(kernel.syscall(
        task,
        Syscall::Recv {
            channel,
            deadline: None,
        },
    ));
    assert_eq!(err, SysError::WouldBlock);
}

#[test]
fn test_blocked_recv_times_out() {
    let (mut kernel, domain, sender) = boot();
    let receiver = kernel.boot_task(domain);
    let channel = expect_handle(kernel.syscall(sender, Syscall::CreateChannel));

    let deadline = Deadline::after(kernel_api::Ticks(0), 5);
    let outcome = kernel.syscall(
        receiver,
        Syscall::Recv {
            channel,
            deadline: Some(deadline),
        },
    );
    assert_eq!(outcome, SyscallOutcome::Suspended);

    kernel.advance_ticks(4);
    assert!(kernel.take_wake(receiver).is_none());

    kernel.advance_ticks(1);
    assert_eq!(kernel.take_wake(receiver).unwrap(), Err(SysError::Timeout));
    assert!(kernel
        .scheduler()
        .has_event(|e| matches!(e, cap_kernel::scheduler::ScheduleEvent::TaskTimedOut { .. })));
}

#[test]
fn test_send_blocks_on_full_channel_until_drained() {
    let (mut kernel, domain, sender) = boot();
    let receiver = kernel.boot_task(domain);
    let channel = expect_handle(kernel.syscall(sender, Syscall::CreateChannel));

    // Fill the queue.
    for byte in 0..16u8 {
        expect_ok(kernel.syscall(
            sender,
            Syscall::Send {
                channel,
                message: Message::from_data(vec![byte]).unwrap(),
                deadline: None,
            },
        ));
    }
    let err = expect_err(kernel.syscall(
        sender,
        Syscall::Send {
            channel,
            message: Message::from_data(vec![99]).unwrap(),
            deadline: None,
        },
    ));
    assert_eq!(err, SysError::WouldBlock);

    let outcome = kernel.syscall(
        sender,
        Syscall::Send {
            channel,
            message: Message::from_data(vec![99]).unwrap(),
            deadline: Some(Deadline::NEVER),
        },
    );
    assert_eq!(outcome, SyscallOutcome::Suspended);

    // Draining one message frees a slot and completes the parked send.
    expect_ok(kernel.syscall(
        receiver,
        Syscall::Recv {
            channel,
            deadline: None,
        },
    ));
    assert_eq!(
        kernel.take_wake(sender).unwrap(),
        Ok(SyscallReturn::None)
    );
}

#[test]
fn test_connect_accept_handshake() {
    let (mut kernel, domain, server) = boot();
    let client = kernel.boot_task(domain);

    let listener = expect_handle(kernel.syscall(server, Syscall::CreateChannel));
    let client_end = expect_handle(kernel.syscall(client, Syscall::CreateChannel));

    // The client offers its channel and parks until the handshake
    // completes.
    let outcome = kernel.syscall(
        client,
        Syscall::Connect {
            listener,
            channel: client_end,
            deadline: Some(Deadline::NEVER),
        },
    );
    assert_eq!(outcome, SyscallOutcome::Suspended);

    let server_end = expect_handle(kernel.syscall(
        server,
        Syscall::Accept {
            listener,
            deadline: None,
        },
    ));
    assert_eq!(kernel.take_wake(client).unwrap(), Ok(SyscallReturn::None));

    // Once paired, a send on one end lands in the other end's queue.
    expect_ok(kernel.syscall(
        client,
        Syscall::Send {
            channel: client_end,
            message: Message::from_data(b"ping".to_vec()).unwrap(),
            deadline: None,
        },
    ));
    let ret = expect_ok(kernel.syscall(
        server,
        Syscall::Recv {
            channel: server_end,
            deadline: None,
        },
    ));
    match ret {
        SyscallReturn::Message(message) => assert_eq!(message.data(), b"ping"),
        other => panic!("expected a message, got {:?}", other),
    }
}

#[test]
fn test_accept_without_offer_would_block() {
    let (mut kernel, _domain, server) = boot();
    let listener = expect_handle(kernel.syscall(server, Syscall::CreateChannel));
    let err = expect_err(kernel.syscall(
        server,
        Syscall::Accept {
            listener,
            deadline: None,
        },
    ));
    assert_eq!(err, SysError::WouldBlock);
}

#[test]
fn test_peer_close_fails_pending_operations() {
    let (mut kernel, domain, server) = boot();
    let client = kernel.boot_task(domain);

    let listener = expect_handle(kernel.syscall(server, Syscall::CreateChannel));
    let client_end = expect_handle(kernel.syscall(client, Syscall::CreateChannel));
    expect_ok(kernel.syscall(
        client,
        Syscall::Connect {
            listener,
            channel: client_end,
            deadline: None,
        },
    ));
    let server_end = expect_handle(kernel.syscall(
        server,
        Syscall::Accept {
            listener,
            deadline: None,
        },
    ));

    // Server drops its end; the client observes PEER_CLOSED.
    expect_ok(kernel.syscall(server, Syscall::Drop { handle: server_end }));

    let err = expect_err(kernel.syscall(
        client,
        Syscall::Recv {
            channel: client_end,
            deadline: Some(Deadline::NEVER),
        },
    ));
    assert_eq!(err, SysError::ObjectClosed);

    let err = expect_err(kernel.syscall(
        client,
        Syscall::Send {
            channel: client_end,
            message: Message::from_data(vec![1]).unwrap(),
            deadline: None,
        },
    ));
    assert_eq!(err, SysError::ObjectClosed);
}

#[test]
fn test_teardown_wakes_blocked_reader_with_object_closed() {
    let (mut kernel, domain, owner) = boot();
    let reader = kernel.boot_task(domain);
    let channel = expect_handle(kernel.syscall(owner, Syscall::CreateChannel));

    let outcome = kernel.syscall(
        reader,
        Syscall::Recv {
            channel,
            deadline: Some(Deadline::NEVER),
        },
    );
    assert_eq!(outcome, SyscallOutcome::Suspended);

    // The only handle goes away, destroying the channel; the reader must
    // not hang.
    expect_ok(kernel.syscall(owner, Syscall::Drop { handle: channel }));
    assert_eq!(
        kernel.take_wake(reader).unwrap(),
        Err(SysError::ObjectClosed)
    );
}

#[test]
fn test_capability_transfer_moves_handle() {
    let (mut kernel, domain, sender) = boot();
    let other_domain = kernel.boot_domain();
    let receiver = kernel.boot_task(other_domain);

    let channel = expect_handle(kernel.syscall(sender, Syscall::CreateChannel));
    let channel_object = object_of(&kernel, domain, channel);
    let receiver_channel = kernel
        .boot_mint(other_domain, channel_object, Rights::READ.union(Rights::WAIT))
        .unwrap();

    let vmo = expect_handle(kernel.syscall(sender, Syscall::CreateVmo { size: 4096 }));

    expect_ok(kernel.syscall(
        sender,
        Syscall::Send {
            channel,
            message: Message::new(vec![1], vec![vmo]).unwrap(),
            deadline: None,
        },
    ));

    // The sender's handle moved with the message.
    let err = expect_err(kernel.syscall(sender, Syscall::Dup { handle: vmo }));
    assert_eq!(err, SysError::InvalidHandle);

    // The receiver gets a handle valid in its own table.
    let ret = expect_ok(kernel.syscall(
        receiver,
        Syscall::Recv {
            channel: receiver_channel,
            deadline: None,
        },
    ));
    let received = match ret {
        SyscallReturn::Message(message) => message.caps()[0],
        other => panic!("expected a message, got {:?}", other),
    };
    let space = expect_handle(kernel.syscall(receiver, Syscall::CreateSpace));
    let mapped = expect_ok(kernel.syscall(
        receiver,
        Syscall::Map {
            space,
            vmo: received,
            virt: 0,
            offset: 0,
            len: 4096,
        },
    ));
    assert!(matches!(mapped, SyscallReturn::VirtAddr(_)));
}

#[test]
fn test_transfer_with_stale_cap_sends_nothing() {
    let (mut kernel, _domain, sender) = boot();
    let channel = expect_handle(kernel.syscall(sender, Syscall::CreateChannel));
    let vmo = expect_handle(kernel.syscall(sender, Syscall::CreateVmo { size: 4096 }));
    expect_ok(kernel.syscall(sender, Syscall::Drop { handle: vmo }));

    let err = expect_err(kernel.syscall(
        sender,
        Syscall::Send {
            channel,
            message: Message::new(vec![1], vec![vmo]).unwrap(),
            deadline: None,
        },
    ));
    assert_eq!(err, SysError::InvalidHandle);

    // Nothing was enqueued.
    let err = expect_err(kernel.syscall(
        sender,
        Syscall::Recv {
            channel,
            deadline: None,
        },
    ));
    assert_eq!(err, SysError::WouldBlock);
}

#[test]
fn test_transfer_rejects_duplicate_handles() {
    let (mut kernel, _domain, sender) = boot();
    let channel = expect_handle(kernel.syscall(sender, Syscall::CreateChannel));
    let vmo = expect_handle(kernel.syscall(sender, Syscall::CreateVmo { size: 4096 }));

    let err = expect_err(kernel.syscall(
        sender,
        Syscall::Send {
            channel,
            message: Message::new(vec![1], vec![vmo, vmo]).unwrap(),
            deadline: None,
        },
    ));
    assert!(matches!(err, SysError::BadArguments(_)));

    // The handle survived the rejected send.
    expect_handle(kernel.syscall(sender, Syscall::Dup { handle: vmo }));
}

#[test]
fn test_rights_checked_on_send() {
    let (mut kernel, domain, owner) = boot();
    let restricted_domain = kernel.boot_domain();
    let restricted = kernel.boot_task(restricted_domain);

    let channel = expect_handle(kernel.syscall(owner, Syscall::CreateChannel));
    let channel_object = object_of(&kernel, domain, channel);
    let read_only = kernel
        .boot_mint(restricted_domain, channel_object, Rights::READ)
        .unwrap();

    let err = expect_err(kernel.syscall(
        restricted,
        Syscall::Send {
            channel: read_only,
            message: Message::from_data(vec![1]).unwrap(),
            deadline: None,
        },
    ));
    assert_eq!(err, SysError::PermissionDenied);
}

#[test]
fn test_channel_signals_track_queue() {
    let (mut kernel, _domain, task) = boot();
    let channel = expect_handle(kernel.syscall(task, Syscall::CreateChannel));

    // Fresh channel: writable, not readable.
    let ret = expect_ok(kernel.syscall(
        task,
        Syscall::Wait {
            conditions: vec![Condition::new(channel, Signals::WRITABLE)],
            deadline: Deadline::NEVER,
        },
    ));
    match ret {
        SyscallReturn::Events(events) => {
            assert_eq!(events.len(), 1);
            assert!(events[0].observed.contains(Signals::WRITABLE));
            assert!(!events[0].observed.contains(Signals::READABLE));
        }
        other => panic!("expected events, got {:?}", other),
    }

    expect_ok(kernel.syscall(
        task,
        Syscall::Send {
            channel,
            message: Message::from_data(vec![1]).unwrap(),
            deadline: None,
        },
    ));
    let ret = expect_ok(kernel.syscall(
        task,
        Syscall::Wait {
            conditions: vec![Condition::new(channel, Signals::READABLE)],
            deadline: Deadline::NEVER,
        },
    ));
    assert!(matches!(ret, SyscallReturn::Events(events) if events.len() == 1));
}

#[test]
fn test_recv_into_full_table_leaves_message_queued() {
    let mut kernel = Kernel::with_config(cap_kernel::KernelConfig {
        captable_capacity: 4,
        ..Default::default()
    });
    let sender_domain = kernel.boot_domain();
    let sender = kernel.boot_task(sender_domain);
    let receiver_domain = kernel.boot_domain();
    let receiver = kernel.boot_task(receiver_domain);

    let channel = expect_handle(kernel.syscall(sender, Syscall::CreateChannel));
    let channel_object = object_of(&kernel, sender_domain, channel);
    let receiver_channel = kernel
        .boot_mint(receiver_domain, channel_object, Rights::READ)
        .unwrap();

    // Fill the rest of the receiver's table.
    let fillers: Vec<CapHandle> = (0..3)
        .map(|_| expect_handle(kernel.syscall(receiver, Syscall::CreateChannel)))
        .collect();

    let vmo = expect_handle(kernel.syscall(sender, Syscall::CreateVmo { size: 4096 }));
    expect_ok(kernel.syscall(
        sender,
        Syscall::Send {
            channel,
            message: Message::new(vec![5], vec![vmo]).unwrap(),
            deadline: None,
        },
    ));

    // The transferred capability has nowhere to land; the receive fails
    // without consuming the message.
    let err = expect_err(kernel.syscall(
        receiver,
        Syscall::Recv {
            channel: receiver_channel,
            deadline: None,
        },
    ));
    assert!(matches!(err, SysError::ResourceExhausted(_)));

    // Freeing one slot makes the same message deliverable, caps intact.
    expect_ok(kernel.syscall(
        receiver,
        Syscall::Drop {
            handle: fillers[0],
        },
    ));
    let ret = expect_ok(kernel.syscall(
        receiver,
        Syscall::Recv {
            channel: receiver_channel,
            deadline: None,
        },
    ));
    match ret {
        SyscallReturn::Message(message) => {
            assert_eq!(message.data(), &[5]);
            assert_eq!(message.caps().len(), 1);
        }
        other => panic!("expected a message, got {:?}", other),
    }
}
