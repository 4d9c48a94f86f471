//! Deterministic preemptive scheduler.
//!
//! ## Philosophy
//!
//! - **Mechanism, not policy**: round-robin with a tick quantum, no
//!   priorities, no fairness compensation.
//! - **Determinism first**: same inputs + same ticks => same schedule.
//! - **No hidden yields**: preemption is explicit and testable.
//!
//! The scheduler partitions tasks into runnable and blocked. It does not
//! know *why* a task is blocked — the blocker attached to the task holds
//! that — it only maintains the partition and the deterministic order in
//! which blocked tasks are re-examined.

use core_types::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Task state in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Task is ready to run
    Runnable,
    /// Task is blocked on its attached blocker
    Blocked,
    /// Task has exited
    Exited,
    /// Task was cancelled (its domain or object went away)
    Cancelled,
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of ticks a task can run before being preempted
    pub quantum_ticks: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum_ticks: 10, // Small quantum for testing
        }
    }
}

/// Reason for preemption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreemptionReason {
    /// Time quantum expired
    QuantumExpired,
    /// Task blocked on a syscall
    Blocked,
}

/// Scheduling event for audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    TaskSelected {
        task_id: TaskId,
        timestamp_ticks: u64,
    },
    TaskPreempted {
        task_id: TaskId,
        reason: PreemptionReason,
        timestamp_ticks: u64,
    },
    TaskBlocked {
        task_id: TaskId,
        timestamp_ticks: u64,
    },
    TaskUnblocked {
        task_id: TaskId,
        timestamp_ticks: u64,
    },
    TaskTimedOut {
        task_id: TaskId,
        timestamp_ticks: u64,
    },
    TaskExited {
        task_id: TaskId,
        timestamp_ticks: u64,
    },
}

#[derive(Debug)]
struct TaskInfo {
    state: TaskState,
    ticks_in_quantum: u64,
}

/// Preemptive scheduler over the runnable/blocked partition.
pub struct Scheduler {
    config: SchedulerConfig,
    run_queue: VecDeque<TaskId>,
    /// Blocked tasks in the order they blocked. Re-scans walk this in
    /// order, which keeps wakeups deterministic.
    blocked_order: Vec<TaskId>,
    tasks: HashMap<TaskId, TaskInfo>,
    current_task: Option<TaskId>,
    current_ticks: u64,
    /// Audit log for scheduling events (test-only)
    audit_log: Vec<ScheduleEvent>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            run_queue: VecDeque::new(),
            blocked_order: Vec::new(),
            tasks: HashMap::new(),
            current_task: None,
            current_ticks: 0,
            audit_log: Vec::new(),
        }
    }

    /// Registers a task and marks it runnable.
    pub fn enqueue(&mut self, task_id: TaskId) {
        self.tasks.insert(
            task_id,
            TaskInfo {
                state: TaskState::Runnable,
                ticks_in_quantum: 0,
            },
        );
        self.run_queue.push_back(task_id);
    }

    /// Selects the next task to run, FIFO.
    pub fn dequeue_next(&mut self) -> Option<TaskId> {
        let next = self.run_queue.pop_front();
        if let Some(task_id) = next {
            if let Some(info) = self.tasks.get_mut(&task_id) {
                info.ticks_in_quantum = 0;
            }
            self.current_task = Some(task_id);
            self.audit_log.push(ScheduleEvent::TaskSelected {
                task_id,
                timestamp_ticks: self.current_ticks,
            });
        } else {
            self.current_task = None;
        }
        next
    }

    /// Advances scheduler time, charging the current task's quantum.
    pub fn on_tick_advanced(&mut self, delta_ticks: u64) {
        self.current_ticks += delta_ticks;
        if let Some(task_id) = self.current_task {
            if let Some(info) = self.tasks.get_mut(&task_id) {
                info.ticks_in_quantum += delta_ticks;
            }
        }
    }

    /// True if the current task has used up its quantum.
    pub fn should_preempt(&self, task_id: TaskId) -> bool {
        self.tasks
            .get(&task_id)
            .map(|info| info.ticks_in_quantum >= self.config.quantum_ticks)
            .unwrap_or(false)
    }

    /// Preempts the current task, moving it to the back of the run queue.
    pub fn preempt_current(&mut self) -> bool {
        if let Some(task_id) = self.current_task.take() {
            if let Some(info) = self.tasks.get_mut(&task_id) {
                if info.state == TaskState::Runnable {
                    info.ticks_in_quantum = 0;
                    self.run_queue.push_back(task_id);
                    self.audit_log.push(ScheduleEvent::TaskPreempted {
                        task_id,
                        reason: PreemptionReason::QuantumExpired,
                        timestamp_ticks: self.current_ticks,
                    });
                    return true;
                }
            }
        }
        false
    }

    /// Moves a task to the blocked partition.
    pub fn block_task(&mut self, task_id: TaskId) {
        if let Some(info) = self.tasks.get_mut(&task_id) {
            info.state = TaskState::Blocked;
            info.ticks_in_quantum = 0;
        }
        self.run_queue.retain(|&id| id != task_id);
        if !self.blocked_order.contains(&task_id) {
            self.blocked_order.push(task_id);
        }
        if self.current_task == Some(task_id) {
            self.current_task = None;
            self.audit_log.push(ScheduleEvent::TaskPreempted {
                task_id,
                reason: PreemptionReason::Blocked,
                timestamp_ticks: self.current_ticks,
            });
        }
        self.audit_log.push(ScheduleEvent::TaskBlocked {
            task_id,
            timestamp_ticks: self.current_ticks,
        });
    }

    /// Moves a blocked task back to the run queue.
    pub fn unblock_task(&mut self, task_id: TaskId) {
        if let Some(info) = self.tasks.get_mut(&task_id) {
            if info.state == TaskState::Blocked {
                info.state = TaskState::Runnable;
                info.ticks_in_quantum = 0;
                self.blocked_order.retain(|&id| id != task_id);
                self.run_queue.push_back(task_id);
                self.audit_log.push(ScheduleEvent::TaskUnblocked {
                    task_id,
                    timestamp_ticks: self.current_ticks,
                });
            }
        }
    }

    /// Like [`unblock_task`](Self::unblock_task) but records the wakeup as
    /// a deadline expiry.
    pub fn timeout_task(&mut self, task_id: TaskId) {
        if let Some(info) = self.tasks.get_mut(&task_id) {
            if info.state == TaskState::Blocked {
                info.state = TaskState::Runnable;
                info.ticks_in_quantum = 0;
                self.blocked_order.retain(|&id| id != task_id);
                self.run_queue.push_back(task_id);
                self.audit_log.push(ScheduleEvent::TaskTimedOut {
                    task_id,
                    timestamp_ticks: self.current_ticks,
                });
            }
        }
    }

    /// Removes a task from scheduling entirely.
    pub fn exit_task(&mut self, task_id: TaskId) {
        if let Some(info) = self.tasks.get_mut(&task_id) {
            info.state = TaskState::Exited;
        }
        self.remove_everywhere(task_id);
        self.audit_log.push(ScheduleEvent::TaskExited {
            task_id,
            timestamp_ticks: self.current_ticks,
        });
    }

    /// Removes a cancelled task (domain teardown) from scheduling.
    pub fn cancel_task(&mut self, task_id: TaskId) {
        if let Some(info) = self.tasks.get_mut(&task_id) {
            info.state = TaskState::Cancelled;
        }
        self.remove_everywhere(task_id);
    }

    fn remove_everywhere(&mut self, task_id: TaskId) {
        self.run_queue.retain(|&id| id != task_id);
        self.blocked_order.retain(|&id| id != task_id);
        if self.current_task == Some(task_id) {
            self.current_task = None;
        }
    }

    /// Blocked tasks in blocking order, for predicate re-scans.
    pub fn blocked_tasks(&self) -> Vec<TaskId> {
        self.blocked_order.clone()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    pub fn current_ticks(&self) -> u64 {
        self.current_ticks
    }

    pub fn runnable_count(&self) -> usize {
        self.run_queue.len()
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked_order.len()
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.tasks.get(&task_id).map(|info| info.state)
    }

    /// Returns the audit log (test-only)
    pub fn audit_log(&self) -> &[ScheduleEvent] {
        &self.audit_log
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&ScheduleEvent) -> bool,
    {
        self.audit_log.iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ScheduleEvent) -> bool,
    {
        self.audit_log.iter().filter(|e| predicate(e)).count()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
