//! Deterministic multi-core scheduling.
//!
//! The kernel proper runs single-core; this module models the same
//! runnable/blocked partition across several cores with per-core run
//! queues and tick counters, so the parallel-context behavior can be
//! tested without real concurrency. Assignment is round-robin at enqueue
//! time; an idle core steals from the most loaded one, lowest core id
//! breaking ties, so every schedule is reproducible.

use core_types::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::scheduler::{PreemptionReason, TaskState};

/// Identifier for a CPU core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoreId(pub usize);

/// Multi-core scheduler configuration.
#[derive(Debug, Clone)]
pub struct SmpConfig {
    pub core_count: usize,
    pub quantum_ticks: u64,
}

impl Default for SmpConfig {
    fn default() -> Self {
        Self {
            core_count: 2,
            quantum_ticks: 10,
        }
    }
}

/// Scheduling event tagged with core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreScheduleEvent {
    TaskSelected {
        core_id: CoreId,
        task_id: TaskId,
        timestamp_ticks: u64,
    },
    TaskStolen {
        from: CoreId,
        to: CoreId,
        task_id: TaskId,
    },
    TaskPreempted {
        core_id: CoreId,
        task_id: TaskId,
        reason: PreemptionReason,
        timestamp_ticks: u64,
    },
}

#[derive(Debug)]
struct CoreState {
    run_queue: VecDeque<TaskId>,
    current_task: Option<TaskId>,
    ticks_in_quantum: u64,
    ticks: u64,
}

impl CoreState {
    fn new() -> Self {
        Self {
            run_queue: VecDeque::new(),
            current_task: None,
            ticks_in_quantum: 0,
            ticks: 0,
        }
    }
}

#[derive(Debug)]
struct TaskInfo {
    state: TaskState,
    home: CoreId,
}

/// Deterministic multi-core scheduler.
pub struct MultiCoreScheduler {
    config: SmpConfig,
    cores: Vec<CoreState>,
    tasks: HashMap<TaskId, TaskInfo>,
    next_core: usize,
    audit_log: Vec<CoreScheduleEvent>,
}

impl MultiCoreScheduler {
    pub fn new(config: SmpConfig) -> Self {
        let mut cores = Vec::with_capacity(config.core_count);
        for _ in 0..config.core_count {
            cores.push(CoreState::new());
        }
        Self {
            config,
            cores,
            tasks: HashMap::new(),
            next_core: 0,
            audit_log: Vec::new(),
        }
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    /// Registers a task, assigning it a home core round-robin.
    pub fn enqueue(&mut self, task_id: TaskId) -> CoreId {
        let core_id = CoreId(self.next_core);
        self.next_core = (self.next_core + 1) % self.cores.len();
        self.tasks.insert(
            task_id,
            TaskInfo {
                state: TaskState::Runnable,
                home: core_id,
            },
        );
        self.cores[core_id.0].run_queue.push_back(task_id);
        core_id
    }

    /// Selects the next task for a core, stealing if its own queue is
    /// empty.
    pub fn dequeue_next(&mut self, core_id: CoreId) -> Option<TaskId> {
        if self.cores[core_id.0].run_queue.is_empty() {
            self.steal_for(core_id);
        }
        let core = &mut self.cores[core_id.0];
        let next = core.run_queue.pop_front();
        if let Some(task_id) = next {
            core.current_task = Some(task_id);
            core.ticks_in_quantum = 0;
            let timestamp_ticks = core.ticks;
            self.audit_log.push(CoreScheduleEvent::TaskSelected {
                core_id,
                task_id,
                timestamp_ticks,
            });
        } else {
            core.current_task = None;
        }
        next
    }

    fn steal_for(&mut self, thief: CoreId) {
        let victim = self
            .cores
            .iter()
            .enumerate()
            .filter(|(id, core)| *id != thief.0 && core.run_queue.len() > 1)
            .max_by(|(a_id, a), (b_id, b)| {
                a.run_queue
                    .len()
                    .cmp(&b.run_queue.len())
                    // Lowest core id wins ties.
                    .then(b_id.cmp(a_id))
            })
            .map(|(id, _)| CoreId(id));
        if let Some(victim) = victim {
            if let Some(task_id) = self.cores[victim.0].run_queue.pop_back() {
                if let Some(info) = self.tasks.get_mut(&task_id) {
                    info.home = thief;
                }
                self.cores[thief.0].run_queue.push_back(task_id);
                self.audit_log.push(CoreScheduleEvent::TaskStolen {
                    from: victim,
                    to: thief,
                    task_id,
                });
            }
        }
    }

    /// Advances one core's tick counter, charging its current task.
    pub fn on_tick_advanced(&mut self, core_id: CoreId, delta_ticks: u64) {
        let core = &mut self.cores[core_id.0];
        core.ticks += delta_ticks;
        if core.current_task.is_some() {
            core.ticks_in_quantum += delta_ticks;
        }
    }

    pub fn should_preempt(&self, core_id: CoreId) -> bool {
        let core = &self.cores[core_id.0];
        core.current_task.is_some() && core.ticks_in_quantum >= self.config.quantum_ticks
    }

    pub fn preempt_current(&mut self, core_id: CoreId) -> bool {
        let core = &mut self.cores[core_id.0];
        if let Some(task_id) = core.current_task.take() {
            core.ticks_in_quantum = 0;
            core.run_queue.push_back(task_id);
            let timestamp_ticks = core.ticks;
            self.audit_log.push(CoreScheduleEvent::TaskPreempted {
                core_id,
                task_id,
                reason: PreemptionReason::QuantumExpired,
                timestamp_ticks,
            });
            return true;
        }
        false
    }

    /// Moves a task to the blocked partition, off every queue.
    pub fn block_task(&mut self, task_id: TaskId) {
        if let Some(info) = self.tasks.get_mut(&task_id) {
            info.state = TaskState::Blocked;
        }
        for core in &mut self.cores {
            core.run_queue.retain(|&id| id != task_id);
            if core.current_task == Some(task_id) {
                core.current_task = None;
            }
        }
    }

    /// Returns a blocked task to its home core's run queue.
    pub fn unblock_task(&mut self, task_id: TaskId) {
        if let Some(info) = self.tasks.get_mut(&task_id) {
            if info.state == TaskState::Blocked {
                info.state = TaskState::Runnable;
                self.cores[info.home.0].run_queue.push_back(task_id);
            }
        }
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.tasks.get(&task_id).map(|info| info.state)
    }

    pub fn current_task(&self, core_id: CoreId) -> Option<TaskId> {
        self.cores[core_id.0].current_task
    }

    pub fn runnable_count(&self) -> usize {
        self.cores.iter().map(|core| core.run_queue.len()).sum()
    }

    /// Returns the audit log (test-only)
    pub fn audit_log(&self) -> &[CoreScheduleEvent] {
        &self.audit_log
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&CoreScheduleEvent) -> bool,
    {
        self.audit_log.iter().any(predicate)
    }
}
