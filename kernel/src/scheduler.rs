/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! C6 — the scheduler (`spec.md` §4.6): "the core of the core." Per-automaton
//! FIFO ready queues feed a global round-robin automaton queue; `finish` is
//! the single cooperation point where a completed action both requeues its
//! own successor and, for a fired output, delivers to every bound input.

use crate::action::{Aid, Ano, Bid};
use crate::automaton::AutomatonTable;
use crate::binding::{BindingGraph, Endpoint};
use crate::buffer::BufferManager;
use heap::FrameAllocator;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy)]
pub struct ScheduledAction {
    pub ano: Ano,
    pub param: i64,
    pub bda: Option<Bid>,
    pub bdb: Option<Bid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// `spec.md` §4.6: "input or system_input actions are forbidden
    /// [in `finish`]; fatal: this indicates a user bug."
    FinishTargetNotLocallySchedulable,
    UnknownAction,
}

/// C6. Holds only the queues; the table, binding graph and buffer manager
/// it orchestrates are borrowed in for the duration of each call rather
/// than owned, so each of C2/C4/C5 stays independently testable.
#[derive(Default)]
pub struct Scheduler {
    ready: std::collections::HashMap<Aid, VecDeque<ScheduledAction>>,
    automaton_queue: VecDeque<Aid>,
    queued: HashSet<Aid>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an action on `aid`'s ready queue and, if `aid` wasn't already
    /// represented in the global round-robin queue, add it.
    pub fn enqueue(&mut self, aid: Aid, action: ScheduledAction) {
        self.ready.entry(aid).or_default().push_back(action);
        if self.queued.insert(aid) {
            self.automaton_queue.push_back(aid);
        }
    }

    pub fn schedule_init(&mut self, aid: Aid, ano: Ano, bda: Option<Bid>, bdb: Option<Bid>) {
        self.enqueue(
            aid,
            ScheduledAction {
                ano,
                param: 0,
                bda,
                bdb,
            },
        );
    }

    /// `spec.md` §4.6, step 1: "If `α.automaton.enabled = false`, the
    /// dispatcher skips it and calls back into itself to pick another."
    /// Disabled automata are filtered here and their dead queues dropped.
    pub fn dispatch(&mut self, table: &AutomatonTable) -> Option<(Aid, ScheduledAction)> {
        loop {
            let aid = *self.automaton_queue.front()?;
            if !table.is_live(aid) || !table.get(aid).map(|a| a.enabled).unwrap_or(false) {
                self.drop_automaton(aid);
                continue;
            }
            let queue = self.ready.get_mut(&aid)?;
            let action = queue.pop_front()?;
            if queue.is_empty() {
                self.automaton_queue.pop_front();
                self.queued.remove(&aid);
            }
            return Some((aid, action));
        }
    }

    fn drop_automaton(&mut self, aid: Aid) {
        self.automaton_queue.pop_front();
        self.queued.remove(&aid);
        self.ready.remove(&aid);
    }

    /// Removes every trace of a destroyed automaton from the scheduler's
    /// queues — called by the kernel context as part of dismantling it.
    pub fn purge(&mut self, aid: Aid) {
        self.ready.remove(&aid);
        self.queued.remove(&aid);
        self.automaton_queue.retain(|&a| a != aid);
    }

    /// `spec.md` §4.6, `finish`. `caller` is the automaton that is
    /// currently running; `output_fired` selects whether delivery happens
    /// for `(caller, fired_ano, fired_param)`. Returns the binding-set
    /// delivery outcome caller-affinity-first next action, if any is ready.
    #[allow(clippy::too_many_arguments)]
    pub fn finish<A: FrameAllocator>(
        &mut self,
        caller: Aid,
        fired_ano: Ano,
        fired_param: i64,
        next_ano: Option<Ano>,
        next_param: i64,
        output_fired: bool,
        bda: Option<Bid>,
        bdb: Option<Bid>,
        table: &mut AutomatonTable,
        bindings: &BindingGraph,
        buffers: &mut BufferManager<A>,
    ) -> Result<(), SchedulerError> {
        if let Some(next_ano) = next_ano {
            self.schedule_action(caller, next_ano, next_param, table)?;
        }

        if output_fired {
            self.deliver(caller, fired_ano, fired_param, bda, bdb, table, bindings, buffers);
        }

        Ok(())
    }

    /// Validates and enqueues `(next_ano, next_param)` on `aid`'s own ready
    /// queue — shared by the `schedule` syscall and by `finish`'s successor
    /// step (`spec.md` §4.6).
    pub fn schedule_action(
        &mut self,
        aid: Aid,
        next_ano: Ano,
        next_param: i64,
        table: &AutomatonTable,
    ) -> Result<(), SchedulerError> {
        use crate::action::ActionKind;
        let automaton = table.get(aid).ok_or(SchedulerError::UnknownAction)?;
        let action = automaton
            .find_action(next_ano)
            .ok_or(SchedulerError::UnknownAction)?;
        match action.kind {
            ActionKind::Output | ActionKind::Internal => {
                let param = match action.param_mode {
                    crate::action::ParamMode::None => 0,
                    _ => next_param,
                };
                self.enqueue(
                    aid,
                    ScheduledAction {
                        ano: next_ano,
                        param,
                        bda: None,
                        bdb: None,
                    },
                );
                Ok(())
            }
            ActionKind::Input | ActionKind::SystemInput => Err(SchedulerError::FinishTargetNotLocallySchedulable),
        }
    }

    /// `spec.md` §4.6, "Delivery": copy-on-send `bda`/`bdb` into every live
    /// bound input's buffer namespace, one binding at a time, in the
    /// binding set's iteration order. Out-of-memory for one target drops
    /// only that delivery (`spec.md` §4.6, Failure model) — every other
    /// bound input still receives its copy.
    fn deliver<A: FrameAllocator>(
        &mut self,
        source: Aid,
        ano: Ano,
        param: i64,
        bda: Option<Bid>,
        bdb: Option<Bid>,
        table: &mut AutomatonTable,
        bindings: &BindingGraph,
        buffers: &mut BufferManager<A>,
    ) {
        let endpoint = Endpoint { automaton: source, ano };
        let targets: Vec<_> = bindings.by_output(endpoint).filter_map(|id| bindings.get(*id)).copied().collect();

        for binding in targets {
            let target = binding.input.automaton;
            let target_enabled = table.get(target).map(|a| a.enabled).unwrap_or(false);
            if !target_enabled {
                continue;
            }

            let bda_t = match bda {
                Some(bid) => match buffers.transfer(source, bid, target) {
                    Ok(new_bid) => {
                        if let Some(a) = table.get_mut(target) {
                            a.buffers.insert(new_bid);
                        }
                        Some(new_bid)
                    }
                    Err(_) => {
                        machine::println!("scheduler: dropping delivery to automaton {target}, bda transfer out of memory");
                        continue;
                    }
                },
                None => None,
            };
            let bdb_t = match bdb {
                Some(bid) => match buffers.transfer(source, bid, target) {
                    Ok(new_bid) => {
                        if let Some(a) = table.get_mut(target) {
                            a.buffers.insert(new_bid);
                        }
                        Some(new_bid)
                    }
                    Err(_) => {
                        machine::println!("scheduler: dropping delivery to automaton {target}, bdb transfer out of memory");
                        continue;
                    }
                },
                None => None,
            };

            self.enqueue(
                target,
                ScheduledAction {
                    ano: binding.input.ano,
                    param: binding.in_param,
                    bda: bda_t,
                    bdb: bdb_t,
                },
            );
        }

        // The output's own copies are destroyed on its behalf once every
        // target has had a chance to take a COW-shared copy.
        if let Some(bid) = bda {
            let _ = buffers.destroy(source, bid);
        }
        if let Some(bid) = bdb {
            let _ = buffers.destroy(source, bid);
        }
    }

    /// `spec.md` §4.6: "If the caller's ready queue is non-empty, prefer
    /// the caller." Called after `finish` to pick the automaton the
    /// dispatcher runs next.
    pub fn next_after(&mut self, caller: Aid, table: &AutomatonTable) -> Option<(Aid, ScheduledAction)> {
        if let Some(queue) = self.ready.get_mut(&caller) {
            if let Some(action) = queue.pop_front() {
                if queue.is_empty() {
                    self.automaton_queue.retain(|&a| a != caller);
                    self.queued.remove(&caller);
                }
                return Some((caller, action));
            }
        }
        self.dispatch(table)
    }

    pub fn is_idle(&self) -> bool {
        self.automaton_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind, Compare, ParamMode};
    use crate::automaton::AutomatonTable;
    use crate::binding::BindingGraph;
    use heap::PoolFrameAllocator;
    use machine::VirtualRange;

    fn range() -> VirtualRange {
        VirtualRange { start: 0, end: 4096 }
    }

    fn action(aid: Aid, ano: Ano, kind: ActionKind, mode: ParamMode) -> Action {
        Action {
            automaton: aid,
            ano,
            kind,
            param_mode: mode,
            compare: Compare::None,
            name: None,
            description: String::new(),
            entry: 0,
        }
    }

    #[test]
    fn dispatch_returns_actions_in_fifo_order() {
        let mut table = AutomatonTable::new();
        let aid = table.create(None, range(), vec![], false, None).unwrap();
        let mut sched = Scheduler::new();
        sched.enqueue(aid, ScheduledAction { ano: 1, param: 0, bda: None, bdb: None });
        sched.enqueue(aid, ScheduledAction { ano: 2, param: 0, bda: None, bdb: None });
        let (first, a1) = sched.dispatch(&table).unwrap();
        assert_eq!(first, aid);
        assert_eq!(a1.ano, 1);
        let (_, a2) = sched.dispatch(&table).unwrap();
        assert_eq!(a2.ano, 2);
    }

    #[test]
    fn disabled_automaton_is_skipped_and_purged() {
        let mut table = AutomatonTable::new();
        let aid = table.create(None, range(), vec![], false, None).unwrap();
        let mut sched = Scheduler::new();
        sched.enqueue(aid, ScheduledAction { ano: 1, param: 0, bda: None, bdb: None });
        table.disable(aid).unwrap();
        assert!(sched.dispatch(&table).is_none());
    }

    #[test]
    fn finish_rejects_scheduling_an_input_locally() {
        let mut table = AutomatonTable::new();
        let aid = table
            .create(None, range(), vec![action(0, 5, ActionKind::Input, ParamMode::None)], false, None)
            .unwrap();
        let mut sched = Scheduler::new();
        let bindings = BindingGraph::new();
        let mut buffers = BufferManager::new(PoolFrameAllocator::new(4));
        let err = sched
            .finish(aid, 0, 0, Some(5), 0, false, None, None, &mut table, &bindings, &mut buffers)
            .unwrap_err();
        assert_eq!(err, SchedulerError::FinishTargetNotLocallySchedulable);
    }

    #[test]
    fn finish_delivers_to_every_bound_input_and_frees_sender_copy() {
        let mut table = AutomatonTable::new();
        let producer = table
            .create(None, range(), vec![action(0, 0, ActionKind::Output, ParamMode::None)], false, None)
            .unwrap();
        let consumer = table
            .create(None, range(), vec![action(0, 0, ActionKind::Input, ParamMode::None)], false, None)
            .unwrap();
        let mut bindings = BindingGraph::new();
        let out = crate::binding::CandidateAction {
            automaton: producer,
            ano: 0,
            kind: ActionKind::Output,
            param_mode: ParamMode::None,
        };
        let inp = crate::binding::CandidateAction {
            automaton: consumer,
            ano: 0,
            kind: ActionKind::Input,
            param_mode: ParamMode::None,
        };
        bindings.bind(producer, out, 0, inp, 0).unwrap();

        let mut buffers = BufferManager::new(PoolFrameAllocator::new(4));
        let bda = buffers.create_with_bytes(producer, b"payload").unwrap();
        table.get_mut(producer).unwrap().buffers.insert(bda);

        let mut sched = Scheduler::new();
        sched
            .finish(producer, 0, 0, None, 0, true, Some(bda), None, &mut table, &bindings, &mut buffers)
            .unwrap();

        let (target, delivered) = sched.dispatch(&table).unwrap();
        assert_eq!(target, consumer);
        let delivered_bid = delivered.bda.unwrap();
        assert_eq!(buffers.read_bytes(consumer, delivered_bid).unwrap(), b"payload");
        // Sender's own copy was destroyed as part of delivery.
        assert!(buffers.read_bytes(producer, bda).is_err());
    }

    #[test]
    fn finish_skips_disabled_targets_without_failing() {
        let mut table = AutomatonTable::new();
        let producer = table
            .create(None, range(), vec![action(0, 0, ActionKind::Output, ParamMode::None)], false, None)
            .unwrap();
        let consumer = table
            .create(None, range(), vec![action(0, 0, ActionKind::Input, ParamMode::None)], false, None)
            .unwrap();
        let mut bindings = BindingGraph::new();
        let out = crate::binding::CandidateAction {
            automaton: producer,
            ano: 0,
            kind: ActionKind::Output,
            param_mode: ParamMode::None,
        };
        let inp = crate::binding::CandidateAction {
            automaton: consumer,
            ano: 0,
            kind: ActionKind::Input,
            param_mode: ParamMode::None,
        };
        bindings.bind(producer, out, 0, inp, 0).unwrap();
        table.disable(consumer).unwrap();

        let mut buffers: BufferManager<PoolFrameAllocator> = BufferManager::new(PoolFrameAllocator::new(4));
        let mut sched = Scheduler::new();
        sched
            .finish(producer, 0, 0, None, 0, true, None, None, &mut table, &bindings, &mut buffers)
            .unwrap();
        assert!(sched.dispatch(&table).is_none());
    }

    #[test]
    fn caller_affinity_prefers_callers_own_queue() {
        let mut table = AutomatonTable::new();
        let caller = table.create(None, range(), vec![], false, None).unwrap();
        let other = table.create(None, range(), vec![], false, None).unwrap();
        let mut sched = Scheduler::new();
        sched.enqueue(other, ScheduledAction { ano: 9, param: 0, bda: None, bdb: None });
        sched.enqueue(caller, ScheduledAction { ano: 1, param: 0, bda: None, bdb: None });
        let (next, action) = sched.next_after(caller, &table).unwrap();
        assert_eq!(next, caller);
        assert_eq!(action.ano, 1);
    }
}
