/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! C8 — system events (`spec.md` §4.8): `init`, `destroyed(aid)` and `irq`
//! all materialize as `system_input` actions rather than as a separate
//! notification mechanism, so delivering one is just enqueueing a
//! `ScheduledAction` the same way the scheduler enqueues anything else.
//!
//! IRQ subscriptions are multiplexed per line (`SPEC_FULL.md` supplements
//! this beyond the base action-descriptor model, grounded on
//! `libc/io.c`/`system_automaton_private.hpp`'s per-line dispatch): several
//! automata may each own a distinct `(line, ano, param)` triple, and a line
//! firing schedules a `system_input` on every one of its subscribers.

use crate::action::{Aid, Ano};
use crate::automaton::AutomatonTable;
use crate::scheduler::{ScheduledAction, Scheduler};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventError {
    AlreadySubscribed,
    NotSubscribed,
}

/// Tracks who owns each IRQ line — at most one subscriber per line, since a
/// line is itself a single-owner resource the way a reserved port is
/// (`spec.md` §6, Privileged group); distinct from the per-`aid`
/// `destroyed_subscribers` table which allows many subscribers per target.
#[derive(Default)]
pub struct IrqTable {
    lines: HashMap<u32, (Aid, Ano, i64)>,
}

impl IrqTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, line: u32, aid: Aid, ano: Ano, param: i64) -> Result<(), EventError> {
        if self.lines.contains_key(&line) {
            return Err(EventError::AlreadySubscribed);
        }
        self.lines.insert(line, (aid, ano, param));
        Ok(())
    }

    pub fn unsubscribe(&mut self, line: u32, aid: Aid) -> Result<(), EventError> {
        match self.lines.get(&line) {
            Some(&(owner, _, _)) if owner == aid => {
                self.lines.remove(&line);
                Ok(())
            }
            _ => Err(EventError::NotSubscribed),
        }
    }

    /// Drops every line a dying automaton held — `spec.md` §4.8:
    /// "cleaned up atomically when the subscriber dies."
    pub fn purge_subscriber(&mut self, aid: Aid) {
        self.lines.retain(|_, &mut (owner, _, _)| owner != aid);
    }

    /// `spec.md` §4.8: "a driver ... receives `(ano, param)` with empty
    /// buffers on each fire of `line`." Enqueues a `system_input` on the
    /// line's subscriber, if it is still live and enabled.
    pub fn fire(&self, line: u32, table: &AutomatonTable, scheduler: &mut Scheduler) {
        if let Some(&(aid, ano, param)) = self.lines.get(&line) {
            if table.get(aid).map(|a| a.enabled).unwrap_or(false) {
                scheduler.enqueue(aid, ScheduledAction { ano, param, bda: None, bdb: None });
            }
        }
    }
}

/// `spec.md` §4.8: "fired on every automaton that had subscribed to `aid`
/// when `aid` is destroyed." `table` has already removed `aid`'s own entry
/// by the time this runs; `subscribers` is the list `dismantle` handed
/// back.
pub fn notify_destroyed(
    destroyed: Aid,
    subscribers: &[(Aid, Ano, i64)],
    table: &AutomatonTable,
    scheduler: &mut Scheduler,
) {
    for &(subscriber, ano, _registered_param) in subscribers {
        if table.get(subscriber).map(|a| a.enabled).unwrap_or(false) {
            scheduler.enqueue(
                subscriber,
                ScheduledAction {
                    ano,
                    param: destroyed as i64,
                    bda: None,
                    bdb: None,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind, Compare, ParamMode};
    use machine::VirtualRange;

    fn range() -> VirtualRange {
        VirtualRange { start: 0, end: 4096 }
    }

    fn sysinput(aid: Aid, ano: Ano) -> Action {
        Action {
            automaton: aid,
            ano,
            kind: ActionKind::SystemInput,
            param_mode: ParamMode::None,
            compare: Compare::None,
            name: None,
            description: String::new(),
            entry: 0,
        }
    }

    #[test]
    fn irq_line_has_a_single_owner() {
        let mut irq = IrqTable::new();
        irq.subscribe(4, 1, 0, 0).unwrap();
        assert_eq!(irq.subscribe(4, 2, 0, 0), Err(EventError::AlreadySubscribed));
    }

    #[test]
    fn distinct_lines_fan_out_independently() {
        let mut table = AutomatonTable::new();
        let keyboard = table.create(None, range(), vec![sysinput(0, 9)], false, None).unwrap();
        let mouse = table.create(None, range(), vec![sysinput(0, 3)], false, None).unwrap();
        let mut irq = IrqTable::new();
        irq.subscribe(1, keyboard, 9, 0).unwrap();
        irq.subscribe(12, mouse, 3, 0).unwrap();

        let mut sched = Scheduler::new();
        irq.fire(1, &table, &mut sched);
        let (aid, action) = sched.dispatch(&table).unwrap();
        assert_eq!(aid, keyboard);
        assert_eq!(action.ano, 9);
        assert!(sched.dispatch(&table).is_none());
    }

    #[test]
    fn dead_subscriber_is_purged_and_stops_receiving() {
        let mut table = AutomatonTable::new();
        let aid = table.create(None, range(), vec![sysinput(0, 9)], false, None).unwrap();
        let mut irq = IrqTable::new();
        irq.subscribe(1, aid, 9, 0).unwrap();
        irq.purge_subscriber(aid);
        let mut sched = Scheduler::new();
        irq.fire(1, &table, &mut sched);
        assert!(sched.dispatch(&table).is_none());
    }

    #[test]
    fn notify_destroyed_enqueues_on_every_subscriber() {
        let mut table = AutomatonTable::new();
        let watcher_a = table.create(None, range(), vec![sysinput(0, 2)], false, None).unwrap();
        let watcher_b = table.create(None, range(), vec![sysinput(0, 3)], false, None).unwrap();
        let mut sched = Scheduler::new();
        notify_destroyed(42, &[(watcher_a, 2, 0), (watcher_b, 3, 0)], &table, &mut sched);
        let mut seen = vec![sched.dispatch(&table).unwrap(), sched.dispatch(&table).unwrap()];
        seen.sort_by_key(|(aid, _)| *aid);
        assert_eq!(seen[0].0, watcher_a);
        assert_eq!(seen[0].1.param, 42);
        assert_eq!(seen[1].0, watcher_b);
    }
}
