/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! C4 — the automaton table (`spec.md` §4.4).
//!
//! Holds the canonical collection of live automata, indexed by `aid` and by
//! name, the way the teacher's capability objects are held in a single
//! owning table rather than referenced by raw pointer from everywhere that
//! needs one. Destruction is two-phase — disable, then dismantle — so that
//! in-flight deliveries that still hold an `aid` never see a freed struct,
//! only a disabled one.

use crate::action::{Action, Aid, Ano, Bid, BindingId};
use crate::ids::IdAllocator;
use machine::VirtualRange;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyedVia {
    Owner,
    Cascade,
}

/// `spec.md` §3, entity `Automaton`.
#[derive(Debug)]
pub struct Automaton {
    pub aid: Aid,
    pub name: Option<String>,
    pub address_space: VirtualRange,
    pub actions: Vec<Action>,
    pub privileged: bool,
    pub enabled: bool,
    pub parent: Option<Aid>,
    pub children: BTreeSet<Aid>,
    pub outgoing: BTreeSet<BindingId>,
    pub incoming: BTreeSet<BindingId>,
    /// `(ano, param)` to schedule on that owner when `self` is destroyed.
    pub destroyed_subscribers: HashMap<Aid, (Ano, i64)>,
    /// `bid`s allocated to this automaton. Actual content lives in the
    /// buffer manager; this is just a manifest for teardown.
    pub buffers: BTreeSet<Bid>,
    /// The two buffers the parent supplied at birth, retained for
    /// `getinita`/`getinitb` (`spec.md` §6).
    pub init_bda: Option<Bid>,
    pub init_bdb: Option<Bid>,
    refcount: usize,
}

impl Automaton {
    fn new(aid: Aid, name: Option<String>, address_space: VirtualRange, actions: Vec<Action>, privileged: bool) -> Self {
        Self {
            aid,
            name,
            address_space,
            actions,
            privileged,
            enabled: true,
            parent: None,
            children: BTreeSet::new(),
            outgoing: BTreeSet::new(),
            incoming: BTreeSet::new(),
            destroyed_subscribers: HashMap::new(),
            buffers: BTreeSet::new(),
            init_bda: None,
            init_bdb: None,
            refcount: 0,
        }
    }

    pub fn find_action(&self, ano: Ano) -> Option<&Action> {
        self.actions.iter().find(|a| a.ano == ano)
    }

    pub fn find_action_by_name(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name.as_deref() == Some(name))
    }

    pub fn incref(&mut self) {
        self.refcount += 1;
    }

    pub fn decref(&mut self) -> usize {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatonError {
    NameTaken,
    AidDoesNotExist,
    NameDoesNotExist,
}

/// Outcome of dismantling one automaton, handed back to the caller (the
/// scheduler and binding graph) so it can finish tearing down cross-cutting
/// state the table itself doesn't own.
pub struct Dismantled {
    pub aid: Aid,
    pub buffers: Vec<Bid>,
    pub outgoing: Vec<BindingId>,
    pub incoming: Vec<BindingId>,
    pub children: Vec<Aid>,
    pub parent: Option<Aid>,
    pub destroyed_subscribers: Vec<(Aid, Ano, i64)>,
}

/// C4, `spec.md` §4.4: "the canonical collection of live automata."
#[derive(Default)]
pub struct AutomatonTable {
    ids: IdAllocator,
    automata: HashMap<Aid, Automaton>,
    by_name: HashMap<String, Aid>,
}

impl AutomatonTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        name: Option<String>,
        address_space: VirtualRange,
        actions: Vec<Action>,
        privileged: bool,
        parent: Option<Aid>,
    ) -> Result<Aid, AutomatonError> {
        if let Some(ref n) = name {
            if self.by_name.contains_key(n) {
                return Err(AutomatonError::NameTaken);
            }
        }
        let aid = self.ids.alloc();
        let mut automaton = Automaton::new(aid, name.clone(), address_space, actions, privileged);
        automaton.parent = parent;
        if let Some(n) = name {
            self.by_name.insert(n, aid);
        }
        if let Some(parent_aid) = parent {
            if let Some(p) = self.automata.get_mut(&parent_aid) {
                p.children.insert(aid);
                p.incref();
            }
        }
        self.automata.insert(aid, automaton);
        Ok(aid)
    }

    pub fn get(&self, aid: Aid) -> Option<&Automaton> {
        self.automata.get(&aid)
    }

    pub fn get_mut(&mut self, aid: Aid) -> Option<&mut Automaton> {
        self.automata.get_mut(&aid)
    }

    pub fn lookup(&self, name: &str) -> Result<Aid, AutomatonError> {
        self.by_name.get(name).copied().ok_or(AutomatonError::NameDoesNotExist)
    }

    pub fn is_live(&self, aid: Aid) -> bool {
        self.automata.contains_key(&aid)
    }

    /// Phase 1 (`spec.md` §4.4): "set `enabled = false`; the scheduler will
    /// drop any of its actions it subsequently dequeues."
    pub fn disable(&mut self, aid: Aid) -> Result<(), AutomatonError> {
        let a = self.automata.get_mut(&aid).ok_or(AutomatonError::AidDoesNotExist)?;
        a.enabled = false;
        Ok(())
    }

    /// Phase 2: tear down everything the table itself owns and hand back
    /// what it doesn't (bindings, buffers) for the caller to release. The
    /// automaton struct is only actually dropped from the table once its
    /// refcount is zero, so a reference held by an in-flight delivery keeps
    /// it alive in memory even though it is already disabled and gone from
    /// lookup.
    pub fn dismantle(&mut self, aid: Aid) -> Result<Dismantled, AutomatonError> {
        let automaton = self.automata.get(&aid).ok_or(AutomatonError::AidDoesNotExist)?;
        let outgoing: Vec<BindingId> = automaton.outgoing.iter().copied().collect();
        let incoming: Vec<BindingId> = automaton.incoming.iter().copied().collect();
        let children: Vec<Aid> = automaton.children.iter().copied().collect();
        let buffers: Vec<Bid> = automaton.buffers.iter().copied().collect();
        let parent = automaton.parent;
        let destroyed_subscribers: Vec<(Aid, Ano, i64)> = automaton
            .destroyed_subscribers
            .iter()
            .map(|(&subscriber, &(ano, param))| (subscriber, ano, param))
            .collect();
        let name = automaton.name.clone();

        if let Some(n) = name {
            self.by_name.remove(&n);
        }
        if let Some(parent_aid) = parent {
            if let Some(p) = self.automata.get_mut(&parent_aid) {
                p.children.remove(&aid);
                p.decref();
            }
            // The parent may itself already be disabled and waiting only on
            // this child's reference to drop — re-check now that it has.
            self.retire_if_unreferenced(parent_aid);
        }
        self.ids.free(aid);
        self.retire_if_unreferenced(aid);

        Ok(Dismantled {
            aid,
            buffers,
            outgoing,
            incoming,
            children,
            parent,
            destroyed_subscribers,
        })
    }

    /// Drops the struct once nothing external still references it.
    /// `spec.md` §3, I8: "`aid` ... values are never reused while any
    /// reference to them exists" — the id is already retired by `dismantle`;
    /// this only controls when the backing memory is freed.
    pub fn retire_if_unreferenced(&mut self, aid: Aid) {
        let should_drop = matches!(self.automata.get(&aid), Some(a) if a.refcount() == 0 && !a.enabled);
        if should_drop {
            self.automata.remove(&aid);
        }
    }

    pub fn add_outgoing(&mut self, aid: Aid, binding: BindingId) {
        if let Some(a) = self.automata.get_mut(&aid) {
            a.outgoing.insert(binding);
        }
    }

    pub fn add_incoming(&mut self, aid: Aid, binding: BindingId) {
        if let Some(a) = self.automata.get_mut(&aid) {
            a.incoming.insert(binding);
        }
    }

    pub fn remove_outgoing(&mut self, aid: Aid, binding: BindingId) {
        if let Some(a) = self.automata.get_mut(&aid) {
            a.outgoing.remove(&binding);
        }
    }

    pub fn remove_incoming(&mut self, aid: Aid, binding: BindingId) {
        if let Some(a) = self.automata.get_mut(&aid) {
            a.incoming.remove(&binding);
        }
    }

    pub fn subscribe_destroyed(&mut self, target: Aid, subscriber: Aid, ano: Ano, param: i64) -> Result<(), AutomatonError> {
        let a = self.automata.get_mut(&target).ok_or(AutomatonError::AidDoesNotExist)?;
        a.destroyed_subscribers.insert(subscriber, (ano, param));
        Ok(())
    }

    pub fn unsubscribe_destroyed(&mut self, target: Aid, subscriber: Aid) -> Result<(), AutomatonError> {
        let a = self.automata.get_mut(&target).ok_or(AutomatonError::AidDoesNotExist)?;
        a.destroyed_subscribers.remove(&subscriber);
        Ok(())
    }

    /// Drops a dying automaton out of every other live automaton's
    /// subscriber table — `spec.md` §4.8: "cleaned up atomically when the
    /// subscriber dies."
    pub fn purge_subscriber(&mut self, subscriber: Aid) {
        for automaton in self.automata.values_mut() {
            automaton.destroyed_subscribers.remove(&subscriber);
        }
    }
}
