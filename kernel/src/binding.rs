/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! C5 — the binding graph (`spec.md` §4.5).
//!
//! Three cross-indexed sets — owner, output action, input action — so any
//! endpoint lookup is `O(1)` and invariants I3/I4 are single membership
//! queries, the same shape the teacher's capability derivation tree uses
//! three link fields instead of scanning: structure the index around the
//! query you need, not around how the data was created.

use crate::action::{Action, ActionKind, Aid, Ano, BindingId, ParamMode};
use crate::ids::IdAllocator;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub automaton: Aid,
    pub ano: Ano,
}

/// `spec.md` §3: `β = (out_α, out_param, in_α, in_param, owner)`.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub id: BindingId,
    pub owner: Aid,
    pub output: Endpoint,
    pub out_param: i64,
    pub input: Endpoint,
    pub in_param: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingError {
    OutputNotAnOutput,
    InputNotAnInput,
    SameAutomaton,
    InputAlreadyBound,
    DuplicateEdge,
    DoesNotExist,
}

/// Everything `bind` needs to know about a candidate action, normalized
/// away from the automaton table so this module has no dependency on it —
/// keeps I1–I5 checkable in isolation and unit-testable without standing up
/// a whole `AutomatonTable`.
#[derive(Debug, Clone, Copy)]
pub struct CandidateAction {
    pub automaton: Aid,
    pub ano: Ano,
    pub kind: ActionKind,
    pub param_mode: ParamMode,
}

impl From<&Action> for CandidateAction {
    fn from(a: &Action) -> Self {
        Self {
            automaton: a.automaton,
            ano: a.ano,
            kind: a.kind,
            param_mode: a.param_mode,
        }
    }
}

#[derive(Default)]
pub struct BindingGraph {
    ids: IdAllocator,
    bindings: HashMap<BindingId, Binding>,
    by_owner: HashMap<Aid, BTreeSet<BindingId>>,
    by_output: HashMap<Endpoint, BTreeSet<BindingId>>,
    by_input: HashMap<Endpoint, BTreeSet<BindingId>>,
}

impl BindingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(&id)
    }

    pub fn by_owner(&self, owner: Aid) -> impl Iterator<Item = &BindingId> {
        self.by_owner.get(&owner).into_iter().flatten()
    }

    pub fn by_output(&self, endpoint: Endpoint) -> impl Iterator<Item = &BindingId> {
        self.by_output.get(&endpoint).into_iter().flatten()
    }

    pub fn by_input(&self, endpoint: Endpoint) -> impl Iterator<Item = &BindingId> {
        self.by_input.get(&endpoint).into_iter().flatten()
    }

    /// `spec.md` §4.5: normalize `AUTO` (I5), then check I1–I4, then insert
    /// into all three indices (I6).
    pub fn bind(
        &mut self,
        owner: Aid,
        output: CandidateAction,
        out_param: i64,
        input: CandidateAction,
        in_param: i64,
    ) -> Result<BindingId, BindingError> {
        if output.kind != ActionKind::Output {
            return Err(BindingError::OutputNotAnOutput);
        }
        if input.kind != ActionKind::Input {
            return Err(BindingError::InputNotAnInput);
        }
        if output.automaton == input.automaton {
            return Err(BindingError::SameAutomaton);
        }

        let out_param = match output.param_mode {
            ParamMode::Auto => input.automaton as i64,
            _ => out_param,
        };
        let in_param = match input.param_mode {
            ParamMode::Auto => output.automaton as i64,
            _ => in_param,
        };

        let out_endpoint = Endpoint {
            automaton: output.automaton,
            ano: output.ano,
        };
        let in_endpoint = Endpoint {
            automaton: input.automaton,
            ano: input.ano,
        };

        // I3: this input, at this parameter, must be unbound.
        let already_bound = self
            .by_input(in_endpoint)
            .filter_map(|id| self.bindings.get(id))
            .any(|b| b.in_param == in_param);
        if already_bound {
            return Err(BindingError::InputAlreadyBound);
        }

        // I4: no second edge from this output into the same target
        // automaton under the same parameter.
        let duplicate = self
            .by_output(out_endpoint)
            .filter_map(|id| self.bindings.get(id))
            .any(|b| b.out_param == out_param && b.input.automaton == input.automaton);
        if duplicate {
            return Err(BindingError::DuplicateEdge);
        }

        let id = self.ids.alloc();
        let binding = Binding {
            id,
            owner,
            output: out_endpoint,
            out_param,
            input: in_endpoint,
            in_param,
        };
        self.bindings.insert(id, binding);
        self.by_owner.entry(owner).or_default().insert(id);
        self.by_output.entry(out_endpoint).or_default().insert(id);
        self.by_input.entry(in_endpoint).or_default().insert(id);
        Ok(id)
    }

    pub fn unbind(&mut self, id: BindingId) -> Result<Binding, BindingError> {
        let binding = self.bindings.remove(&id).ok_or(BindingError::DoesNotExist)?;
        if let Some(set) = self.by_owner.get_mut(&binding.owner) {
            set.remove(&id);
        }
        if let Some(set) = self.by_output.get_mut(&binding.output) {
            set.remove(&id);
        }
        if let Some(set) = self.by_input.get_mut(&binding.input) {
            set.remove(&id);
        }
        self.ids.free(id);
        Ok(binding)
    }
}
