/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Action and action-descriptor types shared by the loader (C3), the
//! automaton table (C4), the binding graph (C5), and the scheduler (C6).
//! `spec.md` §3: "Dynamic dispatch of actions ... the only variant is the
//! *kind* of the action, a sum type with four cases; `match` on the tag
//! drives dispatch" — mirrored directly here rather than via a trait
//! object, the way the teacher's `KernelObject` enumerates its own small
//! set of variants instead of reaching for `dyn`.

pub type Aid = usize;
pub type Ano = usize;
pub type Bid = usize;
pub type BindingId = usize;

/// `spec.md` §3, entity `Action`: `(automaton, ano, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Input,
    Output,
    Internal,
    SystemInput,
}

/// How a parameter is fixed at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    None,
    Explicit,
    Auto,
}

/// How action names are matched when automata are re-linked by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    None,
    Equal,
}

/// One entry in an automaton's action catalog.
#[derive(Debug, Clone)]
pub struct Action {
    pub automaton: Aid,
    pub ano: Ano,
    pub kind: ActionKind,
    pub param_mode: ParamMode,
    pub compare: Compare,
    pub name: Option<String>,
    pub description: String,
    /// Opaque user-mode entry point, as parsed from the image by the
    /// loader. The kernel never dereferences it; it is carried through to
    /// the dispatch ABI unexamined (`spec.md` §6, Action ABI).
    pub entry: usize,
}

/// The runtime form of an action once its parameter has been fixed.
/// `spec.md` §3: "Equality is `(entry_point, parameter)`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub entry: usize,
    pub parameter: i64,
}

impl Action {
    pub fn descriptor(&self, parameter: i64) -> ActionDescriptor {
        ActionDescriptor {
            entry: self.entry,
            parameter,
        }
    }
}
