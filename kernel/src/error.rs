/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! The stable syscall error taxonomy (`spec.md` §6, §7): "every syscall
//! returns a pair `(value, error)`; no ambient throwing." Every C1–C6
//! component error converts into this one enum at the C7 boundary via
//! `From`, the way the teacher's `CapError`/`LookupFault`/
//! `DerivationTreeError` stay local to their own module and only the
//! outermost caller picks a response code.

use crate::automaton::AutomatonError;
use crate::binding::BindingError;
use crate::buffer::BufferError;
use crate::events::EventError;
use crate::loader::LoaderError;
use crate::ports::PortError;
use crate::scheduler::SchedulerError;
use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq, Eq, Clone, Copy)]
pub enum SyscallError {
    #[snafu(display("invalid argument"))]
    Inval,
    #[snafu(display("already exists or already bound"))]
    Already,
    #[snafu(display("not found"))]
    Not,
    #[snafu(display("permission denied"))]
    Permission,
    #[snafu(display("aid does not exist"))]
    AidDne,
    #[snafu(display("bid does not exist"))]
    BidDne,
    #[snafu(display("ano does not exist"))]
    AnoDne,
    #[snafu(display("binding does not exist"))]
    BdDne,
    #[snafu(display("out of memory"))]
    NoMem,
    #[snafu(display("output aid does not exist"))]
    OaidDne,
    #[snafu(display("input aid does not exist"))]
    IaidDne,
    #[snafu(display("output ano does not exist"))]
    OanoDne,
    #[snafu(display("input ano does not exist"))]
    IanoDne,
    #[snafu(display("name already exists"))]
    Exists,
    #[snafu(display("malformed executable image"))]
    BadText,
}

pub type SyscallResult<T> = Result<T, SyscallError>;

impl From<AutomatonError> for SyscallError {
    fn from(e: AutomatonError) -> Self {
        match e {
            AutomatonError::NameTaken => SyscallError::Exists,
            AutomatonError::AidDoesNotExist => SyscallError::AidDne,
            AutomatonError::NameDoesNotExist => SyscallError::Not,
        }
    }
}

impl From<BindingError> for SyscallError {
    fn from(e: BindingError) -> Self {
        match e {
            BindingError::OutputNotAnOutput | BindingError::InputNotAnInput => SyscallError::Inval,
            BindingError::SameAutomaton => SyscallError::Inval,
            BindingError::InputAlreadyBound | BindingError::DuplicateEdge => SyscallError::Already,
            BindingError::DoesNotExist => SyscallError::BdDne,
        }
    }
}

impl From<BufferError> for SyscallError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::DoesNotExist => SyscallError::BidDne,
            BufferError::AlreadyMapped => SyscallError::Already,
            BufferError::NotMapped => SyscallError::Not,
            BufferError::NoMemory => SyscallError::NoMem,
        }
    }
}

impl From<LoaderError> for SyscallError {
    fn from(_: LoaderError) -> Self {
        SyscallError::BadText
    }
}

impl From<SchedulerError> for SyscallError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::FinishTargetNotLocallySchedulable => SyscallError::Inval,
            SchedulerError::UnknownAction => SyscallError::AnoDne,
        }
    }
}

impl From<PortError> for SyscallError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::NotPrivileged => SyscallError::Permission,
            PortError::AlreadyReserved | PortError::WrongOwner => SyscallError::Already,
            PortError::NotReserved => SyscallError::Not,
        }
    }
}

impl From<EventError> for SyscallError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::AlreadySubscribed => SyscallError::Already,
            EventError::NotSubscribed => SyscallError::Not,
        }
    }
}
