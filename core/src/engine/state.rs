// Copyright (c) 2022-2023 The MobileCoin Foundation

use strum::{Display, EnumIter, EnumString};

use super::EngineFault;

/// Externally visible state of an executing action
///
/// Each execution produces zero or more [ActionState::Pending] values
/// followed by exactly one terminal value.
#[derive(Clone, PartialEq, Debug, Display)]
pub enum ActionState<O, E, I> {
    /// Running, with the user interaction currently required
    Pending(I),
    /// Completed with output
    Completed(O),
    /// Failed with an error
    Error(E),
    /// Cancelled before completion
    Stopped,
}

impl<O, E, I> ActionState<O, E, I> {
    /// Check whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionState::Pending(_))
    }

    /// Machine category for this state
    pub fn status(&self) -> MachineStatus {
        match self {
            ActionState::Pending(_) => MachineStatus::Active,
            ActionState::Completed(_) | ActionState::Error(_) => MachineStatus::Done,
            ActionState::Stopped => MachineStatus::Stopped,
        }
    }

    /// Fetch the intermediate value for pending states
    pub fn intermediate(&self) -> Option<&I> {
        match self {
            ActionState::Pending(i) => Some(i),
            _ => None,
        }
    }
}

/// Machine status categories
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, EnumIter)]
pub enum MachineStatus {
    /// Executing
    Active,
    /// Reached a final state
    Done,
    /// Machine fault
    Faulted,
    /// Stopped externally
    Stopped,
}

impl<O, E, I> From<&Result<ActionState<O, E, I>, EngineFault>> for MachineStatus {
    fn from(r: &Result<ActionState<O, E, I>, EngineFault>) -> Self {
        match r {
            Ok(s) => s.status(),
            Err(_) => MachineStatus::Faulted,
        }
    }
}
