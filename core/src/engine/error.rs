// Copyright (c) 2022-2023 The MobileCoin Foundation

/// [Engine][super] faults.
///
/// These indicate a malfunction of the action machinery itself and are
/// delivered on the action stream's error channel, never as an
/// [ActionState::Error][super::ActionState::Error].
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum EngineFault {
    /// Flow requested a transition that is not valid from its current state
    #[error("invalid transition from state {0}")]
    InvalidTransition(String),

    /// Flow task panicked
    #[error("flow execution panicked")]
    Panicked,

    /// Action was torn down without producing a result
    #[error("action terminated without a result")]
    NoResult,
}
