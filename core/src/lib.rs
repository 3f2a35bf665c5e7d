// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger device management kit core
//!
//! This provides the action [engine] used to drive multi-step device
//! operations, along with the [InternalApi] contract sessions expose to
//! running actions and the shared [Error] taxonomy.
//!
//! ## Operations
//!
//! A device operation is declared as a [Flow][engine::Flow]: an explicit
//! state enumeration, the user interaction required in each state, and an
//! async step executing each state's effect (typically sending one or more
//! [Command][apdu::Command]s through the session's [InternalApi]).
//!
//! Flows are started with [execute][engine::execute], returning an
//! [ActionHandle][engine::ActionHandle]:
//!
//! 1. Subscribers receive [`Pending`][engine::ActionState::Pending] states
//!    carrying the currently required interaction (e.g. confirm on device)
//! 2. Exactly one terminal state follows, one of
//!    [`Completed`][engine::ActionState::Completed],
//!    [`Error`][engine::ActionState::Error] or
//!    [`Stopped`][engine::ActionState::Stopped]
//! 3. Engine malfunctions are delivered on the stream error channel
//!    as [EngineFault][engine::EngineFault]s
//!
//! Flows compose via [run_sub_flow][engine::StepContext::run_sub_flow],
//! with inner pending states forwarded to outer subscribers.
//!

pub use ledger_dmk_apdu::{self as apdu};

pub mod api;
pub use api::{DeviceStatus, InternalApi, InternalApiExt, SendOptions, SessionState};

pub mod engine;

mod error;
pub use error::{Error, Recovery, TransportError};

pub mod replay;
