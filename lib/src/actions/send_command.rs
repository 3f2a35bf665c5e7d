// Copyright (c) 2022-2023 The MobileCoin Foundation

use async_trait::async_trait;

use ledger_dmk_core::{
    apdu::Command,
    engine::{EngineFault, Flow, StepContext, Transition},
    Error, InternalApiExt,
};

use super::{OpenAppFlow, UserInteraction};

/// Send a command to an application, opening the application first
///
/// A failure to open the application aborts the flow before the command
/// is sent.
#[derive(Clone, PartialEq, Debug)]
pub struct SendCommandInAppFlow<C> {
    pub app_name: String,
    pub command: C,
}

impl<C> SendCommandInAppFlow<C> {
    pub fn new(app_name: impl Into<String>, command: C) -> Self {
        Self {
            app_name: app_name.into(),
            command,
        }
    }
}

/// [SendCommandInAppFlow] states
#[derive(Clone, PartialEq, Debug)]
pub enum SendCommandState {
    /// Ensure the application is open
    OpenApp,
    /// Send the command
    SendCommand,
}

#[async_trait]
impl<C> Flow for SendCommandInAppFlow<C>
where
    C: Command + 'static,
    C::Response: Clone + Sync + 'static,
{
    type State = SendCommandState;
    type Output = C::Response;
    type Error = Error;
    type Intermediate = UserInteraction;

    fn initial(&self) -> SendCommandState {
        SendCommandState::OpenApp
    }

    fn intermediate(&self, state: &SendCommandState) -> UserInteraction {
        match state {
            SendCommandState::OpenApp => UserInteraction::None,
            SendCommandState::SendCommand => UserInteraction::ConfirmCommand,
        }
    }

    async fn step(
        &self,
        state: SendCommandState,
        ctx: &StepContext<'_, UserInteraction>,
    ) -> Result<Transition<SendCommandState, C::Response, Error>, EngineFault> {
        let t = match state {
            SendCommandState::OpenApp => {
                match ctx.run_sub_flow(OpenAppFlow::new(&self.app_name)).await? {
                    Ok(_) => Transition::Next(SendCommandState::SendCommand),
                    Err(e) => Transition::Done(Err(e)),
                }
            }
            SendCommandState::SendCommand => {
                Transition::Done(ctx.api().send_command(&self.command).await)
            }
        };

        Ok(t)
    }
}
