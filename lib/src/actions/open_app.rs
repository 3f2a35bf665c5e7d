// Copyright (c) 2022-2023 The MobileCoin Foundation

use async_trait::async_trait;
use log::debug;

use ledger_dmk_core::{
    apdu::{
        prelude::{AppAndVersion, CloseApp, GetAppAndVersion, OpenApp},
        status::DeviceCondition,
    },
    engine::{EngineFault, Flow, StepContext, Transition},
    Error, InternalApiExt,
};

use super::UserInteraction;

/// Open an application on the device, closing any other running application
#[derive(Clone, PartialEq, Debug)]
pub struct OpenAppFlow {
    pub app_name: String,
}

impl OpenAppFlow {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

/// [OpenAppFlow] states
#[derive(Clone, PartialEq, Debug)]
pub enum OpenAppState {
    /// Fetch the running application
    GetApp,
    /// Close the running application
    CloseApp,
    /// Request the application be opened
    OpenApp,
    /// Check the requested application is running
    Verify,
}

type OpenAppTransition = Transition<OpenAppState, AppAndVersion, Error>;

impl OpenAppFlow {
    /// Fetch the running application, recording it in the session state
    async fn get_app(&self, ctx: &StepContext<'_, UserInteraction>) -> Result<AppAndVersion, Error> {
        let api = ctx.api();
        let a = api.send_command(&GetAppAndVersion).await?;

        let mut s = api.session_state();
        s.observe_app(&a);
        api.set_session_state(s);

        Ok(a)
    }
}

#[async_trait]
impl Flow for OpenAppFlow {
    type State = OpenAppState;
    type Output = AppAndVersion;
    type Error = Error;
    type Intermediate = UserInteraction;

    fn initial(&self) -> OpenAppState {
        OpenAppState::GetApp
    }

    fn intermediate(&self, state: &OpenAppState) -> UserInteraction {
        match state {
            OpenAppState::OpenApp => UserInteraction::ConfirmOpenApp,
            _ => UserInteraction::None,
        }
    }

    async fn step(
        &self,
        state: OpenAppState,
        ctx: &StepContext<'_, UserInteraction>,
    ) -> Result<OpenAppTransition, EngineFault> {
        let api = ctx.api();

        let t = match state {
            OpenAppState::GetApp => match self.get_app(ctx).await {
                Ok(a) if a.name == self.app_name => {
                    debug!("{} already open", a);
                    Transition::Done(Ok(a))
                }
                Ok(a) if a.is_dashboard() => Transition::Next(OpenAppState::OpenApp),
                Ok(a) => {
                    debug!("closing {} to open {}", a, self.app_name);
                    Transition::Next(OpenAppState::CloseApp)
                }
                Err(e) => Transition::Done(Err(e)),
            },
            OpenAppState::CloseApp => match api.send_command(&CloseApp).await {
                Ok(_) => Transition::Next(OpenAppState::OpenApp),
                Err(e) => Transition::Done(Err(e)),
            },
            OpenAppState::OpenApp => {
                match api.send_command(&OpenApp::new(&self.app_name)).await {
                    Ok(_) => Transition::Next(OpenAppState::Verify),
                    Err(e) => Transition::Done(Err(e)),
                }
            }
            OpenAppState::Verify => match self.get_app(ctx).await {
                Ok(a) if a.name == self.app_name => Transition::Done(Ok(a)),
                Ok(a) => {
                    debug!("expected {} running, found {}", self.app_name, a);
                    Transition::Done(Err(DeviceCondition::UnknownApp.into()))
                }
                Err(e) => Transition::Done(Err(e)),
            },
        };

        Ok(t)
    }
}
