// Copyright (c) 2022-2023 The MobileCoin Foundation

use async_trait::async_trait;

use log::debug;

use ledger_dmk_core::{
    apdu::{
        prelude::{GetAppAndVersion, GetOsVersion},
        status::DeviceCondition,
    },
    engine::{EngineFault, Flow, StepContext, Transition},
    DeviceStatus, Error, InternalApiExt, SessionState,
};

use super::UserInteraction;

/// Fetch the running application and update the session state.
///
/// The OS version is also fetched when the device is on the dashboard.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct GetDeviceStatusFlow;

/// [GetDeviceStatusFlow] states
#[derive(Clone, PartialEq, Debug)]
pub enum DeviceStatusState {
    /// Fetch the running application
    GetApp,
    /// Fetch the OS version (dashboard only)
    GetOsVersion,
}

#[async_trait]
impl Flow for GetDeviceStatusFlow {
    type State = DeviceStatusState;
    type Output = SessionState;
    type Error = Error;
    type Intermediate = UserInteraction;

    fn initial(&self) -> DeviceStatusState {
        DeviceStatusState::GetApp
    }

    fn intermediate(&self, _state: &DeviceStatusState) -> UserInteraction {
        UserInteraction::None
    }

    async fn step(
        &self,
        state: DeviceStatusState,
        ctx: &StepContext<'_, UserInteraction>,
    ) -> Result<Transition<DeviceStatusState, SessionState, Error>, EngineFault> {
        let api = ctx.api();

        match state {
            DeviceStatusState::GetApp => {
                let r = api.send_command(&GetAppAndVersion).await;
                let mut s = api.session_state();

                match r {
                    Ok(a) => {
                        s.observe_app(&a);
                        api.set_session_state(s.clone());

                        match a.is_dashboard() {
                            true => Ok(Transition::Next(DeviceStatusState::GetOsVersion)),
                            false => Ok(Transition::Done(Ok(s))),
                        }
                    }
                    Err(e) => {
                        if e.device_condition() == Some(DeviceCondition::Locked) {
                            s.status = DeviceStatus::Locked;
                            api.set_session_state(s);
                        }

                        Ok(Transition::Done(Err(e)))
                    }
                }
            }
            DeviceStatusState::GetOsVersion => {
                let r = api.send_command(&GetOsVersion).await;
                let mut s = api.session_state();

                match r {
                    Ok(v) => {
                        debug!("OS version: {}", v.se_version);

                        s.firmware_version = Some(v);
                        api.set_session_state(s.clone());

                        Ok(Transition::Done(Ok(s)))
                    }
                    Err(e) => Ok(Transition::Done(Err(e))),
                }
            }
        }
    }
}
