#![allow(unused)]

use std::{
    collections::VecDeque,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, LevelFilter};
use simplelog::SimpleLogger;

use ledger_dmk_core::{
    apdu::{model::DeviceModelId, status::StatusWord, Apdu, ApduResponse},
    engine::{EngineFault, Flow, StepContext, Transition},
    Error, InternalApi, InternalApiExt, SendOptions, SessionState,
};

/// Setup logging for tests
pub fn setup() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Scripted [InternalApi] recording sent APDUs
pub struct MockApi {
    pub sent: Mutex<Vec<Apdu>>,
    responses: Mutex<VecDeque<Result<ApduResponse, Error>>>,
    state: Mutex<SessionState>,
}

impl MockApi {
    pub fn new(responses: Vec<Result<ApduResponse, Error>>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(vec![]),
            responses: Mutex::new(responses.into()),
            state: Mutex::new(SessionState::new(DeviceModelId::NanoX)),
        })
    }

    pub fn sent(&self) -> Vec<Apdu> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl InternalApi for MockApi {
    async fn send_apdu(&self, apdu: &Apdu, _opts: SendOptions) -> Result<ApduResponse, Error> {
        debug!("mock send: {}", apdu);

        self.sent.lock().unwrap().push(apdu.clone());

        let r = self.responses.lock().unwrap().pop_front();
        r.unwrap_or_else(|| Ok(ApduResponse::new(vec![], StatusWord::SUCCESS)))
    }

    fn session_state(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }

    fn set_session_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    fn device_model(&self) -> DeviceModelId {
        DeviceModelId::NanoX
    }
}

/// Flow stepping through a fixed number of states
pub struct CountFlow {
    pub states: usize,
    pub delay: Duration,
    pub steps: Arc<AtomicUsize>,
}

impl CountFlow {
    pub fn new(states: usize, delay: Duration) -> Self {
        Self {
            states,
            delay,
            steps: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Flow for CountFlow {
    type State = usize;
    type Output = usize;
    type Error = Error;
    type Intermediate = usize;

    fn initial(&self) -> usize {
        0
    }

    fn intermediate(&self, state: &usize) -> usize {
        *state
    }

    async fn step(
        &self,
        state: usize,
        _ctx: &StepContext<'_, usize>,
    ) -> Result<Transition<usize, usize, Error>, EngineFault> {
        tokio::time::sleep(self.delay).await;
        self.steps.fetch_add(1, Ordering::SeqCst);

        match state + 1 {
            n if n >= self.states => Ok(Transition::Done(Ok(n))),
            n => Ok(Transition::Next(n)),
        }
    }
}

/// Interaction required by [CommandFlow]
#[derive(Clone, Debug, PartialEq)]
pub enum Interaction {
    None,
    Confirm,
}

/// Flow sending a single APDU and returning the response payload
pub struct CommandFlow {
    pub apdu: Apdu,
}

#[derive(Debug)]
pub enum CommandState {
    Send,
}

#[async_trait]
impl Flow for CommandFlow {
    type State = CommandState;
    type Output = Vec<u8>;
    type Error = Error;
    type Intermediate = Interaction;

    fn initial(&self) -> CommandState {
        CommandState::Send
    }

    fn intermediate(&self, _state: &CommandState) -> Interaction {
        Interaction::Confirm
    }

    async fn step(
        &self,
        _state: CommandState,
        ctx: &StepContext<'_, Interaction>,
    ) -> Result<Transition<CommandState, Vec<u8>, Error>, EngineFault> {
        let r = ctx.api().send_apdu(&self.apdu, SendOptions::default()).await;

        match r {
            Ok(resp) => Ok(Transition::Done(Ok(resp.data))),
            Err(e) => Ok(Transition::Done(Err(e))),
        }
    }
}
