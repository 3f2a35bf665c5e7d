// Copyright (c) 2022-2023 The MobileCoin Foundation

use core::fmt::Debug;

use async_trait::async_trait;
use log::trace;

use super::EngineFault;
use crate::api::InternalApi;

/// Result of executing a single flow state
#[derive(Clone, PartialEq, Debug)]
pub enum Transition<S, O, E> {
    /// Move to the next state
    Next(S),
    /// Reach a final state with the flow result
    Done(Result<O, E>),
}

/// Declarative multi-step device operation
///
/// Flows are explicit state machines, each state has associated metadata
/// describing the interaction required of the user ([Flow::intermediate])
/// and an effect executed by [Flow::step]. Any sub-step failure should route
/// directly to [Transition::Done] with an error, flows are never retried
/// by the engine.
#[async_trait]
pub trait Flow: Send + Sync + 'static {
    /// Flow state enumeration
    type State: Debug + Send + Sync;
    /// Flow output
    type Output: Clone + Debug + Send + Sync + 'static;
    /// Flow error
    type Error: Clone + Debug + Send + Sync + 'static;
    /// Required user interaction, published with pending states
    type Intermediate: Clone + Debug + Send + Sync + 'static;

    /// Initial flow state
    fn initial(&self) -> Self::State;

    /// Interaction required of the user in the provided state
    fn intermediate(&self, state: &Self::State) -> Self::Intermediate;

    /// Execute the provided state, returning the transition
    async fn step(
        &self,
        state: Self::State,
        ctx: &StepContext<'_, Self::Intermediate>,
    ) -> Result<Transition<Self::State, Self::Output, Self::Error>, EngineFault>;
}

/// Flow result, or an engine fault
pub type FlowResult<F> = Result<Result<<F as Flow>::Output, <F as Flow>::Error>, EngineFault>;

/// Context provided to executing flow states
pub struct StepContext<'a, I> {
    api: &'a dyn InternalApi,
    emit: &'a (dyn Fn(I) + Send + Sync),
}

impl<'a, I: Clone + Send + Sync + 'static> StepContext<'a, I> {
    /// Create a new context publishing intermediate values via `emit`
    pub fn new(api: &'a dyn InternalApi, emit: &'a (dyn Fn(I) + Send + Sync)) -> Self {
        Self { api, emit }
    }

    /// Session capabilities
    pub fn api(&self) -> &'a dyn InternalApi {
        self.api
    }

    /// Publish an updated interaction requirement
    pub fn set_intermediate(&self, i: I) {
        (self.emit)(i)
    }

    /// Run a sub-flow to completion, forwarding its pending values verbatim
    /// and returning its result
    pub async fn run_sub_flow<G>(&self, flow: G) -> FlowResult<G>
    where
        G: Flow,
        I: From<G::Intermediate>,
    {
        let emit = |i: G::Intermediate| (self.emit)(I::from(i));
        let ctx = StepContext::new(self.api, &emit);

        run_flow(&flow, &ctx).await
    }
}

/// Run a flow from its initial state to completion
pub async fn run_flow<F: Flow>(flow: &F, ctx: &StepContext<'_, F::Intermediate>) -> FlowResult<F> {
    let mut state = flow.initial();

    loop {
        trace!("Flow state: {:?}", state);

        ctx.set_intermediate(flow.intermediate(&state));

        match flow.step(state, ctx).await? {
            Transition::Next(s) => state = s,
            Transition::Done(r) => return Ok(r),
        }
    }
}
