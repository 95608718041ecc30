//! The conveyor core: dispatches fetches and mutations, applies their
//! completions under per-name token guards, and reacts to input changes.
//!
//! A fetch or mutation is dispatched under a fresh conveyor-wide token; the
//! name's record remembers that token as the current one. When a completion
//! comes back with an older token a newer dispatch has superseded it, and it
//! is dropped without a trace: no state change, no render, no log. Later
//! dispatch wins regardless of settlement order.

use std::mem;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::{Replace, Sources};
use crate::handle::MutationCall;
use crate::intent::{Intent, MutationReply};
use crate::output::RenderProps;
use crate::props::{pick, shallow_equal, PropMap};
use crate::state::{FieldStatus, MutationStatus, TrackerState};

/// Errors surfaced to callers of conveyor operations.
#[derive(Debug, Clone, Error)]
pub enum ConveyorError {
    #[error("Unknown field '{name}'")]
    UnknownField { name: String },

    #[error("Unknown mutation '{name}'")]
    UnknownMutation { name: String },

    /// A second invocation of a mutation that has not settled yet. The
    /// in-flight invocation is unaffected.
    #[error("Mutation '{name}' is already in flight")]
    MutationInFlight { name: String },

    /// The mutation ran and failed. The same failure is also stored in the
    /// conveyor's error state before this is returned.
    #[error("Mutation '{name}' failed: {cause}")]
    Failed { name: String, cause: Arc<anyhow::Error> },

    /// The operation was superseded or the conveyor was torn down before the
    /// outcome could be delivered.
    #[error("Operation outcome discarded")]
    Discarded,
}

/// Whether a field must be refetched after a configuration update: either its
/// fetcher handle was swapped out, or the derived argument is no longer
/// shallow-equal to the previous one.
pub(crate) fn needs_reload(
    fetcher_changed: bool,
    previous_args: &Value,
    current_args: &Value,
) -> bool {
    fetcher_changed || !shallow_equal(previous_args, current_args)
}

/// Tracks named asynchronous fields and mutations against a set of forwarded
/// inputs.
///
/// The conveyor itself is single-owner and not `Sync`; it is normally driven
/// by a [`Runtime`](crate::Runtime), which serialises completions and
/// commands. Completions arrive on an internal channel and are folded in by
/// [`apply_next`](Self::apply_next) or [`drain`](Self::drain).
pub struct Conveyor {
    sources: Sources,
    inputs: PropMap,
    state: TrackerState,
    /// Last issued operation token. Conveyor-wide, so a name removed by a
    /// configuration update and added back later can never be handed a token
    /// an operation dispatched before the removal is still carrying.
    tokens: u64,
    active: bool,
    mounted: bool,
    intents_tx: mpsc::UnboundedSender<Intent>,
    intents_rx: mpsc::UnboundedReceiver<Intent>,
}

impl Conveyor {
    pub fn new(sources: Sources, inputs: PropMap) -> Self {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let state = TrackerState::initialize(sources.field_names(), sources.mutation_names());
        tracing::debug!(
            fields = sources.field_names().count(),
            mutations = sources.mutation_names().count(),
            "conveyor created"
        );
        Self {
            sources,
            inputs,
            state,
            tokens: 0,
            active: true,
            mounted: false,
            intents_tx,
            intents_rx,
        }
    }

    /// Whether the conveyor still accepts dispatches. Flips to `false` on
    /// [`teardown`](Self::teardown) and never back.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// A render-ready view of the current state.
    pub fn snapshot(&self) -> RenderProps {
        RenderProps::assemble(&self.sources, &self.state, &self.inputs)
    }

    /// Starts fetching every field that has never been fetched. Idempotent:
    /// a second call finds nothing missing and does nothing.
    ///
    /// Returns `true` when at least one fetch was dispatched.
    pub fn mount(&mut self) -> bool {
        self.mounted = true;
        let missing: Vec<String> = self
            .sources
            .field_names()
            .filter(|name| self.state.field_status(name) == Some(FieldStatus::Missing))
            .map(str::to_owned)
            .collect();
        let mut dispatched = false;
        for name in &missing {
            dispatched |= self.dispatch_fetch(name, false);
        }
        dispatched
    }

    /// Refetches one field, or all fields when `field` is `None`.
    ///
    /// A field whose fetch is already in flight is skipped; the running fetch
    /// stays authoritative. Returns `true` when at least one fetch was
    /// dispatched.
    ///
    /// # Errors
    ///
    /// [`ConveyorError::UnknownField`] when `field` names nothing configured.
    pub fn reload(&mut self, field: Option<&str>) -> Result<bool, ConveyorError> {
        match field {
            Some(name) => {
                if !self.sources.has_field(name) {
                    return Err(ConveyorError::UnknownField { name: name.to_owned() });
                }
                Ok(self.dispatch_fetch(name, false))
            }
            None => {
                let names: Vec<String> = self.sources.field_names().map(str::to_owned).collect();
                let mut dispatched = false;
                for name in &names {
                    dispatched |= self.dispatch_fetch(name, false);
                }
                Ok(dispatched)
            }
        }
    }

    /// Invokes a mutation. The returned [`MutationCall`] settles with the
    /// resolved value once the mutation completes and its outcome has been
    /// folded into the state.
    ///
    /// An invocation while the same mutation is in flight is rejected through
    /// the returned call with [`ConveyorError::MutationInFlight`] and leaves
    /// the running invocation untouched.
    ///
    /// # Errors
    ///
    /// [`ConveyorError::UnknownMutation`], synchronously, when `name` names
    /// nothing configured.
    pub fn mutate(&mut self, name: &str, args: Vec<Value>) -> Result<MutationCall, ConveyorError> {
        if !self.sources.has_mutation(name) {
            return Err(ConveyorError::UnknownMutation { name: name.to_owned() });
        }
        let (respond_to, outcome) = oneshot::channel();
        self.mutate_with(name, args, respond_to);
        Ok(MutationCall::new(outcome))
    }

    /// Like [`mutate`](Self::mutate), but reports every outcome, including
    /// rejections, through the supplied channel. Used by the runtime, which
    /// has already handed the receiving half to the caller.
    pub(crate) fn mutate_with(
        &mut self,
        name: &str,
        args: Vec<Value>,
        respond_to: MutationReply,
    ) -> bool {
        if !self.active {
            let _ = respond_to.send(Err(ConveyorError::Discarded));
            return false;
        }
        let Some(mutator) = self.sources.mutator(name).cloned() else {
            tracing::warn!(mutation = %name, "unknown mutation invoked");
            let _ = respond_to.send(Err(ConveyorError::UnknownMutation { name: name.to_owned() }));
            return false;
        };
        if self.state.mutation_status(name) == Some(MutationStatus::InFlight) {
            tracing::warn!(mutation = %name, "mutation already in flight, invocation rejected");
            let _ = respond_to.send(Err(ConveyorError::MutationInFlight { name: name.to_owned() }));
            return false;
        }
        let token = self.issue_token();
        tracing::debug!(mutation = %name, token, "mutation dispatched");
        let fut = (mutator)(args);
        self.state = mem::take(&mut self.state).begin_mutation(name, token);
        let tx = self.intents_tx.clone();
        let mutation = name.to_owned();
        tokio::spawn(async move {
            let intent = match fut.await {
                Ok(value) => Intent::MutationResolved { mutation, token, value, respond_to },
                Err(error) => Intent::MutationFailed {
                    mutation,
                    token,
                    error: Arc::new(error),
                    respond_to,
                },
            };
            let _ = tx.send(intent);
        });
        true
    }

    /// Replaces the forwarded inputs, keeping the current sources.
    ///
    /// Returns the names of the fields due for a refetch.
    pub fn update_inputs(&mut self, inputs: PropMap) -> Vec<String> {
        let sources = self.sources.clone();
        self.update(sources, inputs)
    }

    /// Adopts a new configuration and new inputs.
    ///
    /// A field present before and after is refetched when its fetcher handle
    /// changed or its derived argument is no longer shallow-equal; the refetch
    /// supersedes any fetch still in flight. Fields only present in the new
    /// configuration start missing and are fetched immediately when mounted.
    /// Fields no longer present are dropped together with their data, and any
    /// completion still on its way for them is discarded as stale.
    ///
    /// Returns the names of the fields due for a refetch.
    pub fn update(&mut self, sources: Sources, inputs: PropMap) -> Vec<String> {
        let mut due = Vec::new();
        for name in sources.field_names() {
            match self.state.field_status(name) {
                None => due.push(name.to_owned()),
                Some(_) => {
                    let same_fetcher = match (self.sources.fetcher(name), sources.fetcher(name)) {
                        (Some(previous), Some(current)) => Arc::ptr_eq(previous, current),
                        _ => false,
                    };
                    let previous_args = self.sources.derived_args(name, &self.inputs);
                    let current_args = sources.derived_args(name, &inputs);
                    if needs_reload(!same_fetcher, &previous_args, &current_args) {
                        due.push(name.to_owned());
                    }
                }
            }
        }
        let fields: Vec<String> = sources.field_names().map(str::to_owned).collect();
        let mutations: Vec<String> = sources.mutation_names().map(str::to_owned).collect();
        tracing::debug!(
            fields = fields.len(),
            mutations = mutations.len(),
            due = due.len(),
            "configuration updated"
        );
        self.sources = sources;
        self.inputs = inputs;
        self.state = mem::take(&mut self.state).reshape(
            fields.iter().map(String::as_str),
            mutations.iter().map(String::as_str),
        );
        if self.mounted {
            for name in &due {
                self.dispatch_fetch(name, true);
            }
        }
        due
    }

    /// Stops the conveyor for good: no further dispatches, and completions
    /// still in the queue or in flight are discarded. Pending mutation calls
    /// settle with [`ConveyorError::Discarded`]. Idempotent.
    pub fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        tracing::debug!("conveyor torn down");
        let _ = self.drain();
    }

    /// Waits for the next completion and folds it in.
    ///
    /// Returns `true` when the completion changed observable state, `false`
    /// when it was stale and discarded.
    pub async fn apply_next(&mut self) -> bool {
        match self.intents_rx.recv().await {
            Some(intent) => self.apply(intent),
            // The conveyor holds a sender half, so the channel cannot close.
            None => false,
        }
    }

    /// Folds in every completion already queued without waiting. Returns
    /// `true` when any of them changed observable state.
    pub fn drain(&mut self) -> bool {
        let mut changed = false;
        while let Ok(intent) = self.intents_rx.try_recv() {
            changed |= self.apply(intent);
        }
        changed
    }

    pub(crate) fn apply(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::FetchResolved { field, token, value } => {
                if !self.live(&field, token) {
                    return false;
                }
                tracing::debug!(field = %field, token, "field ready");
                self.state = mem::take(&mut self.state).resolve_field(&field, value);
                self.schedule_refresh(&field, token);
                true
            }
            Intent::FetchFailed { field, token, error } => {
                if !self.live(&field, token) {
                    return false;
                }
                tracing::warn!(field = %field, token, error = %error, "field fetch failed");
                self.state = mem::take(&mut self.state).fail_field(&field, error);
                true
            }
            Intent::MutationResolved { mutation, token, value, respond_to } => {
                if !self.live(&mutation, token) {
                    let _ = respond_to.send(Err(ConveyorError::Discarded));
                    return false;
                }
                let replaced = self.replacement(&mutation, &value);
                tracing::debug!(
                    mutation = %mutation,
                    token,
                    replaced = replaced.len(),
                    "mutation settled"
                );
                self.state = mem::take(&mut self.state).settle_mutation(&mutation, replaced);
                let _ = respond_to.send(Ok(value));
                true
            }
            Intent::MutationFailed { mutation, token, error, respond_to } => {
                if !self.live(&mutation, token) {
                    let _ = respond_to.send(Err(ConveyorError::Discarded));
                    return false;
                }
                tracing::warn!(mutation = %mutation, token, error = %error, "mutation failed");
                self.state = mem::take(&mut self.state).fail_mutation(&mutation, error.clone());
                // The error is in the state before the caller sees it.
                let _ = respond_to.send(Err(ConveyorError::Failed { name: mutation, cause: error }));
                true
            }
            Intent::Refresh { field, token } => {
                if !self.live(&field, token) {
                    return false;
                }
                tracing::trace!(field = %field, token, "refresh due");
                self.dispatch_fetch(&field, false)
            }
        }
    }

    /// A completion is live when the conveyor is still active and no newer
    /// dispatch for the name has been issued since.
    fn live(&self, name: &str, token: u64) -> bool {
        self.active && self.state.is_current(name, token)
    }

    /// A fresh token for the next dispatch. Tokens start at 1; a record reset
    /// to its default token 0 therefore matches no issued token.
    fn issue_token(&mut self) -> u64 {
        self.tokens += 1;
        self.tokens
    }

    /// Dispatches a fetch for `name` under a fresh token. With `force` unset a
    /// fetch already in flight is left alone; with it set the new dispatch
    /// supersedes the running one, whose completion then dies on the token
    /// check.
    fn dispatch_fetch(&mut self, name: &str, force: bool) -> bool {
        if !self.active {
            return false;
        }
        if !force && self.state.field_status(name) == Some(FieldStatus::InFlight) {
            return false;
        }
        let args = self.sources.derived_args(name, &self.inputs);
        let fut = match self.sources.fetcher(name) {
            Some(fetcher) => (fetcher)(args),
            None => return false,
        };
        let token = self.issue_token();
        tracing::debug!(field = %name, token, "fetch dispatched");
        self.state = mem::take(&mut self.state).begin_fetch(name, token);
        let tx = self.intents_tx.clone();
        let field = name.to_owned();
        tokio::spawn(async move {
            let intent = match fut.await {
                Ok(value) => Intent::FetchResolved { field, token, value },
                Err(error) => Intent::FetchFailed { field, token, error: Arc::new(error) },
            };
            let _ = tx.send(intent);
        });
        true
    }

    /// Arms the refresh timer for a field whose fetch under `token` just
    /// resolved. The timer fires an intent carrying the same token, so a
    /// dispatch in between disarms the refresh.
    fn schedule_refresh(&self, field: &str, token: u64) {
        let Some(interval) = self.sources.refresh_interval(field) else {
            return;
        };
        tracing::trace!(field = %field, token, ?interval, "refresh armed");
        let tx = self.intents_tx.clone();
        let field = field.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = tx.send(Intent::Refresh { field, token });
        });
    }

    /// Field data replaced by a settled mutation. Derived replacements are
    /// restricted to configured fields; anything else the derivation returns
    /// is dropped.
    fn replacement(&self, mutation: &str, value: &Value) -> PropMap {
        match self.sources.replace(mutation) {
            None => PropMap::new(),
            Some(Replace::Field(field)) => {
                let mut replaced = PropMap::new();
                replaced.insert(field.clone(), value.clone());
                replaced
            }
            Some(Replace::Derive(derive)) => {
                let mapped = (derive)(value);
                let fields: Vec<&str> = self.sources.field_names().collect();
                pick(&mapped, &fields).into_owned()
            }
        }
    }
}
