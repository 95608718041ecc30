//! Cloneable handle for steering a conveyor driven by a runtime.
//!
//! Handle methods are fire-and-forget sends on an unbounded command channel;
//! the runtime applies them in order between completions. Once the runtime is
//! gone the sends quietly fail, which matches the one-way teardown contract:
//! there is nothing left to steer.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::config::Sources;
use crate::conveyor::ConveyorError;
use crate::intent::MutationReply;
use crate::props::PropMap;

#[derive(Debug)]
pub(crate) enum Command {
    Reload { field: Option<String> },
    Mutate {
        mutation: String,
        args: Vec<Value>,
        respond_to: MutationReply,
    },
    SetInputs { inputs: PropMap },
    Update { sources: Sources, inputs: PropMap },
    Teardown,
}

/// Remote control for a running [`Runtime`](crate::Runtime).
#[derive(Debug, Clone)]
pub struct ConveyorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ConveyorHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    /// Refetches one field, or all fields when `field` is `None`.
    pub fn reload(&self, field: Option<&str>) {
        let _ = self.commands.send(Command::Reload {
            field: field.map(str::to_owned),
        });
    }

    /// Invokes a mutation and returns the call to await its outcome.
    pub fn mutate(&self, mutation: &str, args: Vec<Value>) -> MutationCall {
        let (respond_to, outcome) = oneshot::channel();
        let _ = self.commands.send(Command::Mutate {
            mutation: mutation.to_owned(),
            args,
            respond_to,
        });
        MutationCall::new(outcome)
    }

    /// Replaces the forwarded inputs, triggering reloads for fields whose
    /// derived arguments change.
    pub fn set_inputs(&self, inputs: PropMap) {
        let _ = self.commands.send(Command::SetInputs { inputs });
    }

    /// Replaces the whole configuration together with the inputs.
    pub fn update(&self, sources: Sources, inputs: PropMap) {
        let _ = self.commands.send(Command::Update { sources, inputs });
    }

    /// Tears the conveyor down and stops its runtime.
    pub fn teardown(&self) {
        let _ = self.commands.send(Command::Teardown);
    }
}

/// A pending mutation invocation.
///
/// Settles once the mutation's outcome has been folded into the conveyor. If
/// the invocation is superseded by teardown, or the runtime disappears before
/// the outcome is delivered, the call settles with
/// [`ConveyorError::Discarded`].
#[derive(Debug)]
pub struct MutationCall {
    outcome: oneshot::Receiver<Result<Value, ConveyorError>>,
}

impl MutationCall {
    pub(crate) fn new(outcome: oneshot::Receiver<Result<Value, ConveyorError>>) -> Self {
        Self { outcome }
    }

    /// Waits for the mutation to settle and returns its resolved value.
    ///
    /// # Errors
    ///
    /// Whatever the conveyor rejected the invocation with, the stored failure
    /// as [`ConveyorError::Failed`] when the mutation ran and failed, or
    /// [`ConveyorError::Discarded`] when no outcome will ever arrive.
    pub async fn outcome(self) -> Result<Value, ConveyorError> {
        self.outcome.await.unwrap_or(Err(ConveyorError::Discarded))
    }
}
