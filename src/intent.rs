//! Completion events applied to a conveyor.
//!
//! Every spawned operation reports back as an intent carrying the token it was
//! dispatched under. The conveyor compares that token against the current one
//! for the name and discards anything superseded.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::conveyor::ConveyorError;
use crate::state::Failure;

/// Channel half a mutation caller is waiting on.
pub(crate) type MutationReply = oneshot::Sender<Result<Value, ConveyorError>>;

#[derive(Debug)]
pub(crate) enum Intent {
    FetchResolved {
        field: String,
        token: u64,
        value: Value,
    },
    FetchFailed {
        field: String,
        token: u64,
        error: Failure,
    },
    MutationResolved {
        mutation: String,
        token: u64,
        value: Value,
        respond_to: MutationReply,
    },
    MutationFailed {
        mutation: String,
        token: u64,
        error: Failure,
        respond_to: MutationReply,
    },
    /// Fired by the refresh timer armed when the fetch under `token` resolved.
    Refresh { field: String, token: u64 },
}
