//! Per-name tracking state for fields and mutations.
//!
//! Every transition consumes the current state and returns the next one, so
//! the conveyor can swap states atomically with `mem::take`. Transitions for
//! names without a record are silent no-ops; the conveyor only dispatches work
//! for configured names, so a missing record means the name was dropped by a
//! configuration update and the completion is stale.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::props::PropMap;

/// Stored operation failure. `Arc` so snapshots can share it without cloning
/// the underlying error chain.
pub type Failure = Arc<anyhow::Error>;

/// Lifecycle of a single field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldStatus {
    /// Never fetched (or freshly added by a configuration update).
    #[default]
    Missing,
    /// A fetch has been dispatched and has not settled yet.
    InFlight,
    /// The most recent fetch resolved; data is available.
    Ready,
    /// The most recent fetch failed; the error is stored.
    Failed,
}

/// Lifecycle of a single mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MutationStatus {
    #[default]
    Idle,
    InFlight,
    Failed,
}

#[derive(Debug, Clone, Default)]
struct FieldRecord {
    status: FieldStatus,
    data: Option<Value>,
    error: Option<Failure>,
    /// Token of the most recently dispatched fetch for this field.
    token: u64,
}

#[derive(Debug, Clone, Default)]
struct MutationRecord {
    status: MutationStatus,
    error: Option<Failure>,
    token: u64,
}

/// The full tracking state of one conveyor.
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    fields: BTreeMap<String, FieldRecord>,
    mutations: BTreeMap<String, MutationRecord>,
}

impl TrackerState {
    /// Builds the initial state: every field missing, every mutation idle.
    pub fn initialize<'a>(
        fields: impl IntoIterator<Item = &'a str>,
        mutations: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|name| (name.to_owned(), FieldRecord::default()))
                .collect(),
            mutations: mutations
                .into_iter()
                .map(|name| (name.to_owned(), MutationRecord::default()))
                .collect(),
        }
    }

    // -- Queries -------------------------------------------------------------

    pub fn field_status(&self, name: &str) -> Option<FieldStatus> {
        self.fields.get(name).map(|record| record.status)
    }

    pub fn mutation_status(&self, name: &str) -> Option<MutationStatus> {
        self.mutations.get(name).map(|record| record.status)
    }

    /// Data of the most recent successful fetch, if any. Stays available while
    /// a reload is in flight and is cleared by a failure.
    pub fn data(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).and_then(|record| record.data.as_ref())
    }

    /// Stored failure for a field or a mutation. Field and mutation names
    /// never overlap, so the lookup order does not matter.
    pub fn error(&self, name: &str) -> Option<&Failure> {
        self.fields
            .get(name)
            .and_then(|record| record.error.as_ref())
            .or_else(|| self.mutations.get(name).and_then(|record| record.error.as_ref()))
    }

    /// Whether `token` identifies the most recently dispatched operation for
    /// `name`. Completions carrying an older token must be discarded.
    pub(crate) fn is_current(&self, name: &str, token: u64) -> bool {
        self.fields
            .get(name)
            .map(|record| record.token)
            .or_else(|| self.mutations.get(name).map(|record| record.token))
            == Some(token)
    }

    // -- Field transitions ---------------------------------------------------

    /// Marks a field in flight under a fresh token. Previous data is kept so
    /// consumers can keep showing it while the reload runs; a previous error
    /// is cleared.
    pub(crate) fn begin_fetch(mut self, name: &str, token: u64) -> Self {
        if let Some(record) = self.fields.get_mut(name) {
            record.status = FieldStatus::InFlight;
            record.error = None;
            record.token = token;
        }
        self
    }

    pub(crate) fn resolve_field(mut self, name: &str, value: Value) -> Self {
        if let Some(record) = self.fields.get_mut(name) {
            record.status = FieldStatus::Ready;
            record.data = Some(value);
            record.error = None;
        }
        self
    }

    /// Records a fetch failure. Stale data from an earlier success is dropped
    /// rather than shown next to the error.
    pub(crate) fn fail_field(mut self, name: &str, error: Failure) -> Self {
        if let Some(record) = self.fields.get_mut(name) {
            record.status = FieldStatus::Failed;
            record.data = None;
            record.error = Some(error);
        }
        self
    }

    // -- Mutation transitions ------------------------------------------------

    pub(crate) fn begin_mutation(mut self, name: &str, token: u64) -> Self {
        if let Some(record) = self.mutations.get_mut(name) {
            record.status = MutationStatus::InFlight;
            record.error = None;
            record.token = token;
        }
        self
    }

    /// Settles a successful mutation and applies its field replacements in the
    /// same transition, so no intermediate state (settled but not yet
    /// replaced, or the reverse) is ever observable.
    pub(crate) fn settle_mutation(mut self, name: &str, replaced: PropMap) -> Self {
        if let Some(record) = self.mutations.get_mut(name) {
            record.status = MutationStatus::Idle;
            record.error = None;
        }
        for (field, value) in replaced {
            if let Some(record) = self.fields.get_mut(&field) {
                record.status = FieldStatus::Ready;
                record.data = Some(value);
                record.error = None;
            }
        }
        self
    }

    pub(crate) fn fail_mutation(mut self, name: &str, error: Failure) -> Self {
        if let Some(record) = self.mutations.get_mut(name) {
            record.status = MutationStatus::Failed;
            record.error = Some(error);
        }
        self
    }

    // -- Shape changes -------------------------------------------------------

    /// Conforms the record sets to new name sets after a configuration update.
    /// Surviving records keep their data, errors and tokens; new names start
    /// from the defaults; removed names are dropped, which retires their
    /// tokens and strands any still-running work.
    pub(crate) fn reshape<'a>(
        mut self,
        fields: impl IntoIterator<Item = &'a str>,
        mutations: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut next_fields = BTreeMap::new();
        for name in fields {
            let record = self.fields.remove(name).unwrap_or_default();
            next_fields.insert(name.to_owned(), record);
        }
        let mut next_mutations = BTreeMap::new();
        for name in mutations {
            let record = self.mutations.remove(name).unwrap_or_default();
            next_mutations.insert(name.to_owned(), record);
        }
        Self {
            fields: next_fields,
            mutations: next_mutations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failure(message: &str) -> Failure {
        Arc::new(anyhow::anyhow!("{message}"))
    }

    #[test]
    fn initialize_starts_missing_and_idle() {
        let state = TrackerState::initialize(["foo", "bar"], ["save"]);
        assert_eq!(state.field_status("foo"), Some(FieldStatus::Missing));
        assert_eq!(state.field_status("bar"), Some(FieldStatus::Missing));
        assert_eq!(state.mutation_status("save"), Some(MutationStatus::Idle));
        assert_eq!(state.field_status("save"), None);
        assert_eq!(state.data("foo"), None);
        assert!(state.error("foo").is_none());
    }

    #[test]
    fn fetch_resolution_stores_data() {
        let state = TrackerState::initialize(["foo"], [])
            .begin_fetch("foo", 1)
            .resolve_field("foo", json!(41));
        assert_eq!(state.field_status("foo"), Some(FieldStatus::Ready));
        assert_eq!(state.data("foo"), Some(&json!(41)));
        assert!(state.is_current("foo", 1));
    }

    #[test]
    fn fetch_failure_clears_data_and_stores_error() {
        let state = TrackerState::initialize(["foo"], [])
            .begin_fetch("foo", 1)
            .resolve_field("foo", json!(41))
            .begin_fetch("foo", 2)
            .fail_field("foo", failure("boom"));
        assert_eq!(state.field_status("foo"), Some(FieldStatus::Failed));
        assert_eq!(state.data("foo"), None);
        assert_eq!(state.error("foo").map(|e| e.to_string()), Some("boom".to_owned()));
    }

    #[test]
    fn reload_keeps_data_and_clears_error() {
        let state = TrackerState::initialize(["foo"], [])
            .begin_fetch("foo", 1)
            .resolve_field("foo", json!("kept"))
            .begin_fetch("foo", 2);
        assert_eq!(state.field_status("foo"), Some(FieldStatus::InFlight));
        assert_eq!(state.data("foo"), Some(&json!("kept")));
        assert!(state.error("foo").is_none());
        assert!(!state.is_current("foo", 1));
        assert!(state.is_current("foo", 2));
    }

    #[test]
    fn settle_mutation_resets_and_replaces_in_one_step() {
        let state = TrackerState::initialize(["foo", "bar"], ["save"])
            .begin_mutation("save", 1)
            .settle_mutation("save", [("foo".to_owned(), json!(2))].into_iter().collect());
        assert_eq!(state.mutation_status("save"), Some(MutationStatus::Idle));
        assert_eq!(state.field_status("foo"), Some(FieldStatus::Ready));
        assert_eq!(state.data("foo"), Some(&json!(2)));
        assert_eq!(state.field_status("bar"), Some(FieldStatus::Missing));
    }

    #[test]
    fn settle_mutation_ignores_unconfigured_replacement_targets() {
        let state = TrackerState::initialize(["foo"], ["save"])
            .begin_mutation("save", 1)
            .settle_mutation("save", [("ghost".to_owned(), json!(1))].into_iter().collect());
        assert_eq!(state.data("ghost"), None);
        assert_eq!(state.mutation_status("save"), Some(MutationStatus::Idle));
    }

    #[test]
    fn failed_mutation_keeps_error_until_next_begin() {
        let state = TrackerState::initialize([], ["save"])
            .begin_mutation("save", 1)
            .fail_mutation("save", failure("rejected"));
        assert_eq!(state.mutation_status("save"), Some(MutationStatus::Failed));
        assert!(state.error("save").is_some());

        let state = state.begin_mutation("save", 2);
        assert_eq!(state.mutation_status("save"), Some(MutationStatus::InFlight));
        assert!(state.error("save").is_none());
    }

    #[test]
    fn reshape_keeps_survivors_and_drops_the_rest() {
        let state = TrackerState::initialize(["foo", "bar"], [])
            .begin_fetch("bar", 1)
            .resolve_field("bar", json!("kept"))
            .reshape(["bar", "baz"], []);
        assert_eq!(state.field_status("foo"), None);
        assert_eq!(state.data("bar"), Some(&json!("kept")));
        assert_eq!(state.field_status("baz"), Some(FieldStatus::Missing));
        // The dropped field's token is gone, so its completions are stale.
        assert!(!state.is_current("foo", 1));
        assert!(state.is_current("bar", 1));
    }

    #[test]
    fn transitions_for_unknown_names_are_no_ops() {
        let before = TrackerState::initialize(["foo"], []);
        let after = before.clone().resolve_field("ghost", json!(1));
        assert_eq!(after.field_status("ghost"), None);
        assert_eq!(after.field_status("foo"), Some(FieldStatus::Missing));
    }
}
