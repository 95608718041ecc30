//! The render-ready view of a conveyor: aggregate status lists, collected
//! errors, and the forwarded inputs merged with available field data.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::Sources;
use crate::props::{omit, PropMap};
use crate::state::{Failure, FieldStatus, MutationStatus, TrackerState};

/// One snapshot handed to the render callback.
///
/// The aggregate accessors return `None` rather than an empty collection when
/// nothing qualifies, so `if let` reads naturally at the call site.
#[derive(Debug, Clone)]
pub struct RenderProps {
    missing: Option<Vec<String>>,
    in_flight: Option<Vec<String>>,
    errors: Option<BTreeMap<String, Failure>>,
    props: PropMap,
}

impl RenderProps {
    pub(crate) fn assemble(sources: &Sources, state: &TrackerState, inputs: &PropMap) -> Self {
        let mut missing = Vec::new();
        let mut in_flight = Vec::new();
        let mut errors = BTreeMap::new();
        let mut data = PropMap::new();
        for name in sources.field_names() {
            match state.field_status(name) {
                Some(FieldStatus::Missing) => missing.push(name.to_owned()),
                Some(FieldStatus::InFlight) => in_flight.push(name.to_owned()),
                Some(FieldStatus::Failed) => {
                    if let Some(error) = state.error(name) {
                        errors.insert(name.to_owned(), error.clone());
                    }
                }
                Some(FieldStatus::Ready) | None => {}
            }
            // Data survives an in-flight reload, so it is exposed regardless
            // of the current status.
            if let Some(value) = state.data(name) {
                data.insert(name.to_owned(), value.clone());
            }
        }
        for name in sources.mutation_names() {
            match state.mutation_status(name) {
                Some(MutationStatus::InFlight) => in_flight.push(name.to_owned()),
                Some(MutationStatus::Failed) => {
                    if let Some(error) = state.error(name) {
                        errors.insert(name.to_owned(), error.clone());
                    }
                }
                Some(MutationStatus::Idle) | None => {}
            }
        }
        let shadowed: Vec<&str> = data.keys().map(String::as_str).collect();
        let mut props = omit(inputs, &shadowed).into_owned();
        props.extend(data);
        Self {
            missing: none_if_empty(missing),
            in_flight: none_if_empty(in_flight),
            errors: (!errors.is_empty()).then_some(errors),
            props,
        }
    }

    /// Fields never fetched, in registration order. `None` when every field
    /// has been dispatched at least once.
    pub fn missing(&self) -> Option<&[String]> {
        self.missing.as_deref()
    }

    /// Fields and mutations currently in flight: fields first in registration
    /// order, then mutations. `None` when nothing is running.
    pub fn in_flight(&self) -> Option<&[String]> {
        self.in_flight.as_deref()
    }

    /// Stored failures by field or mutation name. `None` when nothing failed.
    pub fn errors(&self) -> Option<&BTreeMap<String, Failure>> {
        self.errors.as_ref()
    }

    /// Forwarded inputs merged with available field data. A field with data
    /// shadows a forwarded input of the same name.
    pub fn props(&self) -> &PropMap {
        &self.props
    }

    /// Shorthand for a single entry of [`props`](Self::props).
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }
}

fn none_if_empty(list: Vec<String>) -> Option<Vec<String>> {
    (!list.is_empty()).then_some(list)
}
