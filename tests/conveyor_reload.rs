//! Input and configuration updates: derived arguments and fetcher identity
//! decide what gets refetched.

mod common;

use common::{inputs, names, Controlled};
use conveyor::{Conveyor, Sources};
use serde_json::json;

#[tokio::test]
async fn input_change_reloads_only_affected_fields() {
    let foo = Controlled::new();
    let bar = Controlled::new();
    let sources = Sources::builder()
        .field("foo", foo.fetcher())
        .map_args("foo", |inputs| inputs["fooInput"].clone())
        .field("bar", bar.fetcher())
        .map_args("bar", |inputs| inputs["barInput"].clone())
        .build()
        .unwrap();
    let mut conveyor = Conveyor::new(
        sources,
        inputs(&[("fooInput", json!(1)), ("barInput", json!(2))]),
    );
    conveyor.mount();

    let due = conveyor.update_inputs(inputs(&[("fooInput", json!(1)), ("barInput", json!(3))]));
    assert_eq!(due, ["bar"]);
    assert_eq!(foo.call_count(), 1);
    assert_eq!(bar.call_count(), 2);
    assert_eq!(bar.args(1), json!(3));
}

#[tokio::test]
async fn unmapped_input_noise_does_not_reload_mapped_fields() {
    let mapped = Controlled::new();
    let plain = Controlled::new();
    let sources = Sources::builder()
        .field("mapped", mapped.fetcher())
        .map_args("mapped", |inputs| inputs["id"].clone())
        .field("plain", plain.fetcher())
        .build()
        .unwrap();
    let mut conveyor = Conveyor::new(sources, inputs(&[("id", json!(7))]));
    conveyor.mount();

    // The mapped field sees the same derived argument; the unmapped field
    // receives the whole input object, which did change.
    let due = conveyor.update_inputs(inputs(&[("id", json!(7)), ("noise", json!(true))]));
    assert_eq!(due, ["plain"]);
    assert_eq!(mapped.call_count(), 1);
    assert_eq!(plain.call_count(), 2);

    // Equal inputs rebuilt from scratch reload nothing.
    let due = conveyor.update_inputs(inputs(&[("id", json!(7)), ("noise", json!(true))]));
    assert!(due.is_empty());
    assert_eq!(plain.call_count(), 2);
}

#[tokio::test]
async fn replacing_a_mapper_reloads_only_on_changed_output() {
    let field = Controlled::new();
    let sources = Sources::builder()
        .field("data", field.fetcher())
        .map_args("data", |inputs| inputs["id"].clone())
        .build()
        .unwrap();
    let mut conveyor = Conveyor::new(sources.clone(), inputs(&[("id", json!(7))]));
    conveyor.mount();

    // A brand-new mapper closure with the same output: mapper identity does
    // not matter, only the derived argument does.
    let same_output = sources
        .to_builder()
        .map_args("data", |inputs| inputs["id"].clone())
        .build()
        .unwrap();
    let due = conveyor.update(same_output, inputs(&[("id", json!(7))]));
    assert!(due.is_empty());
    assert_eq!(field.call_count(), 1);

    // A mapper with a different output reloads.
    let different_output = sources
        .to_builder()
        .map_args("data", |inputs| json!({ "id": inputs["id"], "verbose": true }))
        .build()
        .unwrap();
    let due = conveyor.update(different_output, inputs(&[("id", json!(7))]));
    assert_eq!(due, ["data"]);
    assert_eq!(field.call_count(), 2);
    assert_eq!(field.args(1), json!({"id": 7, "verbose": true}));
}

#[tokio::test]
async fn swapped_fetcher_forces_a_reload_and_supersedes_the_old_fetch() {
    let original = Controlled::new();
    let replacement = Controlled::new();
    let sources = Sources::builder().field("data", original.fetcher()).build().unwrap();
    let mut conveyor = Conveyor::new(sources.clone(), inputs(&[]));
    conveyor.mount();
    assert_eq!(original.call_count(), 1);

    let swapped = sources
        .to_builder()
        .field("data", replacement.fetcher())
        .build()
        .unwrap();
    let due = conveyor.update(swapped, inputs(&[]));
    assert_eq!(due, ["data"]);
    assert_eq!(replacement.call_count(), 1);
    assert_eq!(original.call_count(), 1);

    // The old fetch resolves after the swap and is discarded.
    original.resolve(0, json!("stale"));
    assert!(!conveyor.apply_next().await);
    assert_eq!(conveyor.snapshot().get("data"), None);

    replacement.resolve(0, json!("fresh"));
    assert!(conveyor.apply_next().await);
    assert_eq!(conveyor.snapshot().get("data"), Some(&json!("fresh")));
}

#[tokio::test]
async fn added_field_starts_missing_and_is_fetched_once_mounted() {
    let foo = Controlled::new();
    let baz = Controlled::new();
    let sources = Sources::builder().field("foo", foo.fetcher()).build().unwrap();
    let grown = sources
        .to_builder()
        .field("baz", baz.fetcher())
        .build()
        .unwrap();

    // Before mount an update only reshapes; mount picks the new field up.
    let mut conveyor = Conveyor::new(sources, inputs(&[]));
    let due = conveyor.update(grown, inputs(&[]));
    assert_eq!(due, ["baz"]);
    assert_eq!(baz.call_count(), 0);
    assert_eq!(names(conveyor.snapshot().missing()), ["foo", "baz"]);
    conveyor.mount();
    assert_eq!(foo.call_count(), 1);
    assert_eq!(baz.call_count(), 1);

    // On a mounted conveyor the added field is fetched right away.
    let foo2 = Controlled::new();
    let baz2 = Controlled::new();
    let sources2 = Sources::builder().field("foo", foo2.fetcher()).build().unwrap();
    let grown2 = sources2
        .to_builder()
        .field("baz", baz2.fetcher())
        .build()
        .unwrap();
    let mut conveyor = Conveyor::new(sources2, inputs(&[]));
    conveyor.mount();
    let due = conveyor.update(grown2, inputs(&[]));
    assert_eq!(due, ["baz"]);
    assert_eq!(baz2.call_count(), 1);
    assert_eq!(foo2.call_count(), 1);
}
