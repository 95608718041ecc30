//! Deliver named asynchronous reads and writes to a render callback.
//!
//! A [`Conveyor`] tracks a set of named *fields* (asynchronous reads) and
//! *mutations* (asynchronous writes) declared as [`Sources`], against a map
//! of forwarded inputs. Every dispatch carries a fresh token; a completion
//! whose token has been superseded by a newer dispatch for the same name is
//! discarded without a trace, so the later dispatch wins regardless of the
//! order in which results arrive.
//!
//! A [`Runtime`] drives the conveyor: it serialises completions and commands
//! from cloneable [`ConveyorHandle`]s and calls a render callback with a
//! [`RenderProps`] snapshot after every observable change. The snapshot
//! aggregates which fields are still missing, what is in flight, which
//! operations failed, and merges fetched data over the forwarded inputs.
//!
//! # Example
//!
//! ```no_run
//! use conveyor::{Runtime, Sources};
//! use serde_json::{json, Map};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let sources = Sources::builder()
//!     .field("profile", |args| async move {
//!         Ok(json!({ "id": args, "name": "Ada" }))
//!     })
//!     .map_args("profile", |inputs| inputs["userId"].clone())
//!     .mutation("rename", |args| async move { Ok(args[0].clone()) })
//!     .replace_on_mutation("rename", "profile")
//!     .build()?;
//!
//! let mut inputs = Map::new();
//! inputs.insert("userId".to_owned(), json!(7));
//!
//! let (runtime, handle) = Runtime::new(sources, inputs);
//! runtime.spawn(|view, conveyor| {
//!     if let Some(errors) = view.errors() {
//!         eprintln!("failed: {errors:?}");
//!         conveyor.teardown();
//!     } else if let Some(profile) = view.get("profile") {
//!         println!("profile: {profile}");
//!     }
//! });
//!
//! let renamed = handle
//!     .mutate("rename", vec![json!({ "id": 7, "name": "Grace" })])
//!     .outcome()
//!     .await?;
//! println!("renamed to {renamed}");
//! # Ok(())
//! # }
//! ```

mod config;
mod conveyor;
mod handle;
mod intent;
mod output;
mod preset;
mod props;
mod runtime;
mod state;

pub use config::{BoxFuture, ConfigError, Sources, SourcesBuilder};
pub use conveyor::{Conveyor, ConveyorError};
pub use handle::{ConveyorHandle, MutationCall};
pub use output::RenderProps;
pub use preset::Preset;
pub use props::{omit, pick, shallow_equal, PropMap};
pub use runtime::Runtime;
pub use state::{Failure, FieldStatus, MutationStatus};
