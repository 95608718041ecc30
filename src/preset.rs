//! Reusable configurations: validate once, stamp out conveyors on demand.

use crate::config::{ConfigError, Sources};
use crate::conveyor::Conveyor;
use crate::handle::ConveyorHandle;
use crate::output::RenderProps;
use crate::props::PropMap;
use crate::runtime::Runtime;

/// A validated configuration ready to produce any number of independent
/// conveyors over the same sources.
#[derive(Debug, Clone)]
pub struct Preset {
    sources: Sources,
}

impl Preset {
    /// # Errors
    ///
    /// [`ConfigError::NoFields`] when the configuration has no fields; a
    /// conveyor without fields would never deliver anything.
    pub fn new(sources: Sources) -> Result<Self, ConfigError> {
        if sources.field_names().next().is_none() {
            return Err(ConfigError::NoFields);
        }
        Ok(Self { sources })
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    /// A fresh conveyor over these sources.
    pub fn conveyor(&self, inputs: PropMap) -> Conveyor {
        Conveyor::new(self.sources.clone(), inputs)
    }

    /// A fresh, not yet running runtime over these sources.
    pub fn runtime(&self, inputs: PropMap) -> (Runtime, ConveyorHandle) {
        Runtime::new(self.sources.clone(), inputs)
    }

    /// Spawns a running conveyor and returns its handle and task.
    pub fn launch<F>(
        &self,
        inputs: PropMap,
        render: F,
    ) -> (ConveyorHandle, tokio::task::JoinHandle<()>)
    where
        F: FnMut(&RenderProps, &ConveyorHandle) + Send + 'static,
    {
        let (runtime, handle) = self.runtime(inputs);
        (handle, runtime.spawn(render))
    }
}
