//! Driver loop for a conveyor: folds in completions and handle commands in
//! arrival order and invokes the render callback after every observable
//! change.

use tokio::sync::mpsc;

use crate::config::Sources;
use crate::conveyor::Conveyor;
use crate::handle::{Command, ConveyorHandle};
use crate::output::RenderProps;
use crate::props::PropMap;

/// Owns a conveyor and serialises everything that may change it.
pub struct Runtime {
    conveyor: Conveyor,
    commands: mpsc::UnboundedReceiver<Command>,
    handle: ConveyorHandle,
}

impl Runtime {
    pub fn new(sources: Sources, inputs: PropMap) -> (Self, ConveyorHandle) {
        Self::with_conveyor(Conveyor::new(sources, inputs))
    }

    /// Wraps a conveyor built elsewhere, e.g. by a [`Preset`](crate::Preset).
    pub fn with_conveyor(conveyor: Conveyor) -> (Self, ConveyorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConveyorHandle::new(tx);
        let runtime = Self {
            conveyor,
            commands: rx,
            handle: handle.clone(),
        };
        (runtime, handle)
    }

    /// Another handle to the same runtime.
    pub fn handle(&self) -> ConveyorHandle {
        self.handle.clone()
    }

    /// Drives the conveyor until teardown.
    ///
    /// `render` sees the initial snapshot with every field missing, then the
    /// post-mount snapshot, then one snapshot per applied change. Discarded
    /// stale completions cause no render.
    pub async fn run<F>(mut self, mut render: F)
    where
        F: FnMut(&RenderProps, &ConveyorHandle),
    {
        render(&self.conveyor.snapshot(), &self.handle);
        if self.conveyor.mount() {
            render(&self.conveyor.snapshot(), &self.handle);
        }
        loop {
            enum Step {
                Completion(bool),
                Command(Option<Command>),
            }
            // Resolve the race first, then touch the conveyor: the command
            // arm needs exclusive access the select arms cannot share.
            let step = tokio::select! {
                changed = self.conveyor.apply_next() => Step::Completion(changed),
                command = self.commands.recv() => Step::Command(command),
            };
            let render_due = match step {
                Step::Completion(changed) => changed,
                Step::Command(Some(command)) => self.on_command(command),
                // The runtime holds its own handle for the render callback,
                // so the command channel cannot close while the loop runs.
                Step::Command(None) => false,
            };
            if render_due {
                render(&self.conveyor.snapshot(), &self.handle);
            }
            if !self.conveyor.is_active() {
                break;
            }
        }
        tracing::debug!("runtime stopped");
    }

    /// Spawns the loop on the current tokio runtime.
    pub fn spawn<F>(self, render: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(&RenderProps, &ConveyorHandle) + Send + 'static,
    {
        tokio::spawn(self.run(render))
    }

    /// Applies one command. Returns `true` when a render is due.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Reload { field } => match self.conveyor.reload(field.as_deref()) {
                Ok(dispatched) => dispatched,
                Err(error) => {
                    tracing::warn!(error = %error, "reload rejected");
                    false
                }
            },
            Command::Mutate { mutation, args, respond_to } => {
                self.conveyor.mutate_with(&mutation, args, respond_to)
            }
            // Inputs are part of the render props, so an input or
            // configuration change always renders.
            Command::SetInputs { inputs } => {
                self.conveyor.update_inputs(inputs);
                true
            }
            Command::Update { sources, inputs } => {
                self.conveyor.update(sources, inputs);
                true
            }
            Command::Teardown => {
                self.conveyor.teardown();
                false
            }
        }
    }
}
