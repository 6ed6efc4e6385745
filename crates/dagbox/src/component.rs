//! Generic runner for long-lived bus components.

use std::fmt::Display;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, warn};

const COMPONENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::component");

/// One step of a long-running component.
///
/// Implementations block at most for their configured receive timeout, so
/// the surrounding loop can observe the stop flag promptly.
pub trait RunLoop: Send + 'static {
    /// Error that ends the component's loop.
    type Error: Display;

    /// Performs one step: typically a bounded receive plus whatever
    /// processing it triggers.
    ///
    /// # Errors
    ///
    /// Returning an error stops the component; recoverable conditions
    /// should be handled (and logged) inside the step instead.
    fn run_once(&mut self) -> Result<(), Self::Error>;
}

/// Owner of a component thread.
///
/// The thread repeatedly invokes the component's `run_once` until the
/// handle is dropped, which clears the run flag and joins the thread. The
/// handle is the component's only owner; once spawned, the component
/// cannot be moved out again.
pub struct Component {
    name: String,
    run: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Component {
    /// Spawns the component on its own named thread.
    ///
    /// # Errors
    ///
    /// Fails when the operating system refuses to spawn the thread.
    pub fn spawn<L: RunLoop>(name: impl Into<String>, mut component: L) -> Result<Self, ComponentError> {
        let name = name.into();
        let run = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&run);
        let loop_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(target: COMPONENT_TARGET, component = %loop_name, "component started");
                while flag.load(Ordering::SeqCst) {
                    if let Err(step_error) = component.run_once() {
                        error!(
                            target: COMPONENT_TARGET,
                            component = %loop_name,
                            error = %step_error,
                            "component stopped after error"
                        );
                        return;
                    }
                }
                debug!(target: COMPONENT_TARGET, component = %loop_name, "component stopped");
            })
            .map_err(|source| ComponentError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            run,
            handle: Some(handle),
        })
    }

    /// The name this component's thread was spawned with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(
                    target: COMPONENT_TARGET,
                    component = %self.name,
                    "component thread panicked during drop"
                );
            }
        }
    }
}

/// Errors surfaced while spawning a component.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The component thread could not be spawned.
    #[error("failed to spawn component thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
