use std::fmt::{Debug, Display};
use std::hash::Hash;

use futures::future::BoxFuture;

use pipewright_core::error::Result;
use pipewright_core::state::RunState;

/// Identifier type for the nodes of one graph.
///
/// Each graph picks its own closed set of identifiers (typically an enum), so
/// routing functions can only name nodes that exist in that vocabulary.
pub trait NodeKey: Copy + Eq + Hash + Display + Debug + Send + Sync + 'static {}

impl<T> NodeKey for T where T: Copy + Eq + Hash + Display + Debug + Send + Sync + 'static {}

/// A unit of work run by the executor.
///
/// Side effects are limited to the run state it receives.
pub trait Task: Send + Sync + 'static {
    fn run<'a>(&'a self, state: &'a mut RunState) -> BoxFuture<'a, Result<()>>;
}

/// A task backed by a synchronous closure.
pub struct FnTask<F> {
    f: F,
}

/// Wrap a closure as a [`Task`].
pub fn task_fn<F>(f: F) -> FnTask<F>
where
    F: Fn(&mut RunState) -> Result<()> + Send + Sync + 'static,
{
    FnTask { f }
}

impl<F> Task for FnTask<F>
where
    F: Fn(&mut RunState) -> Result<()> + Send + Sync + 'static,
{
    fn run<'a>(&'a self, state: &'a mut RunState) -> BoxFuture<'a, Result<()>> {
        let result = (self.f)(state);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_core::error::PipewrightError;

    #[tokio::test]
    async fn test_fn_task_mutates_state() {
        let task = task_fn(|state: &mut RunState| {
            state.add_document("UML_class", "classDiagram");
            Ok(())
        });
        let mut state = RunState::new();
        task.run(&mut state).await.unwrap();
        assert_eq!(state.text("UML_class").unwrap(), "classDiagram");
    }

    #[tokio::test]
    async fn test_fn_task_propagates_error() {
        let task = task_fn(|state: &mut RunState| state.last_message().map(|_| ()));
        let mut state = RunState::new();
        let err = task.run(&mut state).await.unwrap_err();
        assert!(matches!(err, PipewrightError::MissingState(_)));
    }
}
