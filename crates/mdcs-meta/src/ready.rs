//! Memoized one-shot initialization.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;

enum State<E> {
    Uninitialized,
    Initializing(Shared<BoxFuture<'static, Result<(), E>>>),
    Ready,
    Failed(E),
}

/// Runs an initializer at most once.
///
/// Concurrent callers all await the same in-flight attempt, and its outcome
/// (success or the error) is cached and handed to every later caller.
pub struct ReadyOnce<E> {
    state: Mutex<State<E>>,
}

impl<E> Default for ReadyOnce<E> {
    fn default() -> Self {
        ReadyOnce {
            state: Mutex::new(State::Uninitialized),
        }
    }
}

impl<E> ReadyOnce<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), State::Ready)
    }

    /// The cached failure, if initialization failed.
    pub fn failure(&self) -> Option<E> {
        match &*self.state.lock() {
            State::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Await initialization, starting it with `init` if nobody has yet.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let attempt = {
            let mut state = self.state.lock();
            let in_flight = match &*state {
                State::Ready => return Ok(()),
                State::Failed(e) => return Err(e.clone()),
                State::Initializing(attempt) => Some(attempt.clone()),
                State::Uninitialized => None,
            };
            match in_flight {
                Some(attempt) => attempt,
                None => {
                    let attempt = init().boxed().shared();
                    *state = State::Initializing(attempt.clone());
                    attempt
                }
            }
        };

        let outcome = attempt.await;

        let mut state = self.state.lock();
        if matches!(*state, State::Initializing(_)) {
            *state = match &outcome {
                Ok(()) => State::Ready,
                Err(e) => State::Failed(e.clone()),
            };
        }
        outcome
    }
}

impl<E> std::fmt::Debug for ReadyOnce<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            State::Uninitialized => "uninitialized",
            State::Initializing(_) => "initializing",
            State::Ready => "ready",
            State::Failed(_) => "failed",
        };
        f.debug_struct("ReadyOnce").field("state", &state).finish()
    }
}
