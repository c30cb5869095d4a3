use futures_util::future::{join_all, BoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

// ============================================================================
// Actor Group - run together, stop together
// ============================================================================
//
// Every long-running part of a service (public listener, internal listener,
// signal watcher, liveness checker) is registered as an actor: a `run` future
// paired with an `interrupt` function.
//
// Termination protocol:
// 1. All `run` futures are driven concurrently.
// 2. The first one to complete (Ok or Err) is the trigger.
// 3. Every actor's `interrupt` is called exactly once with the trigger's
//    error, including the trigger itself.
// 4. The group waits for every remaining `run` to complete, then returns the
//    trigger's outcome.
//
// An actor whose `run` ignores its interrupt blocks the group forever.
//
// ============================================================================

/// Outcome of an actor that did not exit cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// Operator-requested shutdown. Not a failure.
    #[error("canceled")]
    Canceled,

    #[error("{actor}: {source:#}")]
    Failed {
        actor: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ActorError {
    pub fn failed(actor: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        ActorError::Failed {
            actor: actor.into(),
            source: source.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ActorError::Canceled)
    }
}

type RunFuture = BoxFuture<'static, Result<(), ActorError>>;
type InterruptFn = Box<dyn FnOnce(Option<&ActorError>) -> BoxFuture<'static, ()> + Send>;

/// A named `run` / `interrupt` pair owned by an [`ActorGroup`].
pub struct Actor {
    name: String,
    run: RunFuture,
    interrupt: InterruptFn,
}

impl Actor {
    /// `interrupt` must make `run` complete promptly. It receives the error
    /// that triggered shutdown, or `None` if the trigger exited cleanly.
    pub fn new<R, I, F>(name: impl Into<String>, run: R, interrupt: I) -> Self
    where
        R: Future<Output = Result<(), ActorError>> + Send + 'static,
        I: FnOnce(Option<&ActorError>) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::pin(run),
            interrupt: Box::new(move |reason| Box::pin(interrupt(reason))),
        }
    }
}

/// Registration happens before `run`; since `run` consumes the group, an
/// actor can never be added to a group that has already started.
#[derive(Default)]
pub struct ActorGroup {
    actors: Vec<Actor>,
}

impl ActorGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, actor: Actor) -> &mut Self {
        tracing::debug!(actor = %actor.name, "registered actor");
        self.actors.push(actor);
        self
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Run every actor until the first one returns, then interrupt all of
    /// them and wait for every `run` to finish.
    pub async fn run(self) -> Result<(), ActorError> {
        if self.is_empty() {
            return Ok(());
        }

        let mut interrupts = Vec::with_capacity(self.actors.len());
        let mut running = FuturesUnordered::new();

        for Actor { name, run, interrupt } in self.actors {
            interrupts.push((name.clone(), interrupt));
            running.push(async move { (name, run.await) });
        }

        let Some((trigger, outcome)) = running.next().await else {
            return Ok(());
        };

        match &outcome {
            Ok(()) => tracing::info!(actor = %trigger, "actor exited, stopping group"),
            Err(ActorError::Canceled) => {
                tracing::info!(actor = %trigger, "shutdown requested, stopping group")
            }
            Err(e) => tracing::error!(actor = %trigger, error = %e, "actor failed, stopping group"),
        }

        let reason = outcome.as_ref().err();
        let interrupting = join_all(interrupts.into_iter().map(|(name, interrupt)| {
            tracing::debug!(actor = %name, "interrupting actor");
            interrupt(reason)
        }));

        let draining = async {
            while let Some((name, result)) = running.next().await {
                match result {
                    Ok(()) | Err(ActorError::Canceled) => {
                        tracing::debug!(actor = %name, "actor stopped")
                    }
                    Err(e) => {
                        tracing::warn!(actor = %name, error = %e, "actor failed during shutdown")
                    }
                }
            }
        };

        futures_util::join!(interrupting, draining);

        outcome
    }
}
