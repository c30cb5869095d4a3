use super::{Actor, ActorError};
use std::future::Future;
use std::io;
use tokio_util::sync::CancellationToken;

/// Actor that completes when the process receives SIGINT or SIGTERM.
///
/// A caught signal is reported as [`ActorError::Canceled`] so the group's
/// outcome maps to a clean exit.
pub fn signal_actor() -> Actor {
    shutdown_actor("signal", wait_for_signal())
}

/// Actor that completes with [`ActorError::Canceled`] once `trigger`
/// resolves, or once it is interrupted by another actor.
pub fn shutdown_actor<F>(name: &'static str, trigger: F) -> Actor
where
    F: Future<Output = io::Result<&'static str>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let cancelled = cancel.clone();

    Actor::new(
        name,
        async move {
            tokio::select! {
                received = trigger => match received {
                    Ok(signal) => {
                        tracing::info!(signal, "caught signal, exiting");
                        Err(ActorError::Canceled)
                    }
                    Err(e) => Err(ActorError::failed(name, e)),
                },
                _ = cancelled.cancelled() => Err(ActorError::Canceled),
            }
        },
        move |_| {
            cancel.cancel();
            async {}
        },
    )
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
