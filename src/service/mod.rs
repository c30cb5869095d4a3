use crate::config::{Role, Settings};
use crate::health::{liveness_actor, LivenessCheck, Probe};
use crate::lifecycle::{signal_actor, Actor, ActorError, ActorGroup};
use crate::listener::{Listener, Routes};
use crate::metrics::{internal_routes, Metrics};
use crate::pipeline::{self, BoxedHandler};
use crate::proxy::{Dispatcher, ForwardHandler, RoundRobinDispatcher};
use crate::receiver::ReceiveHandler;
use actix_web::{web, HttpRequest};
use std::net::SocketAddr;
use std::sync::Arc;

// ============================================================================
// Service Composition
// ============================================================================
//
// One process, one role. Shared scaffold:
//
//   public listener   /receive through the instrumented pipeline; marks the
//                     probe ready once serving
//   internal listener /metrics, /-/healthy, /-/ready, /debug/pprof/*
//   liveness          polls --web-healthcheck-url (optional)
//   signal            SIGINT / SIGTERM
//
// The roles differ only in the terminal handler behind /receive.
//
// ============================================================================

const RECEIVE_PATH: &str = "/receive";
const RECEIVE_HANDLER: &str = "receive";

/// Public routes of the receiver role.
pub fn receiver_routes(metrics: Arc<Metrics>) -> Routes {
    receive_route(pipeline::instrumented(
        RECEIVE_HANDLER,
        metrics,
        Arc::new(ReceiveHandler::new()),
    ))
}

/// Public routes of the proxy role.
pub fn proxy_routes(metrics: Arc<Metrics>, dispatcher: Arc<dyn Dispatcher>) -> Routes {
    receive_route(pipeline::instrumented(
        RECEIVE_HANDLER,
        metrics,
        Arc::new(ForwardHandler::new(dispatcher)),
    ))
}

fn receive_route(handler: BoxedHandler) -> Routes {
    Arc::new(move |cfg: &mut web::ServiceConfig| {
        let handler = handler.clone();
        cfg.route(
            RECEIVE_PATH,
            web::post().to(move |req: HttpRequest, payload: web::Payload| {
                pipeline::serve(handler.clone(), req, payload)
            }),
        );
    })
}

/// A fully wired process, listeners already bound.
pub struct Service {
    group: ActorGroup,
    public_addrs: Vec<SocketAddr>,
    internal_addrs: Vec<SocketAddr>,
}

impl Service {
    /// Build every actor except the shutdown trigger. Bind failures are
    /// reported here, before anything runs.
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let metrics = Arc::new(Metrics::new(settings.role.metrics_prefix())?);
        let probe = Arc::new(Probe::new());

        let public_routes = match &settings.role {
            Role::Receiver => receiver_routes(metrics.clone()),
            Role::Proxy {
                backends,
                backend_timeout,
            } => {
                let dispatcher = RoundRobinDispatcher::new(backends.clone(), *backend_timeout)?
                    .with_metrics(metrics.clone());
                tracing::info!(backends = ?backends, "forwarding to backends");
                proxy_routes(metrics.clone(), Arc::new(dispatcher))
            }
        };

        let public = Listener::bind("public", &settings.listen, settings.grace_period, public_routes)?;
        let internal = Listener::bind(
            "internal",
            &settings.internal_listen,
            settings.grace_period,
            internal_routes(metrics.clone(), probe.clone(), settings.profiling),
        )?;
        let public_addrs = public.local_addrs().to_vec();
        let internal_addrs = internal.local_addrs().to_vec();

        let mut group = ActorGroup::new();
        group
            .add(public.into_actor(Some(probe.clone())))
            .add(internal.into_actor(None));

        if let Some(url) = &settings.healthcheck_url {
            group.add(liveness_actor(LivenessCheck::new(url.as_str())?, probe.clone()));
        }

        Ok(Self {
            group,
            public_addrs,
            internal_addrs,
        })
    }

    pub fn public_addrs(&self) -> &[SocketAddr] {
        &self.public_addrs
    }

    pub fn internal_addrs(&self) -> &[SocketAddr] {
        &self.internal_addrs
    }

    /// Run until a termination signal or the first actor failure.
    pub async fn run(self) -> Result<(), ActorError> {
        self.run_until(signal_actor()).await
    }

    /// Run with `shutdown` as the actor that ends a clean run.
    pub async fn run_until(self, shutdown: Actor) -> Result<(), ActorError> {
        let mut group = self.group;
        group.add(shutdown);
        tracing::info!(actors = group.len(), "starting service");
        group.run().await
    }
}

/// Process exit status for a finished run: operator shutdown is success.
pub fn exit_status(outcome: &Result<(), ActorError>) -> u8 {
    match outcome {
        Ok(()) => 0,
        Err(err) if err.is_canceled() => 0,
        Err(_) => 1,
    }
}
