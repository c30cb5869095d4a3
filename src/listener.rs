use crate::health::Probe;
use crate::lifecycle::{Actor, ActorError};
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

// ============================================================================
// Listener - one HTTP server as one ActorGroup member
// ============================================================================
//
// run:       serve until stopped
// interrupt: graceful stop bounded by the grace period; if the deadline
//            passes the server is stopped forcefully and an error is logged
//
// Signals are never handled by the server itself; the signal actor owns them.
//
// ============================================================================

/// Route table applied to every worker's `App`.
pub type Routes = Arc<dyn Fn(&mut web::ServiceConfig) + Send + Sync>;

pub struct Listener {
    name: &'static str,
    server: Server,
    addrs: Vec<SocketAddr>,
    grace_period: Duration,
}

impl Listener {
    /// Bind `addr` now so bind failures surface at startup.
    pub fn bind(
        name: &'static str,
        addr: &str,
        grace_period: Duration,
        routes: Routes,
    ) -> anyhow::Result<Self> {
        let server = HttpServer::new(move || {
            let routes = routes.clone();
            App::new().configure(move |cfg| routes(cfg))
        })
        .disable_signals()
        .shutdown_timeout(drain_timeout_secs(grace_period))
        .bind(addr)
        .with_context(|| format!("failed to bind {} listener on {}", name, addr))?;

        let addrs = server.addrs();

        Ok(Self {
            name,
            server: server.run(),
            addrs,
            grace_period,
        })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Turn the bound server into an actor. When `probe` is given, the
    /// listener marks it ready and healthy once the server has been polled
    /// without failing, and withdraws readiness as soon as shutdown begins.
    pub fn into_actor(self, probe: Option<Arc<Probe>>) -> Actor {
        let Listener {
            name,
            server,
            addrs,
            grace_period,
        } = self;
        let handle = server.handle();
        let run_probe = probe.clone();

        Actor::new(
            name,
            async move {
                tracing::info!(listener = name, addrs = ?addrs, "starting server");
                tokio::pin!(server);

                let result = match futures_util::poll!(server.as_mut()) {
                    Poll::Ready(result) => result,
                    Poll::Pending => {
                        if let Some(probe) = &run_probe {
                            probe.ready();
                            probe.healthy();
                        }
                        server.await
                    }
                };

                if let Some(probe) = &run_probe {
                    probe.not_healthy(format!("{} listener stopped", name));
                }
                tracing::info!(listener = name, "server stopped");
                result.map_err(|e| ActorError::failed(name, e))
            },
            move |_| async move {
                if let Some(probe) = &probe {
                    probe.not_ready(format!("{} listener shutting down", name));
                }

                if tokio::time::timeout(grace_period, handle.stop(true))
                    .await
                    .is_err()
                {
                    tracing::error!(
                        listener = name,
                        grace_period = ?grace_period,
                        "server shutdown failed: grace period elapsed"
                    );
                    handle.stop(false).await;
                }
            },
        )
    }
}

/// actix counts its own drain timer in whole seconds. It must outlast the
/// grace period so the deadline in `into_actor` is the one that fires.
fn drain_timeout_secs(grace_period: Duration) -> u64 {
    grace_period.as_secs() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{shutdown_actor, ActorGroup};
    use crate::testing::capture_logs;
    use actix_web::HttpResponse;
    use std::time::Instant;
    use tokio::sync::oneshot;

    fn slow_routes(delay: Duration) -> Routes {
        Arc::new(move |cfg: &mut web::ServiceConfig| {
            cfg.route(
                "/slow",
                web::get().to(move || async move {
                    tokio::time::sleep(delay).await;
                    HttpResponse::Ok().body("done")
                }),
            );
        })
    }

    #[actix_web::test]
    async fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let result = Listener::bind("public", &addr, Duration::from_secs(1), slow_routes(Duration::ZERO));
        assert!(result.is_err());
    }

    #[actix_web::test]
    async fn test_in_flight_request_completes_during_shutdown() {
        let listener = Listener::bind(
            "public",
            "127.0.0.1:0",
            Duration::from_secs(5),
            slow_routes(Duration::from_millis(300)),
        )
        .unwrap();
        let addr = listener.local_addrs()[0];
        let probe = Arc::new(Probe::new());

        let (trigger, triggered) = oneshot::channel();
        let mut group = ActorGroup::new();
        group.add(listener.into_actor(Some(probe.clone())));
        assert!(!probe.is_ready());
        group.add(shutdown_actor("test-signal", async move {
            let _ = triggered.await;
            Ok("SIGTERM")
        }));
        let running = tokio::spawn(group.run());

        let request = tokio::spawn(async move {
            reqwest::get(format!("http://{}/slow", addr)).await?.text().await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(probe.is_ready());
        assert!(probe.is_healthy());
        trigger.send(()).unwrap();

        let body = request.await.unwrap().unwrap();
        assert_eq!(body, "done");

        let outcome = running.await.unwrap();
        assert!(outcome.unwrap_err().is_canceled());
        assert!(!probe.is_ready());
    }

    #[actix_web::test]
    async fn test_missed_grace_period_abandons_server() {
        let (logs, _guard) = capture_logs();
        let listener = Listener::bind(
            "public",
            "127.0.0.1:0",
            Duration::from_secs(1),
            slow_routes(Duration::from_secs(10)),
        )
        .unwrap();
        let addr = listener.local_addrs()[0];

        let (trigger, triggered) = oneshot::channel();
        let mut group = ActorGroup::new();
        group.add(listener.into_actor(None));
        group.add(shutdown_actor("test-signal", async move {
            let _ = triggered.await;
            Ok("SIGTERM")
        }));
        let running = tokio::spawn(group.run());

        let request = tokio::spawn(reqwest::get(format!("http://{}/slow", addr)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        trigger.send(()).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("group must not wait for the slow request")
            .unwrap();
        assert!(outcome.unwrap_err().is_canceled());
        assert!(started.elapsed() < Duration::from_secs(5));

        let line = logs.find("grace period elapsed").unwrap();
        assert!(line.contains("ERROR"), "{}", line);
        assert!(line.contains("listener=\"public\""), "{}", line);
        request.abort();
    }

    #[test]
    fn test_drain_timeout_outlasts_grace_period() {
        assert_eq!(drain_timeout_secs(Duration::from_secs(10)), 11);
        assert_eq!(drain_timeout_secs(Duration::from_millis(500)), 1);
        assert_eq!(drain_timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(drain_timeout_secs(Duration::ZERO), 1);
    }
}
