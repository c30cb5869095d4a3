use super::Metrics;
use crate::health::Probe;
use crate::listener::Routes;
use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Introspection state shared by the internal server handlers.
struct Introspection {
    started_at: DateTime<Utc>,
}

/// Routes of the internal server: metrics, probes, and (when enabled)
/// runtime introspection under `/debug/pprof/`.
pub fn internal_routes(metrics: Arc<Metrics>, probe: Arc<Probe>, profiling: bool) -> Routes {
    let introspection = web::Data::new(Introspection {
        started_at: Utc::now(),
    });

    Arc::new(move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::from(metrics.clone()))
            .app_data(web::Data::from(probe.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/-/healthy", web::get().to(healthy_handler))
            .route("/-/ready", web::get().to(ready_handler));

        if profiling {
            cfg.app_data(introspection.clone())
                .route("/debug/pprof/", web::get().to(pprof_index))
                .route("/debug/pprof/cmdline", web::get().to(pprof_cmdline))
                .route("/debug/pprof/runtime", web::get().to(pprof_runtime));
        }
    })
}

async fn metrics_handler(metrics: web::Data<Metrics>) -> impl Responder {
    match metrics.encode() {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

async fn healthy_handler(probe: web::Data<Probe>) -> impl Responder {
    probe.healthy_response()
}

async fn ready_handler(probe: web::Data<Probe>) -> impl Responder {
    probe.ready_response()
}

async fn pprof_index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(concat!(
            "<html><head><title>/debug/pprof/</title></head><body>\n",
            "<a href=\"cmdline\">cmdline</a>: the command line invocation of the current program<br>\n",
            "<a href=\"runtime\">runtime</a>: async runtime workers and live tasks<br>\n",
            "</body></html>\n",
        ))
}

/// Process arguments, NUL separated.
async fn pprof_cmdline() -> impl Responder {
    let args: Vec<String> = std::env::args().collect();
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(args.join("\x00"))
}

/// Snapshot served by `/debug/pprof/runtime`.
#[derive(Debug, Serialize)]
struct RuntimeReport {
    pid: u32,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    runtime_workers: Option<usize>,
    runtime_alive_tasks: Option<usize>,
}

async fn pprof_runtime(introspection: web::Data<Introspection>) -> impl Responder {
    let (runtime_workers, runtime_alive_tasks) = match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let metrics = handle.metrics();
            (Some(metrics.num_workers()), Some(metrics.num_alive_tasks()))
        }
        Err(_) => (None, None),
    };

    let report = RuntimeReport {
        pid: std::process::id(),
        started_at: introspection.started_at,
        uptime_seconds: (Utc::now() - introspection.started_at).num_seconds(),
        runtime_workers,
        runtime_alive_tasks,
    };

    match serde_json::to_vec_pretty(&report) {
        Ok(body) => HttpResponse::Ok().content_type("application/json").body(body),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}
