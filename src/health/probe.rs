use actix_web::HttpResponse;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

/// Readiness and liveness of the process.
///
/// Both flags start false: nothing reports healthy until the component that
/// owns the guarded resource says so.
#[derive(Debug, Default)]
pub struct Probe {
    ready: AtomicBool,
    healthy: AtomicBool,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            tracing::info!("changing probe status to ready");
        }
    }

    pub fn not_ready(&self, cause: impl Display) {
        if self.ready.swap(false, Ordering::SeqCst) {
            tracing::warn!(cause = %cause, "changing probe status to not ready");
        }
    }

    pub fn healthy(&self) {
        if !self.healthy.swap(true, Ordering::SeqCst) {
            tracing::info!("changing probe status to healthy");
        }
    }

    pub fn not_healthy(&self, cause: impl Display) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            tracing::warn!(cause = %cause, "changing probe status to not healthy");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Response for `GET /-/ready`.
    pub fn ready_response(&self) -> HttpResponse {
        status_response(self.is_ready())
    }

    /// Response for `GET /-/healthy`.
    pub fn healthy_response(&self) -> HttpResponse {
        status_response(self.is_healthy())
    }
}

fn status_response(ok: bool) -> HttpResponse {
    if ok {
        HttpResponse::Ok().content_type("text/plain; charset=utf-8").body("OK")
    } else {
        HttpResponse::ServiceUnavailable()
            .content_type("text/plain; charset=utf-8")
            .body("NOT OK")
    }
}
