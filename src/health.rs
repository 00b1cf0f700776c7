use crate::pipeline::PipelineStatus;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /health` and `GET /api/v1/health`
///
/// Always answers 200 while the server is up; `status` says whether the
/// pipeline can take a session.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let pipeline = state.health.status();
    let status = match pipeline {
        PipelineStatus::Ready => "healthy",
        PipelineStatus::Starting => "starting",
        PipelineStatus::Failed(_) => "unhealthy",
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "pipeline": pipeline,
        "session_active": state.session_lock.is_held(),
        "models": {
            "engine": config.models.engine,
            "num_codebooks": config.models.num_codebooks,
            "device": config.models.device
        },
        "metrics": state.metrics.snapshot()
    }))
}
