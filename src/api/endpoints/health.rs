//! Environment health checks.

use std::time::Duration;

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, CompilerHealth, EndpointHealth};
use crate::llm::{Credentials, GenerationRequest, Message};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// `GET /api/health/compiler`: whether the document compiler runs.
pub async fn compiler(State(ctx): State<ApiContext>) -> Json<CompilerHealth> {
    match ctx.scheduler.compiler().version().await {
        Ok(version) => Json(CompilerHealth {
            installed: true,
            message: version,
        }),
        Err(e) => Json(CompilerHealth {
            installed: false,
            message: e.to_string(),
        }),
    }
}

/// `POST /api/health/endpoint`: a minimal generation with the supplied
/// credentials.
pub async fn endpoint(
    State(ctx): State<ApiContext>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<EndpointHealth>, ApiError> {
    credentials
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let provider = ctx
        .scheduler
        .providers()
        .create(&credentials)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let request = GenerationRequest::new(
        credentials.model.clone(),
        vec![Message::user("Reply with the single word: ok")],
    )
    .with_max_tokens(8);

    let outcome = tokio::time::timeout(PROBE_TIMEOUT, provider.generate(request)).await;
    let health = match outcome {
        Ok(Ok(_)) => EndpointHealth {
            reachable: true,
            model: credentials.model,
            message: "Endpoint responded".to_string(),
        },
        Ok(Err(e)) => EndpointHealth {
            reachable: false,
            model: credentials.model,
            message: e.to_string(),
        },
        Err(_) => EndpointHealth {
            reachable: false,
            model: credentials.model,
            message: format!("No response within {}s", PROBE_TIMEOUT.as_secs()),
        },
    };
    Ok(Json(health))
}
