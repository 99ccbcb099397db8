use std::sync::Arc;

use bastion_common::BastionError;
use bastion_core::Services;
use poem::web::Data;
use poem::{handler, Body, Request, Response};
use tracing::*;

use crate::common::{extract_session_token, request_app_name};
use crate::error::error_response;
use crate::proxy::ForwardingProxy;

#[handler]
pub async fn catchall_endpoint(
    req: &Request,
    body: Body,
    services: Data<&Services>,
    proxy: Data<&Arc<ForwardingProxy>>,
) -> Response {
    match authenticate_and_forward(req, body, &services, &proxy).await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, method=%req.method(), uri=%req.uri(), "Request failed");
            error_response()
        }
    }
}

async fn authenticate_and_forward(
    req: &Request,
    body: Body,
    services: &Services,
    proxy: &ForwardingProxy,
) -> Result<Response, BastionError> {
    let app_name = request_app_name(req)?;
    let token = extract_session_token(req)?;
    let session = services.session_cache.get(&token).await?;
    if session.app.name != app_name {
        warn!(
            user=%session.identity.username,
            requested=%app_name,
            bound=%session.app.name,
            "Session is not bound to the requested application"
        );
        return Err(BastionError::AccessDenied);
    }

    let span = info_span!("HTTP", user=%session.identity.username, app=%session.app.name);
    let result = proxy.forward(&session, req, body).instrument(span).await;

    if let Err(ref error) = result {
        if error.is_internal() && invalidate_on_backend_error(services).await {
            debug!(app=%session.app.name, "Invalidating session after backend failure");
            services.session_cache.invalidate(&token).await;
        }
    }
    result
}

async fn invalidate_on_backend_error(services: &Services) -> bool {
    services
        .config
        .lock()
        .await
        .store
        .http
        .invalidate_session_on_backend_error
}
