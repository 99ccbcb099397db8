use bastion_common::BastionError;
use bastion_core::Services;
use cookie::{Cookie, SameSite};
use http::{Method, StatusCode};
use poem::web::{Data, Html};
use poem::{handler, Body, IntoResponse, Request, Response};
use serde::Deserialize;
use tracing::*;

use crate::common::SESSION_COOKIE_NAME;
use crate::error::error_response;

/// Served on GET. Moves the token out of the URL fragment, which browsers
/// never send, and into a cookie.
const BOOTSTRAP_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Signing in</title></head>
<body>
<script>
(function () {
    var token = window.location.hash.substring(1);
    history.replaceState(null, "", window.location.pathname);
    fetch("/x-bastion-auth", {
        method: "POST",
        credentials: "same-origin",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ cookie_value: token })
    }).then(function (response) {
        if (response.ok) {
            window.location.replace("/");
        } else {
            document.body.innerText = "Sign-in failed";
        }
    });
})();
</script>
</body>
</html>
"#;

#[derive(Deserialize)]
struct FragmentRequest {
    cookie_value: String,
}

#[handler]
pub async fn fragment_endpoint(req: &Request, body: Body, services: Data<&Services>) -> Response {
    match handle_fragment(req, body, &services).await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "Fragment authentication failed");
            error_response()
        }
    }
}

async fn handle_fragment(
    req: &Request,
    body: Body,
    services: &Services,
) -> Result<Response, BastionError> {
    let method = req.method();
    if method == Method::GET {
        return Ok(Html(BOOTSTRAP_PAGE).into_response());
    }
    if method != Method::POST {
        return Err(BastionError::bad_parameter(format!(
            "unsupported method: {method}"
        )));
    }

    let body = body
        .into_vec()
        .await
        .map_err(|e| BastionError::bad_parameter(format!("could not read request body: {e}")))?;
    let request: FragmentRequest = serde_json::from_slice(&body)
        .map_err(|e| BastionError::bad_parameter(format!("malformed fragment request: {e}")))?;

    let session = services.session_cache.get(&request.cookie_value).await?;
    info!(user=%session.identity.username, app=%session.app.name, "Browser session established");

    let cookie = Cookie::build((SESSION_COOKIE_NAME, request.cookie_value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(http::header::SET_COOKIE, cookie.to_string())
        .finish())
}
