use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use bastion_common::BastionError;
use bastion_core::{ApplicationRecord, Session};
use cookie::Cookie;
use futures::TryStreamExt;
use http::header::HeaderName;
use http::uri::Scheme;
use http::{HeaderValue, Uri};
use once_cell::sync::Lazy;
use poem::{Body, Request, Response};
use tracing::*;

use crate::common::SESSION_COOKIE_NAME;

static DONT_FORWARD_HEADERS: Lazy<HashSet<HeaderName>> = Lazy::new(|| {
    #[allow(clippy::mutable_key_type)]
    let mut s = HashSet::new();
    s.insert(http::header::ACCEPT_ENCODING);
    s.insert(http::header::CONNECTION);
    s.insert(http::header::CONTENT_LENGTH);
    s.insert(http::header::HOST);
    s.insert(http::header::PROXY_AUTHENTICATE);
    s.insert(http::header::PROXY_AUTHORIZATION);
    s.insert(http::header::TE);
    s.insert(http::header::TRAILER);
    s.insert(http::header::TRANSFER_ENCODING);
    s.insert(http::header::UPGRADE);
    s.insert(HeaderName::from_static("keep-alive"));
    s
});

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

fn is_forwarding_header(name: &HeaderName) -> bool {
    *name == X_FORWARDED_FOR || *name == X_FORWARDED_HOST || *name == X_FORWARDED_PROTO
}

fn construct_uri(req: &Request, app: &ApplicationRecord) -> anyhow::Result<Uri> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(app.internal_addr.as_str())
        .path_and_query(path_and_query)
        .build()
        .with_context(|| format!("invalid internal address {:?}", app.internal_addr))
}

/// Cookie header with the gateway's own session cookie removed.
fn strip_session_cookie(value: &HeaderValue) -> Option<HeaderValue> {
    let value = value.to_str().ok()?;
    let remaining = Cookie::split_parse(value)
        .flatten()
        .filter(|c| c.name() != SESSION_COOKIE_NAME)
        .map(|c| c.stripped().to_string())
        .collect::<Vec<_>>();
    if remaining.is_empty() {
        return None;
    }
    HeaderValue::from_str(&remaining.join("; ")).ok()
}

fn copy_server_request(
    req: &Request,
    mut target: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    for (name, value) in req.headers() {
        if DONT_FORWARD_HEADERS.contains(name) || is_forwarding_header(name) {
            continue;
        }
        if *name == http::header::COOKIE {
            if let Some(value) = strip_session_cookie(value) {
                target = target.header(name.clone(), value);
            }
            continue;
        }
        target = target.header(name.clone(), value.clone());
    }
    target
}

fn inject_forwarding_headers(
    req: &Request,
    mut target: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    if let Some(host) = req
        .headers()
        .get(http::header::HOST)
        .and_then(|h| h.to_str().ok())
    {
        target = target.header(X_FORWARDED_HOST.clone(), host);
    }
    target = target.header(X_FORWARDED_PROTO.clone(), req.scheme().as_str());
    if let Some(addr) = req.remote_addr().as_socket_addr() {
        target = target.header(X_FORWARDED_FOR.clone(), addr.ip().to_string());
    }
    target
}

fn copy_client_response(client_response: &reqwest::Response, server_response: &mut Response) {
    for (name, value) in client_response.headers() {
        if DONT_FORWARD_HEADERS.contains(name) {
            continue;
        }
        server_response
            .headers_mut()
            .append(name.clone(), value.clone());
    }
    server_response.set_status(client_response.status());
}

/// Relays requests to an application's internal address on behalf of a session.
pub struct ForwardingProxy {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ForwardingProxy {
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("building HTTP client")?;
        Ok(Self { client, timeout })
    }

    /// Access is decided anew on every call, before any connection to the
    /// backend is made.
    pub async fn forward(
        &self,
        session: &Session,
        req: &Request,
        body: Body,
    ) -> Result<Response, BastionError> {
        session.check_access().await?;

        let uri = construct_uri(req, &session.app).map_err(|e| BastionError::internal(format!("{e:#}")))?;
        debug!(%uri, "Forwarding");

        let mut client_request = self.client.request(req.method().clone(), uri.to_string());
        client_request = copy_server_request(req, client_request);
        client_request = inject_forwarding_headers(req, client_request);
        if let Some(timeout) = self.timeout {
            client_request = client_request.timeout(timeout);
        }
        client_request = client_request.body(reqwest::Body::wrap_stream(body.into_bytes_stream()));

        let client_response = client_request
            .send()
            .await
            .map_err(|e| BastionError::internal(format!("backend request failed: {e}")))?;

        info!(
            method=%req.method(),
            uri=%req.uri(),
            status=%client_response.status(),
            "Request"
        );

        let mut response = Response::default();
        copy_client_response(&client_response, &mut response);
        response.set_body(Body::from_bytes_stream(
            client_response.bytes_stream().map_err(std::io::Error::other),
        ));
        Ok(response)
    }
}
