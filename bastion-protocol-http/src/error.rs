use http::StatusCode;
use poem::Response;

/// The only failure a client ever sees.
pub fn error_response() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .content_type("text/plain; charset=utf-8")
        .body("internal service error")
}
