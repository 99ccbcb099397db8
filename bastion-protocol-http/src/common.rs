use cookie::Cookie;
use poem::Request;

use bastion_common::BastionError;
use bastion_core::extract_app_name;

/// Path of the browser handshake that binds a session token to a cookie.
pub const AUTH_PATH: &str = "/x-bastion-auth";

pub const SESSION_COOKIE_NAME: &str = "bastion-app-session";

pub fn extract_session_token(req: &Request) -> Result<String, BastionError> {
    for header in req.headers().get_all(http::header::COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(header).flatten() {
            if cookie.name() == SESSION_COOKIE_NAME {
                return Ok(cookie.value().to_owned());
            }
        }
    }
    Err(BastionError::AuthenticationFailed)
}

/// Application name the request was addressed to, from `Host` or the
/// absolute URI authority.
pub fn request_app_name(req: &Request) -> Result<String, BastionError> {
    let host = match req.headers().get(http::header::HOST) {
        Some(host) => host
            .to_str()
            .map_err(|_| BastionError::bad_parameter("non-ASCII host header"))?
            .to_owned(),
        None => req
            .uri()
            .authority()
            .map(|authority| authority.to_string())
            .ok_or_else(|| BastionError::bad_parameter("missing host header"))?,
    };
    extract_app_name(&host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_session_token() {
        let req = Request::builder()
            .header(http::header::COOKIE, "theme=dark; bastion-app-session=abc123")
            .finish();
        assert_eq!(extract_session_token(&req).unwrap(), "abc123");
    }

    #[test]
    fn test_missing_cookie_fails_authentication() {
        let req = Request::builder()
            .header(http::header::COOKIE, "theme=dark")
            .finish();
        assert!(matches!(
            extract_session_token(&req),
            Err(BastionError::AuthenticationFailed)
        ));
        assert!(extract_session_token(&Request::default()).is_err());
    }

    #[test]
    fn test_request_app_name() {
        let req = Request::builder()
            .header(http::header::HOST, "grafana.east.example.com:8443")
            .finish();
        assert_eq!(request_app_name(&req).unwrap(), "grafana");

        let req = Request::builder()
            .uri_str("http://kibana.west.example.com/app")
            .finish();
        assert_eq!(request_app_name(&req).unwrap(), "kibana");

        assert!(matches!(
            request_app_name(&Request::default()),
            Err(BastionError::BadParameter(_))
        ));
    }
}
