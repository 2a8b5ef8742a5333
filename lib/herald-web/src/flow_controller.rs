use std::fmt::Display;

use serde::Serialize;
use tracing::debug;

use herald_core::Error;
use herald_utils::utils::log_internal_error;
use http_server::http_response::HttpStatusCode;
use http_server::response::Response;

/// Outcome of a request handler that may stop early.
///
/// When processing a request you often want to bail out with a ready response (bad request,
/// a redirect to the login page, an internal error) as soon as some step fails, and otherwise
/// carry on with the value that step produced. `Err` holds the early response, so `?` does
/// exactly that; the router folds both sides back into one [`Response`].
pub(crate) type Flow<T = Response> = Result<T, Response>;

pub(crate) trait HttpResponseContext {
    type Output;

    /// The value, or a description of what went wrong.
    fn check(self) -> Result<Self::Output, String>;
}

pub(crate) trait HttpResponseContextExtension: HttpResponseContext + Sized {
    fn or_bad_request(self) -> Flow<Self::Output> {
        self.check().map_err(|reason| {
            debug!("bad request: {reason}");
            Response::BadRequest
        })
    }

    fn or_server_error(self) -> Flow<Self::Output> {
        self.check().map_err(|reason| {
            log_internal_error(reason);
            Response::InternalServerError
        })
    }
}

impl<T: HttpResponseContext> HttpResponseContextExtension for T {}

impl<T> HttpResponseContext for Option<T> {
    type Output = T;

    fn check(self) -> Result<Self::Output, String> {
        self.ok_or_else(|| "missing value".to_owned())
    }
}

impl<T, E: Display> HttpResponseContext for Result<T, E> {
    type Output = T;

    fn check(self) -> Result<Self::Output, String> {
        self.map_err(|e| format!("{e:#}"))
    }
}

/// Turns dashboard errors into their JSON responses.
pub(crate) trait DashboardResultExtension<T> {
    fn or_error_response(self) -> Flow<T>;
}

impl<T> DashboardResultExtension<T> for Result<T, Error> {
    fn or_error_response(self) -> Flow<T> {
        self.map_err(error_response)
    }
}

pub(crate) fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::Validation { .. } => HttpStatusCode::BadRequest,
        Error::BadCredential | Error::Unauthorized | Error::CorruptState(_) => HttpStatusCode::Unauthorized,
        Error::Forbidden(_) => HttpStatusCode::Forbidden,
        Error::NotFound(_) => HttpStatusCode::NotFound,
        Error::Conflict(_) => HttpStatusCode::Conflict,
        Error::Internal(e) => {
            log_internal_error(e);
            HttpStatusCode::InternalServerError
        },
    };
    error_json(status, &error.user_message())
}

pub(crate) fn error_json(status: HttpStatusCode, message: &str) -> Response {
    let content = serde_json::json!({ "error": message }).to_string();
    Response::Error { status, content }
}

pub(crate) fn json_response(value: &impl Serialize) -> Flow {
    let content = serde_json::to_string(value).or_server_error()?;
    Ok(Response::json(content))
}

#[cfg(test)]
mod tests {
    use herald_core::ConflictField;
    use http_server::response::Response;

    use super::*;

    fn status_of(response: &Response) -> Option<HttpStatusCode> {
        match response {
            Response::Error { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[test]
    fn control_flow_works_option() {
        assert!(matches!(control_flow_option(Some("value"), false), Response::Empty));
        assert!(matches!(control_flow_option(None, false), Response::BadRequest));
        assert!(matches!(control_flow_option(None, true), Response::InternalServerError));
    }

    fn control_flow_option(value: Option<&str>, server_side: bool) -> Response {
        let flow = || -> Flow {
            let _ = if server_side { value.or_server_error()? } else { value.or_bad_request()? };
            Ok(Response::Empty)
        };
        flow().unwrap_or_else(|response| response)
    }

    #[test]
    fn control_flow_works_result() {
        let ok = || -> Flow {
            let _ = Ok::<&str, &str>("value").or_bad_request()?;
            Ok(Response::Empty)
        };
        let err = || -> Flow {
            let _ = Err::<&str, &str>("error info").or_server_error()?;
            Ok(Response::Empty)
        };
        assert!(matches!(ok(), Ok(Response::Empty)));
        assert!(matches!(err(), Err(Response::InternalServerError)));
    }

    #[test]
    fn dashboard_errors_map_to_statuses() {
        let cases = [
            (Error::validation("subject", "required"), HttpStatusCode::BadRequest),
            (Error::BadCredential, HttpStatusCode::Unauthorized),
            (Error::Unauthorized, HttpStatusCode::Unauthorized),
            (Error::Forbidden("no"), HttpStatusCode::Forbidden),
            (Error::NotFound("user"), HttpStatusCode::NotFound),
            (Error::Conflict(ConflictField::Username), HttpStatusCode::Conflict),
            (Error::from(anyhow::anyhow!("db down")), HttpStatusCode::InternalServerError),
        ];
        for (error, expected) in cases {
            assert_eq!(status_of(&error_response(error)), Some(expected));
        }
    }

    #[test]
    fn error_body_carries_only_the_user_message() {
        let response = error_response(Error::from(anyhow::anyhow!("password=hunter2")));
        let Response::Error { content, .. } = response else { panic!("expected an error response") };
        assert!(!content.contains("hunter2"));
        let body: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(body["error"], "Something went wrong, please try again");
    }
}
