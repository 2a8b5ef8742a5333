use std::collections::HashMap;

use herald_utils::http::Header;
use herald_utils::utils::CaseInsensitiveString;

pub struct HttpResponse(Vec<u8>);

impl HttpResponse {
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

pub struct HttpResponseBuilder<'a> {
    version: HttpVersion,
    status: HttpStatusCode,
    headers: HashMap<CaseInsensitiveString, String>,
    body: Option<&'a str>,
}

impl<'a> HttpResponseBuilder<'a> {
    pub fn new() -> Self {
        let version = HttpVersion::Http11;
        let status = HttpStatusCode::OK;
        let headers = HashMap::new();
        let body = None;
        HttpResponseBuilder { version, status, headers, body }
    }

    pub fn build(&mut self) -> HttpResponse {
        let mut lines = vec![];
        lines.push(format!("{} {}\r\n", self.version, self.status).into_bytes());

        if let Some(body) = self.body {
            self.headers.insert(CaseInsensitiveString::from("Content-Length"), body.len().to_string());
        };
        for (key, value) in self.headers.iter() {
            lines.push(format!("{key}: {value}\r\n").into_bytes());
        }
        lines.push(b"\r\n".into());

        if let Some(body) = self.body {
            lines.push(body.as_bytes().to_owned());
        };

        HttpResponse(lines.concat())
    }

    pub fn status(&mut self, status: HttpStatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn header(&mut self, (key, value): Header) -> &mut Self {
        self.headers.insert(key, value);
        self
    }

    pub fn body(&mut self, body: &'a str) -> &mut Self {
        self.body = Some(body);
        self
    }

    pub fn content_html(&mut self) -> &mut Self {
        self.content_type("text/html; charset=utf-8")
    }

    pub fn content_json(&mut self) -> &mut Self {
        self.content_type("application/json; charset=utf-8")
    }

    pub fn content_event_stream(&mut self) -> &mut Self {
        self.content_type("text/event-stream; charset=utf-8")
    }

    fn content_type(&mut self, value: &str) -> &mut Self {
        self.headers.insert(CaseInsensitiveString::from("Content-Type"), value.to_owned());
        self
    }
}

impl Default for HttpResponseBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatusCode {
    OK,
    SeeOther,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PayloadTooLarge,
    InternalServerError,
}

impl std::fmt::Display for HttpStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str_repr = match self {
            Self::OK => "200 OK",
            Self::SeeOther => "303 See Other",
            Self::BadRequest => "400 Bad Request",
            Self::Unauthorized => "401 Unauthorized",
            Self::Forbidden => "403 Forbidden",
            Self::NotFound => "404 Not Found",
            Self::Conflict => "409 Conflict",
            Self::PayloadTooLarge => "413 Payload Too Large",
            Self::InternalServerError => "500 Internal Server Error",
        };
        write!(f, "{str_repr}")
    }
}

pub enum HttpVersion {
    Http11,
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str_repr = match self {
            Self::Http11 => "HTTP/1.1",
        };
        write!(f, "{str_repr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(response: HttpResponse) -> String {
        String::from_utf8(response.into_bytes()).unwrap()
    }

    #[test]
    fn builds_status_line_headers_and_body() {
        let text = as_text(HttpResponseBuilder::new()
            .status(HttpStatusCode::Conflict)
            .content_json()
            .body(r#"{"error":"taken"}"#)
            .build());

        assert!(text.starts_with("HTTP/1.1 409 Conflict\r\n"));
        assert!(text.contains("content-type: application/json; charset=utf-8\r\n"));
        assert!(text.contains("content-length: 17\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"error\":\"taken\"}"));
    }

    #[test]
    fn content_length_counts_bytes() {
        let text = as_text(HttpResponseBuilder::new().body("привет").build());
        assert!(text.contains("content-length: 12\r\n"));
    }

    #[test]
    fn empty_response_has_no_length() {
        let text = as_text(HttpResponseBuilder::new().build());
        assert_eq!(text, "HTTP/1.1 200 OK\r\n\r\n");
    }
}
