use herald_utils::http::Header;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::event_source::EventSourceEvent;
use crate::http_response::HttpStatusCode;

pub enum Response {
    Html {
        content: String,
        headers: Vec<Header>,
    },
    Json {
        content: String,
        headers: Vec<Header>,
    },
    Redirect {
        location: String,
        headers: Vec<Header>,
    },
    EventSource {
        retry: Option<i32>,
        stream: UnboundedReceiver<EventSourceEvent>,
    },
    /// A failed request explained by a JSON body.
    Error {
        status: HttpStatusCode,
        content: String,
    },
    BadRequest,
    NotFound,
    InternalServerError,
    Empty,
}

impl Response {
    pub fn html(content: String) -> Self {
        Response::Html { content, headers: vec![] }
    }

    pub fn json(content: String) -> Self {
        Response::Json { content, headers: vec![] }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Response::Redirect { location: location.into(), headers: vec![] }
    }
}
