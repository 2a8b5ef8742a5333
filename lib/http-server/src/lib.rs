//! A deliberately small HTTP/1.1 server: one request per connection, plus long-lived
//! `text/event-stream` responses.

pub mod event_source;
pub mod http_response;
pub mod method;
pub mod request;
pub mod response;
pub mod server;

pub use request::Request;
pub use response::Response;
