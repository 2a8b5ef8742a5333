//! Browser-facing side of the dashboard: HTML pages, the JSON API and the notification stream,
//! all served through `http-server`.

mod flow_controller;
pub mod request_handler;
mod routing;
pub mod sessions;

pub use request_handler::RequestHandler;
