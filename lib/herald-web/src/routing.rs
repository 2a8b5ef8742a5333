mod actions;
mod html;
mod json;
mod pages;

use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;

use herald_core::authorization::AuthService;
use herald_core::dashboard::Dashboard;
use herald_core::data_access::DataAccess;
use herald_core::relay::NotificationChannel;
use herald_core::Identity;
use http_server::http_response::HttpStatusCode;
use http_server::method::Method;
use http_server::request::ContentTooLarge;
use http_server::{Request, Response};

use crate::flow_controller::{error_json, DashboardResultExtension, Flow, HttpResponseContextExtension};
use crate::request_handler::RequestHandlerError;
use crate::sessions;

pub async fn route<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Result<Response, RequestHandlerError> {
    let path = request.path().to_owned();
    let mut path_segments = path
        .split('/')
        .filter(|s| !s.is_empty());

    let query = (
        request.method(),
        path_segments.next(),
        path_segments.next(),
        path_segments.next(),
        path_segments.next(),
    );

    use Method::*;
    let response = match query {
        (Get, None, ..) => pages::root(request, &app).await,
        (Get, Some("login.html"), None, ..) => pages::login(request, &app).await,
        (Get, Some("dashboard"), Some("admin.html"), None, ..) => pages::admin_dashboard(request, &app).await,
        (Get, Some("dashboard"), Some("user.html"), None, ..) => pages::user_dashboard(request, &app).await,
        (Post, Some("login"), None, ..) => actions::login(request, &app).await,
        (Get | Post, Some("logout"), None, ..) => actions::logout(request, &app).await,

        (Post, Some("api"), Some("signup"), None, ..) => actions::signup(request, &app).await,
        (Get, Some("api"), Some("users"), None, ..) => json::users(request, &app).await,
        (Post, Some("api"), Some("users"), None, ..) => actions::create_user(request, &app).await,
        (Post, Some("api"), Some("users"), Some(id), None) => actions::update_user(request, &app, id).await,
        (Delete, Some("api"), Some("users"), Some(id), None) => actions::delete_user(request, &app, id).await,
        (Get, Some("api"), Some("messages"), None, ..) => json::sent_messages(request, &app).await,
        (Post, Some("api"), Some("messages"), None, ..) => actions::send_message(request, &app).await,
        (Get, Some("api"), Some("messages"), Some("inbox"), None) => json::inbox(request, &app).await,
        (Post, Some("api"), Some("messages"), Some("read-all"), None) => actions::mark_all_read(request, &app).await,
        (Post, Some("api"), Some("messages"), Some(id), Some("read")) => actions::mark_read(request, &app, id).await,
        (Get, Some("api"), Some("notifications"), None, ..) => json::notifications(request, &app).await,
        (Post, Some("api"), Some("profile"), None, ..) => actions::update_profile(request, &app).await,
        (Get, Some("api"), Some("theme"), None, ..) => json::theme(&app).await,
        (Post, Some("api"), Some("theme"), None, ..) => actions::set_theme(request, &app).await,
        (Get, Some("api"), Some("stats"), None, ..) => json::stats(request, &app).await,
        (Get, Some("api"), Some("channels"), None, ..) => json::channels(request, &app).await,
        (Delete, Some("api"), Some("channels"), Some(username), None) => actions::unlink_channel(request, &app, username).await,
        (Post, Some("api"), Some("bot"), Some("webhook"), None) => actions::bot_webhook(request, &app).await,

        (Get, Some("subscribe"), Some("notifications"), None, ..) => actions::subscribe_notifications(request, &app).await,
        (Get, Some("favicon.ico"), None, ..) => Ok(Response::Empty),
        _ => Ok(Response::NotFound),
    };

    Ok(response.unwrap_or_else(|response| response))
}

/// The logged-in identity behind an API call, or a 401.
async fn require_caller<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow<Identity> {
    sessions::caller(app, request.headers())
        .await
        .or_error_response()?
        .ok_or_else(|| error_json(HttpStatusCode::Unauthorized, "Please log in to continue"))
}

/// The request body, or a 413 when it is over the size limit and a bare 400 when it can't be read.
async fn read_content<T: AsyncRead + Unpin>(request: &mut Request<T>) -> Flow<String> {
    match request.content().await {
        Ok(content) => Ok(content),
        Err(e) if e.is::<ContentTooLarge>() => Err(error_json(HttpStatusCode::PayloadTooLarge, "Request body is too large")),
        Err(e) => Err::<String, _>(e).or_bad_request(),
    }
}

async fn read_json<T: AsyncRead + Unpin, V: DeserializeOwned>(request: &mut Request<T>) -> Flow<V> {
    let content = read_content(request).await?;
    serde_json::from_str(&content)
        .map_err(|e| error_json(HttpStatusCode::BadRequest, &format!("Malformed request body: {e}")))
}

fn parse_id(raw: &str) -> Flow<uuid::Uuid> {
    raw.parse()
        .map_err(|_| error_json(HttpStatusCode::NotFound, "The requested item was not found"))
}
