use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncRead;

use herald_core::authorization::AuthService;
use herald_core::dashboard::Dashboard;
use herald_core::data_access::DataAccess;
use herald_core::relay::NotificationChannel;
use herald_core::{InboxMessage, Message};
use http_server::Request;

use crate::flow_controller::{json_response, DashboardResultExtension, Flow};
use crate::routing::require_caller;

/// A message as listed in someone's inbox.
#[derive(Serialize)]
pub struct InboxMessageJson {
    #[serde(flatten)]
    pub message: Message,
    pub read: bool,
}

impl From<InboxMessage> for InboxMessageJson {
    fn from(entry: InboxMessage) -> Self {
        InboxMessageJson { message: entry.message, read: entry.read }
    }
}

pub async fn users<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let users = app.directory.list(&caller).await.or_error_response()?;
    json_response(&users)
}

pub async fn sent_messages<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let messages = app.messages.list_sent_by(&caller).await.or_error_response()?;
    json_response(&messages)
}

pub async fn inbox<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let inbox: Vec<InboxMessageJson> = app.messages
        .list_for(&caller).await
        .or_error_response()?
        .into_iter()
        .map(InboxMessageJson::from)
        .collect();
    json_response(&inbox)
}

pub async fn notifications<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let projection = app.notifications.project(&caller).await.or_error_response()?;
    json_response(&projection)
}

pub async fn theme(app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>) -> Flow {
    let theme = app.theme().await.or_error_response()?;
    json_response(&serde_json::json!({ "theme": theme }))
}

pub async fn stats<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let overview = app.admin_overview(&caller, Utc::now()).await.or_error_response()?;
    json_response(&overview)
}

pub async fn channels<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let links = app.channels(&caller).await.or_error_response()?;
    json_response(&links)
}
