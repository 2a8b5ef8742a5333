use serde::Deserialize;
use tokio::io::AsyncRead;
use tracing::debug;

use herald_core::authorization::AuthService;
use herald_core::dashboard::Dashboard;
use herald_core::data_access::DataAccess;
use herald_core::directory::{IdentityPatch, NewIdentity, ProfilePatch};
use herald_core::relay::NotificationChannel;
use herald_core::routing::LOGIN_PATH;
use herald_core::{Error, Recipient, Theme};
use herald_utils::async_utils;
use herald_utils::serde::form_data;
use herald_utils::utils::log_internal_error;
use http_server::event_source::EventSourceEvent;
use http_server::{Request, Response};

use crate::flow_controller::{json_response, DashboardResultExtension, Flow, HttpResponseContextExtension};
use crate::routing::{html, parse_id, read_content, read_json, require_caller};
use crate::sessions;

const NOTIFICATIONS_EVENT: &str = "notifications";

pub async fn login<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    #[derive(Deserialize)]
    struct LoginParams {
        identifier: String,
        password: String,
    }

    let content = read_content(request).await?;
    let params: LoginParams = form_data::from_str(&content).or_bad_request()?;

    match app.sessions.login(&params.identifier, params.password).await {
        Ok(outcome) => {
            let location = outcome.redirect.path().into();
            let headers = vec![sessions::set_session_cookie(outcome.session.token.as_str())];
            Ok(Response::Redirect { location, headers })
        },
        Err(Error::Internal(e)) => {
            log_internal_error(e);
            Err(Response::InternalServerError)
        },
        Err(error) => {
            let theme = app.theme().await.or_server_error()?;
            let content = html::login_page(theme, &params.identifier, Some(&error.user_message())).or_server_error()?;
            Ok(Response::html(content))
        },
    }
}

pub async fn logout<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    // only the holder of the live token may end the session; anyone may drop a stale cookie
    if sessions::caller(app, request.headers()).await.or_server_error()?.is_some() {
        app.sessions.logout().await.or_server_error()?;
    }

    let headers = vec![sessions::clear_session_cookie()];
    Ok(Response::Redirect { location: LOGIN_PATH.into(), headers })
}

pub async fn signup<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let candidate: NewIdentity = read_json(request).await?;
    let identity = app.directory.register(candidate).await.or_error_response()?;
    json_response(&identity)
}

pub async fn create_user<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let candidate: NewIdentity = read_json(request).await?;
    let identity = app.directory.create(&caller, candidate).await.or_error_response()?;
    json_response(&identity)
}

pub async fn update_user<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
    id: &str,
) -> Flow {
    let id = parse_id(id)?;
    let caller = require_caller(request, app).await?;
    let patch: IdentityPatch = read_json(request).await?;
    let identity = app.directory.update(&caller, &id, patch).await.or_error_response()?;
    json_response(&identity)
}

pub async fn delete_user<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
    id: &str,
) -> Flow {
    let id = parse_id(id)?;
    let caller = require_caller(request, app).await?;
    let summary = app.directory.delete(&caller, &id).await.or_error_response()?;
    json_response(&summary)
}

pub async fn send_message<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    #[derive(Deserialize)]
    struct SendMessageParams {
        recipient: Recipient,
        subject: String,
        content: String,
    }

    let caller = require_caller(request, app).await?;
    let params: SendMessageParams = read_json(request).await?;
    let message = app.messages
        .send(&caller, params.recipient, &params.subject, &params.content).await
        .or_error_response()?;
    json_response(&message)
}

pub async fn mark_read<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
    id: &str,
) -> Flow {
    let id = parse_id(id)?;
    let caller = require_caller(request, app).await?;
    let changed = app.messages.mark_read(&caller, &id).await.or_error_response()?;
    json_response(&serde_json::json!({ "changed": changed }))
}

pub async fn mark_all_read<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let marked = app.messages.mark_all_read_for(&caller).await.or_error_response()?;
    json_response(&serde_json::json!({ "marked": marked }))
}

pub async fn update_profile<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ProfileParams {
        current_password: String,
        email: Option<String>,
        name: Option<String>,
        new_password: Option<String>,
    }

    let caller = require_caller(request, app).await?;
    let params: ProfileParams = read_json(request).await?;
    let patch = ProfilePatch { email: params.email, name: params.name, new_password: params.new_password };
    let identity = app.directory
        .update_profile(&caller, params.current_password, patch).await
        .or_error_response()?;
    json_response(&identity)
}

pub async fn set_theme<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    #[derive(Deserialize)]
    struct ThemeParams {
        theme: Theme,
    }

    require_caller(request, app).await?;
    let params: ThemeParams = read_json(request).await?;
    app.set_theme(params.theme).await.or_error_response()?;
    json_response(&serde_json::json!({ "theme": params.theme }))
}

pub async fn unlink_channel<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
    username: &str,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let username = url_escape::decode(username);
    let link = app.unlink_channel(&caller, &username).await.or_error_response()?;
    json_response(&link)
}

/// Entry point for chat updates. Accepts the `{"message": {"chat": {"id": ..}, "text": ..}}`
/// shape bot platforms post; anything without text is acknowledged and ignored.
pub async fn bot_webhook<T: AsyncRead + Unpin>(
    request: &mut Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    #[derive(Deserialize)]
    struct Update {
        message: Option<UpdateMessage>,
    }

    #[derive(Deserialize)]
    struct UpdateMessage {
        chat: Chat,
        text: Option<String>,
    }

    #[derive(Deserialize)]
    struct Chat {
        id: serde_json::Value,
    }

    let update: Update = read_json(request).await?;
    let (chat, text) = match update.message {
        Some(UpdateMessage { chat, text: Some(text) }) => (chat, text),
        _ => {
            debug!("ignoring chat update without text");
            return json_response(&serde_json::json!({ "ok": true }));
        },
    };
    let chat_id = match chat.id {
        serde_json::Value::String(id) => id,
        other => other.to_string(),
    };

    let reply = app.relay.handle_update(&chat_id, &text).await.or_error_response()?;
    json_response(&serde_json::json!({ "ok": true, "reply": reply }))
}

pub async fn subscribe_notifications<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = require_caller(request, app).await?;
    let projections = app.notifications.subscribe(caller).await.or_error_response()?;

    let mut next_id: u64 = 0;
    let stream = async_utils::pipe_unbounded_channel(projections, move |projection| {
        next_id += 1;
        match html::notifications_element(&projection) {
            Ok(data) => Some(EventSourceEvent {
                data,
                id: next_id.to_string(),
                event: Some(NOTIFICATIONS_EVENT.to_owned()),
            }),
            Err(e) => {
                log_internal_error(e);
                None
            },
        }
    });

    Ok(Response::EventSource { retry: None, stream })
}
