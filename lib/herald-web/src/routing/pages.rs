use tokio::io::AsyncRead;

use herald_core::authorization::AuthService;
use herald_core::dashboard::Dashboard;
use herald_core::data_access::DataAccess;
use herald_core::relay::NotificationChannel;
use herald_core::routing::{self, RedirectTarget};
use herald_core::Identity;
use http_server::{Request, Response};

use crate::flow_controller::{Flow, HttpResponseContextExtension};
use crate::routing::html;
use crate::sessions;

pub async fn root<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = sessions::caller(app, request.headers()).await.or_server_error()?;
    let target = match caller {
        Some(identity) => RedirectTarget::home_of(identity.role),
        None => RedirectTarget::Login,
    };
    Ok(Response::redirect(target.path()))
}

pub async fn login<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let caller = sessions::caller(app, request.headers()).await.or_server_error()?;
    if let Some(target) = routing::enforce(caller.as_ref(), request.path()) {
        return Ok(Response::redirect(target.path()));
    }

    let theme = app.theme().await.or_server_error()?;
    let content = html::login_page(theme, "", None).or_server_error()?;
    Ok(Response::html(content))
}

pub async fn admin_dashboard<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let identity = page_caller(request, app).await?;
    let content = html::admin_page(app, identity).await.or_server_error()?;
    Ok(Response::html(content))
}

pub async fn user_dashboard<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow {
    let identity = page_caller(request, app).await?;
    let content = html::user_page(app, identity).await.or_server_error()?;
    Ok(Response::html(content))
}

/// Runs the role router for the requested page and hands back the identity allowed to see it.
async fn page_caller<T: AsyncRead + Unpin>(
    request: &Request<T>,
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
) -> Flow<Identity> {
    let caller = sessions::caller(app, request.headers()).await.or_server_error()?;
    if let Some(target) = routing::enforce(caller.as_ref(), request.path()) {
        return Err(Response::redirect(target.path()));
    }
    caller.ok_or_else(|| Response::redirect(routing::LOGIN_PATH))
}
