use std::collections::HashMap;

use herald_core::authorization::AuthService;
use herald_core::dashboard::Dashboard;
use herald_core::data_access::DataAccess;
use herald_core::error::Result;
use herald_core::relay::NotificationChannel;
use herald_core::Identity;
use herald_utils::http::{get_cookies_hashmap, header_clear_cookie, header_set_cookie, Header};
use herald_utils::utils::CaseInsensitiveString;

pub const SESSION_TOKEN_COOKIE: &str = "_herald_token";

pub fn session_token(headers: &HashMap<CaseInsensitiveString, String>) -> Option<String> {
    // a mangled cookie header counts as no session at all
    let cookies = get_cookies_hashmap(headers).ok()?;
    cookies.get(SESSION_TOKEN_COOKIE).cloned()
}

/// The identity behind the request, if its cookie holds the live session token.
pub async fn caller<D: DataAccess, A: AuthService, C: NotificationChannel>(
    app: &Dashboard<D, A, C>,
    headers: &HashMap<CaseInsensitiveString, String>,
) -> Result<Option<Identity>> {
    let token = match session_token(headers) {
        Some(token) => token,
        None => return Ok(None),
    };
    let session = app.sessions.authenticate(&token).await?;
    Ok(session.map(|session| session.identity))
}

pub fn set_session_cookie(token: &str) -> Header {
    header_set_cookie(SESSION_TOKEN_COOKIE, token)
}

pub fn clear_session_cookie() -> Header {
    header_clear_cookie(SESSION_TOKEN_COOKIE)
}
