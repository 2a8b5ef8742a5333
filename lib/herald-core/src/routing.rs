//! Role router: keeps every identity on the dashboard of its role.

use crate::{Identity, Role};

pub const LOGIN_PATH: &str = "/login.html";
pub const ADMIN_HOME_PATH: &str = "/dashboard/admin.html";
pub const USER_HOME_PATH: &str = "/dashboard/user.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectTarget {
    Login,
    AdminHome,
    UserHome,
}

impl RedirectTarget {
    pub fn home_of(role: Role) -> Self {
        match role {
            Role::Admin => RedirectTarget::AdminHome,
            Role::User => RedirectTarget::UserHome,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            RedirectTarget::Login => LOGIN_PATH,
            RedirectTarget::AdminHome => ADMIN_HOME_PATH,
            RedirectTarget::UserHome => USER_HOME_PATH,
        }
    }
}

/// Decides whether `identity` may stay on `current_path`. Rules apply in order; the first match wins.
pub fn enforce(identity: Option<&Identity>, current_path: &str) -> Option<RedirectTarget> {
    let path = strip_query(current_path);
    match identity {
        None if path != LOGIN_PATH => Some(RedirectTarget::Login),
        None => None,
        Some(identity) if path == LOGIN_PATH => Some(RedirectTarget::home_of(identity.role)),
        Some(identity) => match (identity.role, path) {
            (Role::Admin, USER_HOME_PATH) => Some(RedirectTarget::AdminHome),
            (Role::User, ADMIN_HOME_PATH) => Some(RedirectTarget::UserHome),
            _ => None,
        },
    }
}

fn strip_query(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}
