use std::hash::Hash;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaseInsensitiveString(String);

impl From<&str> for CaseInsensitiveString {
    fn from(value: &str) -> Self {
        Self(value.to_lowercase())
    }
}

impl std::fmt::Display for CaseInsensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn log_internal_error(error: impl std::fmt::Display) {
    tracing::error!("internal error: {:#}", error);
}

/// Same rule the login form and the directory use to tell an email from a username:
/// something, an `@`, something, a dot, something, with no whitespace anywhere.
pub fn is_email_shaped(input: &str) -> bool {
    if input.chars().any(char::is_whitespace) {
        return false;
    }
    let (local, domain) = match input.split_once('@') {
        Some(parts) => parts,
        None => return false,
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}
