use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use herald_utils::utils::is_email_shaped;

use crate::authorization::AuthService;
use crate::data_access::{DataAccess, SessionSlot};
use crate::error::{Error, Result};
use crate::routing::{self, RedirectTarget};
use crate::{Identity, IdentityId, Session, SessionToken, Status};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Anonymous,
    Authenticated(Session),
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub redirect: RedirectTarget,
    pub previous_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Restoration {
    pub session: Option<Session>,
    pub redirect: Option<RedirectTarget>,
}

/// Owns the single session slot of a storage scope and the login/logout lifecycle.
#[derive(Clone)]
pub struct SessionStore<D, A> {
    data_access: D,
    auth: A,
    state: Arc<RwLock<SessionState>>,
}

impl<D: DataAccess, A: AuthService> SessionStore<D, A> {
    pub fn new(data_access: D, auth: A) -> Self {
        let state = Arc::new(RwLock::new(SessionState::Anonymous));
        SessionStore { data_access, auth, state }
    }

    pub fn state(&self) -> SessionState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        match self.state() {
            SessionState::Authenticated(session) => Some(session.identity),
            SessionState::Anonymous => None,
        }
    }

    pub async fn login(&self, identifier: &str, password: String) -> Result<LoginOutcome> {
        let identifier = identifier.trim();
        if identifier.is_empty() || password.is_empty() {
            return Err(Error::validation("credentials", "enter both username/email and password"));
        }

        let identity = if is_email_shaped(identifier) {
            self.data_access.find_identity_by_email(identifier).await
        } else {
            self.data_access.find_identity_by_username(identifier).await
        }
        .with_context(|| format!("Couldn't look up identity {identifier}"))?
        .ok_or(Error::NotFound("user"))?;

        let verified = self.auth
            .verify_user(&identity.id, password).await
            .with_context(|| format!("Couldn't verify credentials of {}", identity.id))?;
        if !verified {
            info!(username = %identity.username, "login rejected: bad credential");
            return Err(Error::BadCredential);
        }
        if identity.status == Status::Suspended {
            return Err(Error::Forbidden("this account is suspended"));
        }

        let session = Session { token: SessionToken::generate(), identity };
        self.persist(&session).await?;

        let previous_login = self.data_access
            .record_last_login(&session.identity.id, Utc::now()).await
            .with_context(|| format!("Couldn't record last login of {}", session.identity.id))?;

        info!(username = %session.identity.username, role = %session.identity.role, "logged in");
        let redirect = RedirectTarget::home_of(session.identity.role);
        Ok(LoginOutcome { session, redirect, previous_login })
    }

    pub async fn logout(&self) -> Result<RedirectTarget> {
        self.data_access.clear_session_slot().await.context("Couldn't clear session slot")?;
        if let Some(identity) = self.current_identity() {
            info!(username = %identity.username, "logged out");
        }
        self.set_state(SessionState::Anonymous);
        Ok(RedirectTarget::Login)
    }

    /// Rehydrates the session from the slot and asks the role router about `current_path`.
    /// A damaged slot is cleared and treated as a logout.
    pub async fn restore(&self, current_path: &str) -> Result<Restoration> {
        let session = self.load_slot().await?;
        let redirect = routing::enforce(session.as_ref().map(|session| &session.identity), current_path);
        Ok(Restoration { session, redirect })
    }

    /// The current session, provided the caller holds its token.
    pub async fn authenticate(&self, token: &str) -> Result<Option<Session>> {
        let session = self.load_slot().await?;
        Ok(session.filter(|session| session.token.as_str() == token))
    }

    /// Keeps the snapshot in the slot in step with an edited identity.
    pub async fn refresh_snapshot(&self, identity: &Identity) -> Result<()> {
        let session = match self.load_slot().await? {
            Some(session) if session.identity.id == identity.id => session,
            _ => return Ok(()),
        };
        let refreshed = Session { token: session.token, identity: identity.clone() };
        self.persist(&refreshed).await
    }

    pub async fn last_login(&self, id: &IdentityId) -> Result<Option<DateTime<Utc>>> {
        let res = self.data_access
            .fetch_last_login(id).await
            .with_context(|| format!("Couldn't fetch last login of {id}"))?;
        Ok(res)
    }

    async fn load_slot(&self) -> Result<Option<Session>> {
        let slot = self.data_access.load_session_slot().await.context("Couldn't load session slot")?;
        let session = match slot {
            None => None,
            Some(slot) => match parse_slot(slot) {
                Ok(session) => Some(session),
                Err(error) => {
                    warn!("{error}, forcing logout");
                    self.data_access.clear_session_slot().await.context("Couldn't clear corrupt session slot")?;
                    None
                }
            },
        };

        match &session {
            Some(session) => self.set_state(SessionState::Authenticated(session.clone())),
            None => self.set_state(SessionState::Anonymous),
        }
        Ok(session)
    }

    async fn persist(&self, session: &Session) -> Result<()> {
        let identity = serde_json::to_string(&session.identity).context("Couldn't serialize identity snapshot")?;
        let slot = SessionSlot { token: session.token.to_string(), identity };
        self.data_access.store_session_slot(slot).await.context("Couldn't store session slot")?;
        self.set_state(SessionState::Authenticated(session.clone()));
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

fn parse_slot(slot: SessionSlot) -> Result<Session> {
    if slot.token.is_empty() {
        return Err(Error::CorruptState("empty session token".into()));
    }
    let identity: Identity = serde_json::from_str(&slot.identity)
        .map_err(|e| Error::CorruptState(format!("unreadable identity snapshot: {e}")))?;
    Ok(Session { token: slot.token.into(), identity })
}
