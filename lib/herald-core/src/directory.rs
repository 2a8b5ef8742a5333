use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use herald_utils::utils::{is_email_shaped, log_internal_error};

use crate::authorization::AuthService;
use crate::data_access::{DataAccess, InsertOutcome, UpdateOutcome};
use crate::error::{Error, Result};
use crate::events::{DashboardEvent, EventBus};
use crate::sessions::SessionStore;
use crate::{Identity, IdentityId, Role, Status};

const NEW_USER_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub status: Option<Status>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedSummary {
    pub id: IdentityId,
    pub username: String,
    pub removed_messages: usize,
    pub channel_unlinked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryStats {
    pub total_users: usize,
    pub new_users: usize,
    pub active_users: usize,
}

#[derive(Clone)]
pub struct UserDirectory<D, A> {
    data_access: D,
    auth: A,
    sessions: SessionStore<D, A>,
    events: EventBus,
}

impl<D: DataAccess, A: AuthService> UserDirectory<D, A> {
    pub fn new(data_access: D, auth: A, sessions: SessionStore<D, A>, events: EventBus) -> Self {
        UserDirectory { data_access, auth, sessions, events }
    }

    pub async fn list(&self, caller: &Identity) -> Result<Vec<Identity>> {
        require_admin(caller)?;
        let identities = self.data_access.fetch_identities().await.context("Couldn't fetch identities")?;
        Ok(identities)
    }

    pub async fn fetch(&self, id: &IdentityId) -> Result<Option<Identity>> {
        let identity = self.data_access
            .fetch_identity(id).await
            .with_context(|| format!("Couldn't fetch identity {id}"))?;
        Ok(identity)
    }

    /// Self-service sign-up; always creates a regular user.
    pub async fn register(&self, candidate: NewIdentity) -> Result<Identity> {
        self.insert(candidate, Role::User).await
    }

    /// Admin-initiated creation; the candidate may ask for any role.
    pub async fn create(&self, caller: &Identity, candidate: NewIdentity) -> Result<Identity> {
        require_admin(caller)?;
        let role = candidate.role.unwrap_or(Role::User);
        self.insert(candidate, role).await
    }

    /// Admin edit of any identity. Without admin rights only one's own name and email can change;
    /// a password change by its owner goes through [`Self::update_profile`].
    pub async fn update(&self, caller: &Identity, id: &IdentityId, patch: IdentityPatch) -> Result<Identity> {
        if !caller.is_admin() {
            let privileged = patch.username.is_some()
                || patch.role.is_some()
                || patch.status.is_some()
                || patch.password.is_some();
            if caller.id != *id || privileged {
                return Err(Error::Unauthorized);
            }
        }
        self.apply_update(caller, id, patch).await
    }

    async fn apply_update(&self, caller: &Identity, id: &IdentityId, patch: IdentityPatch) -> Result<Identity> {
        let mut identity = self.fetch(id).await?.ok_or(Error::NotFound("user"))?;
        let previous_username = identity.username.clone();

        if identity.is_admin() {
            let demoted = patch.role.is_some_and(|role| role != Role::Admin);
            let deactivated = patch.status.is_some_and(|status| status != Status::Active);
            if demoted || deactivated {
                return Err(Error::Forbidden("the admin account cannot be demoted or deactivated"));
            }
        }

        if let Some(username) = patch.username {
            identity.username = required("username", &username)?;
        }
        if let Some(email) = patch.email {
            identity.email = valid_email(&email)?;
        }
        if let Some(name) = patch.name {
            identity.name = optional(&name);
        }
        if let Some(role) = patch.role {
            identity.role = role;
        }
        if let Some(status) = patch.status {
            identity.status = status;
        }

        match self.data_access
            .update_identity(&identity).await
            .with_context(|| format!("Couldn't update identity {id}"))? {
            UpdateOutcome::Updated => {}
            UpdateOutcome::Missing => return Err(Error::NotFound("user")),
            UpdateOutcome::Taken(field) => return Err(Error::Conflict(field)),
        }

        if previous_username != identity.username {
            // channel links are keyed by username
            let link = self.data_access
                .unlink_channel(&previous_username).await
                .with_context(|| format!("Couldn't unlink channel of {previous_username}"))?;
            if let Some(mut link) = link {
                link.username = identity.username.clone();
                self.data_access
                    .link_channel(&link).await
                    .with_context(|| format!("Couldn't relink channel to {}", identity.username))?;
            }
        }

        if let Some(password) = patch.password.filter(|password| !password.is_empty()) {
            self.auth
                .create_user(id, password).await
                .with_context(|| format!("Couldn't replace credential of {id}"))?;
        }

        self.sessions.refresh_snapshot(&identity).await?;
        info!(username = %identity.username, by = %caller.username, "identity updated");
        Ok(identity)
    }

    /// Edit of one's own profile, gated by the current password.
    pub async fn update_profile(&self, caller: &Identity, current_password: String, patch: ProfilePatch) -> Result<Identity> {
        if current_password.is_empty() {
            return Err(Error::validation("current password", "required"));
        }
        let verified = self.auth
            .verify_user(&caller.id, current_password).await
            .with_context(|| format!("Couldn't verify credentials of {}", caller.id))?;
        if !verified {
            return Err(Error::BadCredential);
        }

        let patch = IdentityPatch {
            email: patch.email,
            name: patch.name,
            password: patch.new_password,
            ..IdentityPatch::default()
        };
        self.apply_update(caller, &caller.id, patch).await
    }

    pub async fn delete(&self, caller: &Identity, id: &IdentityId) -> Result<DeletedSummary> {
        require_admin(caller)?;
        let target = self.fetch(id).await?.ok_or(Error::NotFound("user"))?;
        if target.is_admin() {
            return Err(Error::Forbidden("the admin account cannot be deleted"));
        }

        // dependents first, the identity record goes last
        let removed_messages = self.data_access
            .delete_messages_to(id).await
            .with_context(|| format!("Couldn't delete messages addressed to {id}"))?;
        let channel_unlinked = self.data_access
            .unlink_channel(&target.username).await
            .with_context(|| format!("Couldn't unlink channel of {}", target.username))?
            .is_some();
        self.data_access
            .forget_last_login(id).await
            .with_context(|| format!("Couldn't forget last login of {id}"))?;
        self.auth
            .remove_user(id).await
            .with_context(|| format!("Couldn't remove credential of {id}"))?;
        self.data_access
            .delete_identity(id).await
            .with_context(|| format!("Couldn't delete identity {id}"))?
            .ok_or(Error::NotFound("user"))?;

        info!(username = %target.username, removed_messages, channel_unlinked, "identity deleted");
        self.events.publish(DashboardEvent::IdentityDeleted { id: *id, username: target.username.clone() });

        Ok(DeletedSummary { id: *id, username: target.username, removed_messages, channel_unlinked })
    }

    pub async fn stats(&self, caller: &Identity, now: DateTime<Utc>) -> Result<DirectoryStats> {
        let identities = self.list(caller).await?;
        let window_start = now - Duration::days(NEW_USER_WINDOW_DAYS);

        let stats = identities
            .iter()
            .filter(|identity| identity.role == Role::User)
            .fold(DirectoryStats::default(), |mut stats, identity| {
                stats.total_users += 1;
                if identity.created_at > window_start {
                    stats.new_users += 1;
                }
                if identity.status == Status::Active {
                    stats.active_users += 1;
                }
                stats
            });
        Ok(stats)
    }

    async fn insert(&self, candidate: NewIdentity, role: Role) -> Result<Identity> {
        let username = required("username", &candidate.username)?;
        let email = valid_email(&candidate.email)?;
        if candidate.password.trim().is_empty() {
            return Err(Error::validation("password", "required"));
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            username,
            email,
            name: candidate.name.as_deref().and_then(optional),
            role,
            status: Status::Active,
            created_at: Utc::now(),
        };

        match self.data_access
            .insert_identity(&identity).await
            .with_context(|| format!("Couldn't create identity {}", identity.username))? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Taken(field) => return Err(Error::Conflict(field)),
        }

        if let Err(e) = self.auth.create_user(&identity.id, candidate.password).await {
            // an identity without a credential could never log in, take it back out
            if let Err(cleanup) = self.data_access.delete_identity(&identity.id).await {
                log_internal_error(cleanup);
            }
            let error = anyhow::Error::new(e).context(format!("Couldn't store credential of {}", identity.username));
            return Err(error.into());
        }

        info!(username = %identity.username, role = %identity.role, "identity created");
        self.events.publish(DashboardEvent::IdentityCreated(identity.clone()));
        Ok(identity)
    }

    /// Creates the given accounts when the directory is still empty.
    pub(crate) async fn seed(&self, accounts: Vec<NewIdentity>) -> Result<usize> {
        let existing = self.data_access.fetch_identities().await.context("Couldn't fetch identities")?;
        if !existing.is_empty() {
            return Ok(0);
        }
        let mut created = 0;
        for account in accounts {
            let role = account.role.unwrap_or(Role::User);
            match self.insert(account, role).await {
                Ok(_) => created += 1,
                Err(e) => warn!("couldn't seed default account: {e}"),
            }
        }
        Ok(created)
    }
}

fn require_admin(caller: &Identity) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

fn required(field: &'static str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(Error::validation(field, "required"))
    } else {
        Ok(value.to_owned())
    }
}

fn valid_email(value: &str) -> Result<String> {
    let email = required("email", value)?;
    if is_email_shaped(&email) {
        Ok(email)
    } else {
        Err(Error::validation("email", "not a valid email address"))
    }
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}
