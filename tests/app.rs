use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use herald_auth::Argon2Auth;
use herald_core::authorization::AuthService;
use herald_core::dashboard::{default_accounts, Dashboard, DEFAULT_ADMIN_PASSWORD};
use herald_core::data_access::{ProfileStorage, SessionSlot};
use herald_core::directory::{IdentityPatch, NewIdentity, ProfilePatch};
use herald_core::events::DashboardEvent;
use herald_core::relay::SimulatedBot;
use herald_core::routing::RedirectTarget;
use herald_core::sessions::SessionState;
use herald_core::{ConflictField, Error, Identity, Recipient, Role, Status};

type App = Dashboard<mock_db::Db, Argon2Auth<mock_db::Db>, SimulatedBot>;

fn new_app() -> (App, SimulatedBot) {
    let db = mock_db::Db::new();
    let bot = SimulatedBot::new();
    let app = Dashboard::new(db.clone(), Argon2Auth::new(db), bot.clone());
    (app, bot)
}

fn candidate(username: &str) -> NewIdentity {
    NewIdentity {
        username: username.to_owned(),
        email: format!("{username}@example.com"),
        password: format!("{username}-secret"),
        ..NewIdentity::default()
    }
}

/// A fresh dashboard with the default admin logged in, plus one regular user.
async fn app_with_admin_and_alice() -> (App, SimulatedBot, Identity, Identity) {
    let (app, bot) = new_app();
    app.bootstrap(default_accounts(DEFAULT_ADMIN_PASSWORD, false)).await.unwrap();
    let admin = app.sessions.login("admin", DEFAULT_ADMIN_PASSWORD.into()).await.unwrap().session.identity;
    let alice = app.directory.register(candidate("alice")).await.unwrap();
    (app, bot, admin, alice)
}

#[tokio::test]
async fn admin_cannot_be_deleted_and_user_deletion_cascades() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    app.messages.send(&admin, Recipient::Identity(alice.id), "Personal", "Just for you").await.unwrap();
    let broadcast = app.messages.send(&admin, Recipient::All, "Everyone", "Hello all").await.unwrap();

    let res = app.directory.delete(&admin, &admin.id).await;
    assert!(matches!(res, Err(Error::Forbidden(_))));

    let summary = app.directory.delete(&admin, &alice.id).await.unwrap();
    assert_eq!(summary.removed_messages, 1);

    let remaining = app.directory.list(&admin).await.unwrap();
    assert!(remaining.iter().all(|identity| identity.id != alice.id));

    let sent = app.messages.list_sent_by(&admin).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, broadcast.id);
}

#[tokio::test]
async fn broadcast_read_receipts_are_per_recipient() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    let bob = app.directory.register(candidate("bob")).await.unwrap();

    let message = app.messages.send(&admin, Recipient::All, "Hi", "Welcome").await.unwrap();
    for identity in [&alice, &bob] {
        let inbox = app.messages.list_for(identity).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].message.id, message.id);
        assert!(!inbox[0].read);
    }

    assert!(app.messages.mark_read(&alice, &message.id).await.unwrap());

    assert!(app.messages.list_for(&alice).await.unwrap()[0].read);
    assert!(!app.messages.list_for(&bob).await.unwrap()[0].read);
}

#[tokio::test]
async fn wrong_password_leaves_session_anonymous() {
    let (app, _) = new_app();
    app.bootstrap(default_accounts(DEFAULT_ADMIN_PASSWORD, false)).await.unwrap();

    let res = app.sessions.login("admin", "wrongpass".into()).await;
    assert!(matches!(res, Err(Error::BadCredential)));
    assert_eq!(app.sessions.state(), SessionState::Anonymous);

    let restoration = app.sessions.restore("/dashboard/admin.html").await.unwrap();
    assert!(restoration.session.is_none());
    assert_eq!(restoration.redirect, Some(RedirectTarget::Login));
}

#[tokio::test]
async fn login_by_email_lands_on_role_home() {
    let (app, _, _, alice) = app_with_admin_and_alice().await;

    let outcome = app.sessions.login(&alice.email, "alice-secret".into()).await.unwrap();
    assert_eq!(outcome.redirect, RedirectTarget::UserHome);
    assert_eq!(outcome.previous_login, None);

    let restoration = app.sessions.restore("/dashboard/admin.html").await.unwrap();
    assert_eq!(restoration.session.map(|session| session.identity.id), Some(alice.id));
    assert_eq!(restoration.redirect, Some(RedirectTarget::UserHome));

    let again = app.sessions.login("alice", "alice-secret".into()).await.unwrap();
    assert!(again.previous_login.is_some());

    assert_eq!(app.sessions.logout().await.unwrap(), RedirectTarget::Login);
    assert_eq!(app.sessions.state(), SessionState::Anonymous);
}

#[tokio::test]
async fn unknown_and_suspended_accounts_cannot_log_in() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;

    let res = app.sessions.login("nobody", "whatever".into()).await;
    assert!(matches!(res, Err(Error::NotFound(_))));

    let patch = IdentityPatch { status: Some(Status::Suspended), ..IdentityPatch::default() };
    app.directory.update(&admin, &alice.id, patch).await.unwrap();
    let res = app.sessions.login("alice", "alice-secret".into()).await;
    assert!(matches!(res, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn registration_conflicts_are_case_sensitive() {
    let (app, _, _, alice) = app_with_admin_and_alice().await;

    let res = app.directory.register(candidate("alice")).await;
    assert!(matches!(res, Err(Error::Conflict(ConflictField::Username))));

    let mut same_email = candidate("Alice");
    same_email.email = alice.email.clone();
    let res = app.directory.register(same_email).await;
    assert!(matches!(res, Err(Error::Conflict(ConflictField::Email))));

    let different_case = app.directory.register(candidate("Alice")).await.unwrap();
    assert_eq!(different_case.username, "Alice");
    assert_eq!(different_case.role, Role::User);
}

#[tokio::test]
async fn broadcasts_reach_users_created_later_but_not_admins() {
    let (app, _, admin, _) = app_with_admin_and_alice().await;
    let message = app.messages.send(&admin, Recipient::All, "Maintenance", "Tonight at 10").await.unwrap();

    let carol = app.directory.register(candidate("carol")).await.unwrap();
    let inbox = app.messages.list_for(&carol).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message.id, message.id);

    assert!(app.messages.list_for(&admin).await.unwrap().is_empty());
}

#[tokio::test]
async fn marking_read_twice_is_harmless() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    let message = app.messages.send(&admin, Recipient::Identity(alice.id), "Ping", "Pong").await.unwrap();

    assert!(app.messages.mark_read(&alice, &message.id).await.unwrap());
    assert!(!app.messages.mark_read(&alice, &message.id).await.unwrap());
    assert!(app.messages.list_for(&alice).await.unwrap()[0].read);
}

#[tokio::test]
async fn sent_message_comes_first() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    app.messages.send(&admin, Recipient::All, "First", "one").await.unwrap();
    let latest = app.messages.send(&admin, Recipient::Identity(alice.id), "Second", "two").await.unwrap();

    let sent = app.messages.list_sent_by(&admin).await.unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].id, latest.id);
}

#[tokio::test]
async fn only_admins_send_messages() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    let res = app.messages.send(&alice, Recipient::Identity(admin.id), "Hey", "Can I send?").await;
    assert!(matches!(res, Err(Error::Unauthorized)));

    let res = app.messages.send(&admin, Recipient::All, "   ", "No subject").await;
    assert!(matches!(res, Err(Error::Validation { field: "subject", .. })));
}

#[tokio::test]
async fn notification_stream_follows_unread_state() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    let mut projections = app.notifications.subscribe(alice.clone()).await.unwrap();

    let initial = projections.recv().await.unwrap();
    assert_eq!(initial.unread_count, 0);

    let message = app.messages.send(&admin, Recipient::All, "News", "Fresh").await.unwrap();
    let after_send = projections.recv().await.unwrap();
    assert_eq!(after_send.unread_count, 1);
    assert_eq!(after_send.preview[0].id, message.id);

    app.messages.mark_all_read_for(&alice).await.unwrap();
    let after_read = projections.recv().await.unwrap();
    assert_eq!(after_read.unread_count, 0);

    app.directory.delete(&admin, &alice.id).await.unwrap();
    assert!(projections.recv().await.is_none());
}

#[tokio::test]
async fn linked_chat_receives_direct_messages() {
    let (app, bot, admin, alice) = app_with_admin_and_alice().await;

    let reply = app.relay.handle_update("42", "/register alice wrong").await.unwrap();
    assert!(reply.contains("Invalid password"));

    let reply = app.relay.handle_update("42", "/register alice alice-secret").await.unwrap();
    assert!(reply.contains("registered"));
    assert_eq!(app.own_channel(&alice).await.unwrap().map(|link| link.chat_id), Some("42".to_owned()));

    let message = app.messages.send(&admin, Recipient::Identity(alice.id), "Invoice", "Due Friday").await.unwrap();
    let delivered = app.relay.handle_event(&DashboardEvent::MessageSent(message)).await.unwrap();
    assert_eq!(delivered, 1);

    let (chat, text) = bot.sent().pop().unwrap();
    assert_eq!(chat, "42");
    assert!(text.contains("Invoice"));

    let reply = app.relay.handle_update("42", "/unregister").await.unwrap();
    assert!(reply.contains("unregistered"));
    assert!(app.own_channel(&alice).await.unwrap().is_none());
}

#[tokio::test]
async fn renaming_a_user_keeps_their_chat() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    app.relay.handle_update("7", "/register alice alice-secret").await.unwrap();

    let patch = IdentityPatch { username: Some("alice2".into()), ..IdentityPatch::default() };
    let renamed = app.directory.update(&admin, &alice.id, patch).await.unwrap();

    let link = app.own_channel(&renamed).await.unwrap().unwrap();
    assert_eq!(link.username, "alice2");
    assert_eq!(link.chat_id, "7");
}

#[tokio::test]
async fn bootstrap_only_seeds_an_empty_directory() {
    let (app, _) = new_app();
    assert_eq!(app.bootstrap(default_accounts(DEFAULT_ADMIN_PASSWORD, true)).await.unwrap(), 2);
    assert_eq!(app.bootstrap(default_accounts(DEFAULT_ADMIN_PASSWORD, true)).await.unwrap(), 0);

    let outcome = app.sessions.login("user", "user123".into()).await.unwrap();
    assert_eq!(outcome.session.identity.name.as_deref(), Some("Demo User"));
}

#[tokio::test]
async fn corrupt_session_slot_reads_as_logged_out() {
    let db = mock_db::Db::new();
    let app = Dashboard::new(db.clone(), Argon2Auth::new(db.clone()), SimulatedBot::new());
    let slot = SessionSlot { token: "abc".into(), identity: "{not json".into() };
    db.store_session_slot(slot.clone()).await.unwrap();

    let restoration = app.sessions.restore("/dashboard/user.html").await.unwrap();
    assert!(restoration.session.is_none());
    assert_eq!(restoration.redirect, Some(RedirectTarget::Login));
    assert_eq!(app.sessions.state(), SessionState::Anonymous);
    assert_eq!(db.load_session_slot().await.unwrap(), None);

    db.store_session_slot(slot).await.unwrap();
    assert!(app.sessions.authenticate("abc").await.unwrap().is_none());
    assert_eq!(db.load_session_slot().await.unwrap(), None);
}

#[tokio::test]
async fn editing_the_logged_in_identity_refreshes_the_session() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    let token = app.sessions.login("alice", "alice-secret".into()).await.unwrap().session.token;

    let patch = IdentityPatch { name: Some("Alice Liddell".into()), ..IdentityPatch::default() };
    app.directory.update(&admin, &alice.id, patch).await.unwrap();

    let session = app.sessions.authenticate(token.as_str()).await.unwrap().unwrap();
    assert_eq!(session.identity.name.as_deref(), Some("Alice Liddell"));
}

#[tokio::test]
async fn profile_changes_need_the_current_password() {
    let (app, _, _, alice) = app_with_admin_and_alice().await;
    let patch = ProfilePatch { new_password: Some("looking-glass".into()), ..ProfilePatch::default() };

    let res = app.directory.update_profile(&alice, "wrongpass".into(), patch.clone()).await;
    assert!(matches!(res, Err(Error::BadCredential)));

    app.directory.update_profile(&alice, "alice-secret".into(), patch).await.unwrap();
    let res = app.sessions.login("alice", "alice-secret".into()).await;
    assert!(matches!(res, Err(Error::BadCredential)));
    app.sessions.login("alice", "looking-glass".into()).await.unwrap();
}

#[tokio::test]
async fn update_reports_taken_username_or_email() {
    let (app, _, admin, alice) = app_with_admin_and_alice().await;
    let bob = app.directory.register(candidate("bob")).await.unwrap();

    let patch = IdentityPatch { username: Some(alice.username.clone()), ..IdentityPatch::default() };
    let res = app.directory.update(&admin, &bob.id, patch).await;
    assert!(matches!(res, Err(Error::Conflict(ConflictField::Username))));

    let patch = IdentityPatch { email: Some(alice.email.clone()), ..IdentityPatch::default() };
    let res = app.directory.update(&bob, &bob.id, patch).await;
    assert!(matches!(res, Err(Error::Conflict(ConflictField::Email))));

    let stored = app.directory.fetch(&bob.id).await.unwrap().unwrap();
    assert_eq!(stored.username, "bob");
    assert_eq!(stored.email, bob.email);
}

/// Argon2 credentials whose removal can be made to fail.
#[derive(Clone)]
struct FlakyAuth {
    inner: Argon2Auth<mock_db::Db>,
    fail_removal: Arc<AtomicBool>,
}

impl AuthService for FlakyAuth {
    type Error = std::io::Error;

    async fn verify_user(&self, user_id: &uuid::Uuid, password: String) -> Result<bool, Self::Error> {
        self.inner.verify_user(user_id, password).await.map_err(std::io::Error::other)
    }

    async fn create_user(&self, user_id: &uuid::Uuid, password: String) -> Result<(), Self::Error> {
        self.inner.create_user(user_id, password).await.map_err(std::io::Error::other)
    }

    async fn remove_user(&self, user_id: &uuid::Uuid) -> Result<(), Self::Error> {
        if self.fail_removal.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("credential store offline"));
        }
        self.inner.remove_user(user_id).await.map_err(std::io::Error::other)
    }
}

#[tokio::test]
async fn failed_delete_keeps_the_identity_for_a_retry() {
    let db = mock_db::Db::new();
    let fail_removal = Arc::new(AtomicBool::new(false));
    let auth = FlakyAuth { inner: Argon2Auth::new(db.clone()), fail_removal: fail_removal.clone() };
    let app = Dashboard::new(db, auth, SimulatedBot::new());
    app.bootstrap(default_accounts(DEFAULT_ADMIN_PASSWORD, false)).await.unwrap();
    let admin = app.sessions.login("admin", DEFAULT_ADMIN_PASSWORD.into()).await.unwrap().session.identity;
    let alice = app.directory.register(candidate("alice")).await.unwrap();

    fail_removal.store(true, Ordering::SeqCst);
    let res = app.directory.delete(&admin, &alice.id).await;
    assert!(matches!(res, Err(Error::Internal(_))));
    assert!(app.directory.fetch(&alice.id).await.unwrap().is_some());

    fail_removal.store(false, Ordering::SeqCst);
    let summary = app.directory.delete(&admin, &alice.id).await.unwrap();
    assert_eq!(summary.id, alice.id);
    assert!(app.directory.fetch(&alice.id).await.unwrap().is_none());
}

#[tokio::test]
async fn chat_follows_the_latest_registration() {
    let (app, _, _, alice) = app_with_admin_and_alice().await;
    let bob = app.directory.register(candidate("bob")).await.unwrap();

    app.relay.handle_update("9", "/register alice alice-secret").await.unwrap();
    app.relay.handle_update("9", "/register bob bob-secret").await.unwrap();
    assert!(app.own_channel(&alice).await.unwrap().is_none());
    assert_eq!(app.own_channel(&bob).await.unwrap().map(|link| link.chat_id), Some("9".to_owned()));

    app.relay.handle_update("9", "/unregister").await.unwrap();
    assert!(app.own_channel(&bob).await.unwrap().is_none());
    let reply = app.relay.handle_update("9", "/status").await.unwrap();
    assert!(reply.contains("not registered"));
}
