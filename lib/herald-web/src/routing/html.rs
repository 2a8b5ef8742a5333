use anyhow::{Context, Result};
use askama::Template;
use chrono::{DateTime, Utc};

use herald_core::authorization::AuthService;
use herald_core::dashboard::{AdminOverview, Dashboard};
use herald_core::data_access::DataAccess;
use herald_core::notifications::Projection;
use herald_core::relay::NotificationChannel;
use herald_core::{ChannelLink, Identity, InboxMessage, Message, Recipient, Theme};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Template)]
#[template(path = "login.html")]
struct LoginPage<'a> {
    theme: Theme,
    identifier: &'a str,
    error: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "admin.html")]
struct AdminPage {
    theme: Theme,
    identity: Identity,
    signed_in_at: String,
    overview: AdminOverview,
    users: Vec<Identity>,
    sent: Vec<SentRow>,
    channels: Vec<ChannelLink>,
    projection: Projection,
}

struct SentRow {
    message: Message,
    recipient: String,
}

#[derive(Template)]
#[template(path = "user.html")]
struct UserPage {
    theme: Theme,
    identity: Identity,
    signed_in_at: String,
    inbox: Vec<InboxMessage>,
    channel: Option<ChannelLink>,
    projection: Projection,
}

#[derive(Template)]
#[template(path = "elements/notifications.html")]
struct NotificationsElement<'a> {
    projection: &'a Projection,
}

pub fn login_page(theme: Theme, identifier: &str, error: Option<&str>) -> Result<String> {
    LoginPage { theme, identifier, error }.render().context("Could not render login.html")
}

pub async fn admin_page(
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
    identity: Identity,
) -> Result<String> {
    let theme = app.theme().await?;
    let overview = app.admin_overview(&identity, Utc::now()).await?;
    let users = app.directory.list(&identity).await?;
    let channels = app.channels(&identity).await?;
    let projection = app.notifications.project(&identity).await?;
    let signed_in_at = format_login(app.sessions.last_login(&identity.id).await?);

    let sent = app.messages
        .list_sent_by(&identity).await?
        .into_iter()
        .map(|message| {
            let recipient = recipient_label(&message.recipient, &users);
            SentRow { message, recipient }
        })
        .collect();

    AdminPage { theme, identity, signed_in_at, overview, users, sent, channels, projection }
        .render()
        .context("Could not render admin.html")
}

pub async fn user_page(
    app: &Dashboard<impl DataAccess, impl AuthService, impl NotificationChannel>,
    identity: Identity,
) -> Result<String> {
    let theme = app.theme().await?;
    let inbox = app.messages.list_for(&identity).await?;
    let projection = Projection::from_inbox(inbox.clone());
    let channel = app.own_channel(&identity).await?;
    let signed_in_at = format_login(app.sessions.last_login(&identity.id).await?);

    UserPage { theme, identity, signed_in_at, inbox, channel, projection }
        .render()
        .context("Could not render user.html")
}

pub fn notifications_element(projection: &Projection) -> Result<String> {
    NotificationsElement { projection }
        .render()
        .context("Could not render elements/notifications.html")
}

fn recipient_label(recipient: &Recipient, users: &[Identity]) -> String {
    match recipient {
        Recipient::All => "All users".to_owned(),
        Recipient::Identity(id) => users
            .iter()
            .find(|user| user.id == *id)
            .map_or_else(|| "(removed user)".to_owned(), |user| user.display_name().to_owned()),
    }
}

fn format_login(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.format(DATE_FORMAT).to_string(),
        None => "never".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn message(subject: &str) -> Message {
        Message {
            id: uuid::Uuid::now_v7(),
            subject: subject.to_owned(),
            content: "body".to_owned(),
            sender: uuid::Uuid::new_v4(),
            sender_name: "Admin User".to_owned(),
            recipient: Recipient::All,
            timestamp: Utc::now(),
            read_by: BTreeSet::new(),
        }
    }

    #[test]
    fn user_text_is_escaped() {
        let projection = Projection {
            unread_count: 1,
            preview: vec![message("<script>alert(1)</script>")],
            has_more: false,
        };
        let html = notifications_element(&projection).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn notifications_mention_more_when_truncated() {
        let projection = Projection { unread_count: 7, preview: vec![message("one")], has_more: true };
        let html = notifications_element(&projection).unwrap();
        assert!(html.contains("7"));
        assert!(html.contains("View all"));

        let quiet = Projection { unread_count: 0, preview: vec![], has_more: false };
        assert!(notifications_element(&quiet).unwrap().contains("No new messages"));
    }

    #[test]
    fn failed_login_keeps_identifier_and_shows_error() {
        let html = login_page(Theme::Dark, "alice", Some("Invalid username or password")).unwrap();
        assert!(html.contains("value=\"alice\""));
        assert!(html.contains("Invalid username or password"));
        assert!(html.contains("theme-dark"));
    }
}
