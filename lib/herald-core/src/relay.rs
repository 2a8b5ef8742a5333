//! Outbound notifications to an external chat service and the bot commands people use to
//! link their chat to a dashboard account. The chat service itself is simulated.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use herald_utils::utils::log_internal_error;

use crate::authorization::AuthService;
use crate::data_access::DataAccess;
use crate::error::Result;
use crate::events::{DashboardEvent, EventBus};
use crate::{ChannelLink, Identity, Message, Recipient};

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: u64,
    pub delivered_at: DateTime<Utc>,
}

pub trait NotificationChannel: 'static + Send + Sync + Clone {
    type Error: 'static + std::error::Error + Send + Sync;

    fn send_external_message(&self, channel_id: &str, text: &str) -> async_result!(Delivery);
}

/// Stand-in for a real bot API: logs every message and keeps it in an outbox.
#[derive(Clone, Default)]
pub struct SimulatedBot {
    next_id: Arc<AtomicU64>,
    outbox: Arc<Mutex<Vec<(String, String)>>>,
}

impl SimulatedBot {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(channel id, text)` of everything sent so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl NotificationChannel for SimulatedBot {
    type Error = Infallible;

    async fn send_external_message(&self, channel_id: &str, text: &str) -> Result<Delivery, Self::Error> {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(channel_id, message_id, "bot message: {text}");
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel_id.to_owned(), text.to_owned()));
        Ok(Delivery { message_id, delivered_at: Utc::now() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Status,
    Register { username: String, password: String },
    MalformedRegister,
    Unregister,
    Unknown(String),
    Chat,
}

impl BotCommand {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if !text.starts_with('/') {
            return BotCommand::Chat;
        }

        let mut words = text.split_whitespace();
        let command = words.next().unwrap_or_default();
        // group chats address commands as /command@botname
        let command = command.split('@').next().unwrap_or(command);

        match command {
            "/start" => BotCommand::Start,
            "/help" => BotCommand::Help,
            "/status" => BotCommand::Status,
            "/unregister" => BotCommand::Unregister,
            "/register" => match (words.next(), words.next()) {
                (Some(username), Some(password)) => BotCommand::Register {
                    username: username.to_owned(),
                    password: password.to_owned(),
                },
                _ => BotCommand::MalformedRegister,
            },
            other => BotCommand::Unknown(other.to_owned()),
        }
    }
}

const WELCOME: &str = "👋 Welcome to the Dashboard Bot!\n\n\
    This bot sends you notifications from your Dashboard account.\n\n\
    To register, send /register followed by your username and password:\n\
    /register yourusername yourpassword\n\n\
    Use the same credentials as your Dashboard account.\n\n\
    Type /help for more commands.";

const HELP: &str = "🤖 Dashboard Bot Commands\n\n\
    /start - Start the bot\n\
    /register <username> <password> - Register for notifications\n\
    /unregister - Unregister from notifications\n\
    /help - Show this help message\n\
    /status - Check your notification status";

const REGISTER_USAGE: &str = "Please provide your username and password: /register yourusername yourpassword";
const REGISTERED: &str = "✅ You are now registered for notifications from the Dashboard.";
const INVALID_PASSWORD: &str = "❌ Invalid password. Please try again.";
const NOT_REGISTERED: &str = "❌ You are not registered with this bot.";
const UNREGISTERED: &str = "👋 You have been unregistered from Dashboard notifications.";
const UNKNOWN_COMMAND: &str = "Unknown command. Type /help for available commands.";
const CHAT_HINT: &str = "To interact with the bot, please use commands. Type /help for available commands.";

#[derive(Clone)]
pub struct Relay<D, A, C> {
    data_access: D,
    auth: A,
    channel: C,
}

impl<D: DataAccess, A: AuthService, C: NotificationChannel> Relay<D, A, C> {
    pub fn new(data_access: D, auth: A, channel: C) -> Self {
        Relay { data_access, auth, channel }
    }

    /// Answers one incoming chat message. The reply is sent back to the chat and returned.
    pub async fn handle_update(&self, chat_id: &str, text: &str) -> Result<String> {
        let reply = match BotCommand::parse(text) {
            BotCommand::Start => WELCOME.to_owned(),
            BotCommand::Help => HELP.to_owned(),
            BotCommand::Status => self.status(chat_id).await?,
            BotCommand::Register { username, password } => self.register(chat_id, &username, password).await?,
            BotCommand::MalformedRegister => REGISTER_USAGE.to_owned(),
            BotCommand::Unregister => self.unregister(chat_id).await?,
            BotCommand::Unknown(command) => {
                debug!(chat_id, command, "unknown bot command");
                UNKNOWN_COMMAND.to_owned()
            },
            BotCommand::Chat => CHAT_HINT.to_owned(),
        };

        self.deliver(chat_id, &reply).await?;
        Ok(reply)
    }

    /// Forwards a dashboard event to the linked chats it concerns. Returns how many were notified.
    pub async fn handle_event(&self, event: &DashboardEvent) -> Result<usize> {
        let (targets, text) = match event {
            DashboardEvent::MessageSent(message) => (self.message_targets(message).await?, new_message_text(message)),
            DashboardEvent::IdentityCreated(identity) => (self.admin_targets().await?, new_identity_text(identity)),
            DashboardEvent::IdentityDeleted { .. } | DashboardEvent::MessagesRead { .. } => return Ok(0),
        };

        let mut delivered = 0;
        for link in targets {
            match self.deliver(&link.chat_id, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => log_internal_error(e),
            }
        }
        Ok(delivered)
    }

    /// Runs the relay on every event of `events` until the bus goes away.
    pub fn spawn(self, events: &EventBus) -> JoinHandle<()> {
        let mut receiver = events.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(&event).await {
                            log_internal_error(e);
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "relay fell behind, notifications skipped");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn status(&self, chat_id: &str) -> Result<String> {
        let reply = match self.link_of_chat(chat_id).await? {
            Some(link) => format!(
                "✅ Notifications are on for {} since {}.",
                link.username,
                link.connected_since.format("%Y-%m-%d %H:%M UTC"),
            ),
            None => format!("{NOT_REGISTERED} Type /start to see how to register."),
        };
        Ok(reply)
    }

    async fn register(&self, chat_id: &str, username: &str, password: String) -> Result<String> {
        let identity = self.data_access
            .find_identity_by_username(username).await
            .with_context(|| format!("Couldn't look up identity {username}"))?;
        let Some(identity) = identity else {
            return Ok(format!("❌ User \"{username}\" not found. Please check your username and try again."));
        };

        let verified = self.auth
            .verify_user(&identity.id, password).await
            .with_context(|| format!("Couldn't verify credentials of {}", identity.id))?;
        if !verified {
            return Ok(INVALID_PASSWORD.to_owned());
        }

        // a chat follows one identity at a time
        if let Some(previous) = self.link_of_chat(chat_id).await?.filter(|link| link.username != identity.username) {
            self.data_access
                .unlink_channel(&previous.username).await
                .with_context(|| format!("Couldn't unlink chat of {}", previous.username))?;
            info!(username = %previous.username, chat_id, "chat moved to another identity");
        }

        let link = ChannelLink {
            username: identity.username.clone(),
            chat_id: chat_id.to_owned(),
            connected_since: Utc::now(),
        };
        self.data_access
            .link_channel(&link).await
            .with_context(|| format!("Couldn't link chat {chat_id} to {username}"))?;

        info!(username, chat_id, "chat linked");
        Ok(REGISTERED.to_owned())
    }

    async fn unregister(&self, chat_id: &str) -> Result<String> {
        let Some(link) = self.link_of_chat(chat_id).await? else {
            return Ok(NOT_REGISTERED.to_owned());
        };
        self.data_access
            .unlink_channel(&link.username).await
            .with_context(|| format!("Couldn't unlink chat of {}", link.username))?;

        info!(username = %link.username, chat_id, "chat unlinked");
        Ok(UNREGISTERED.to_owned())
    }

    async fn link_of_chat(&self, chat_id: &str) -> Result<Option<ChannelLink>> {
        let link = self.data_access
            .find_channel_link_by_chat(chat_id).await
            .with_context(|| format!("Couldn't look up chat {chat_id}"))?;
        Ok(link)
    }

    async fn message_targets(&self, message: &Message) -> Result<Vec<ChannelLink>> {
        let links = self.data_access.fetch_channel_links().await.context("Couldn't fetch channel links")?;
        let identities = self.data_access.fetch_identities().await.context("Couldn't fetch identities")?;

        let targets = match message.recipient {
            Recipient::Identity(id) => {
                let username = identities.iter().find(|identity| identity.id == id).map(|identity| &identity.username);
                let link = username.and_then(|username| links.into_iter().find(|link| link.username == *username));
                if link.is_none() {
                    warn!(recipient = %id, "no chat linked, message not relayed");
                }
                link.into_iter().collect()
            },
            Recipient::All => links
                .into_iter()
                .filter(|link| {
                    identities.iter().any(|identity| identity.username == link.username && !identity.is_admin())
                })
                .collect(),
        };
        Ok(targets)
    }

    async fn admin_targets(&self) -> Result<Vec<ChannelLink>> {
        let links = self.data_access.fetch_channel_links().await.context("Couldn't fetch channel links")?;
        let identities = self.data_access.fetch_identities().await.context("Couldn't fetch identities")?;
        let targets = links
            .into_iter()
            .filter(|link| identities.iter().any(|identity| identity.username == link.username && identity.is_admin()))
            .collect();
        Ok(targets)
    }

    async fn deliver(&self, chat_id: &str, text: &str) -> Result<()> {
        self.channel
            .send_external_message(chat_id, text).await
            .with_context(|| format!("Couldn't deliver bot message to chat {chat_id}"))?;
        Ok(())
    }
}

fn new_message_text(message: &Message) -> String {
    format!(
        "📬 New Message\n\nFrom: {}\nSubject: {}\n\n{}\n\nLogin to your dashboard to reply.",
        message.sender_name, message.subject, message.content,
    )
}

fn new_identity_text(identity: &Identity) -> String {
    format!(
        "🆕 New User Created\n\nUsername: {}\nEmail: {}\nCreated: {}",
        identity.username,
        identity.email,
        identity.created_at.format("%Y-%m-%d %H:%M UTC"),
    )
}
