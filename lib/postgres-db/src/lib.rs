use std::future::Future;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Executor, PgPool, query, Row};

use herald_auth::{AuthenticationInfo, AuthStorage};
use herald_core::data_access::*;
use herald_core::{ChannelLink, Identity, IdentityId, Message, MessageId, Recipient, Theme};

pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
const DB_VERSION: i64 = 1;

const THEME_KEY: &str = "theme";

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let options: PgConnectOptions = connection_string.parse()?;
        let pool = PgPool::connect_with(options).await?;

        Ok(Db { pool })
    }

    pub fn graceful_shutdown(&self, cancellation_token: CancellationToken) -> impl Future<Output = Result<(), JoinError>> {
        let pool_cloned = self.pool.clone();
        tokio::spawn(async move {
            cancellation_token.cancelled().await;
            info!("Shutting down database connection...");
            pool_cloned.close().await;
            info!("Shutting down database connection...Success");
        })
    }

    pub async fn check_migrations(&self) -> Result<()> {
        let migrations_table_exists: bool = self.pool
            .acquire().await?
            .fetch_one(query("select exists (select from pg_tables where (schemaname = 'public') and (tablename = '_sqlx_migrations'))"))
            .await?
            .get(0);

        if !migrations_table_exists {
            bail!("Database uninitialized. Please migrate database using the 'migrate' tool");
        }

        let latest_version: i64 = self.pool
            .acquire().await?
            .fetch_optional(query("select version from _sqlx_migrations order by version desc limit 1"))
            .await?
            .map(|row| row.get(0))
            .unwrap_or(-1);

        if latest_version < DB_VERSION {
            bail!("Database schema not up to date. Please migrate database using the 'migrate' tool")
        } else if latest_version > DB_VERSION {
            bail!("Application not up to date with the database. Please use a newer version of the app or undo database migrations until version {}", DB_VERSION)
        };

        Ok(())
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.context("Couldn't migrate")
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Postgres error: {0}")]
    PgError(#[from] sqlx::Error),
    #[error("Auth info parsing error: {0}")]
    AuthInfoParsingError(#[from] herald_auth::AuthenticationInfoParsingError),
    #[error("Unexpected stored value: {0}")]
    UnknownValue(#[from] herald_core::UnknownVariant),
    #[error("Unexpected stored recipient: {0}")]
    BadRecipient(#[from] uuid::Error),
}

const IDENTITY_COLUMNS: &str = "id, username, email, name, role, status, created_at";

fn identity_from_row(row: &PgRow) -> Result<Identity, Error> {
    let role: &str = row.get(4);
    let status: &str = row.get(5);
    Ok(Identity {
        id: row.get(0),
        username: row.get(1),
        email: row.get(2),
        name: row.get(3),
        role: role.parse()?,
        status: status.parse()?,
        created_at: row.get(6),
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, Error> {
    let recipient: &str = row.get(5);
    let read_by: Option<Vec<Uuid>> = row.get(7);
    Ok(Message {
        id: row.get(0),
        subject: row.get(1),
        content: row.get(2),
        sender: row.get(3),
        sender_name: row.get(4),
        recipient: recipient.parse()?,
        timestamp: row.get(6),
        read_by: read_by.unwrap_or_default().into_iter().collect(),
    })
}

impl IdentityRepository for Db {
    type Error = Error;

    async fn fetch_identities(&self) -> Result<Vec<Identity>, Error> {
        self.pool.acquire().await?
            .fetch_all(query(&format!("select {IDENTITY_COLUMNS} from identities order by seq")))
            .await?
            .iter()
            .map(identity_from_row)
            .collect()
    }

    async fn fetch_identity(&self, id: &IdentityId) -> Result<Option<Identity>, Error> {
        self.pool.acquire().await?
            .fetch_optional(query(&format!("select {IDENTITY_COLUMNS} from identities where id = $1")).bind(id))
            .await?
            .as_ref()
            .map(identity_from_row)
            .transpose()
    }

    async fn find_identity_by_username(&self, username: &str) -> Result<Option<Identity>, Error> {
        self.pool.acquire().await?
            .fetch_optional(query(&format!("select {IDENTITY_COLUMNS} from identities where username = $1")).bind(username))
            .await?
            .as_ref()
            .map(identity_from_row)
            .transpose()
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, Error> {
        self.pool.acquire().await?
            .fetch_optional(query(&format!("select {IDENTITY_COLUMNS} from identities where email = $1")).bind(email))
            .await?
            .as_ref()
            .map(identity_from_row)
            .transpose()
    }

    async fn insert_identity(&self, identity: &Identity) -> Result<InsertOutcome, Error> {
        let mut transaction = self.pool.begin().await?;
        transaction.execute("lock table identities in exclusive mode;").await?;

        let clashing = transaction
            .fetch_all(query(&format!("select {IDENTITY_COLUMNS} from identities where username = $1 or email = $2"))
                .bind(&identity.username)
                .bind(&identity.email))
            .await?
            .iter()
            .map(identity_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(field) = conflicting_field(identity, &clashing) {
            return Ok(InsertOutcome::Taken(field));
        }

        transaction.execute(query(r#"
                insert into identities (id, username, email, name, role, status, created_at)
                values ($1, $2, $3, $4, $5, $6, $7)
            "#)
            .bind(identity.id)
            .bind(&identity.username)
            .bind(&identity.email)
            .bind(&identity.name)
            .bind(identity.role.to_string())
            .bind(identity.status.to_string())
            .bind(identity.created_at))
            .await?;

        transaction.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn update_identity(&self, identity: &Identity) -> Result<UpdateOutcome, Error> {
        let mut transaction = self.pool.begin().await?;
        transaction.execute("lock table identities in exclusive mode;").await?;

        let clashing = transaction
            .fetch_all(query(&format!("select {IDENTITY_COLUMNS} from identities where username = $1 or email = $2"))
                .bind(&identity.username)
                .bind(&identity.email))
            .await?
            .iter()
            .map(identity_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(field) = conflicting_field(identity, &clashing) {
            return Ok(UpdateOutcome::Taken(field));
        }

        let updated = transaction.execute(query(r#"
                update identities
                set username = $2, email = $3, name = $4, role = $5, status = $6
                where id = $1
            "#)
            .bind(identity.id)
            .bind(&identity.username)
            .bind(&identity.email)
            .bind(&identity.name)
            .bind(identity.role.to_string())
            .bind(identity.status.to_string()))
            .await?
            .rows_affected();

        transaction.commit().await?;
        if updated == 0 {
            Ok(UpdateOutcome::Missing)
        } else {
            Ok(UpdateOutcome::Updated)
        }
    }

    async fn delete_identity(&self, id: &IdentityId) -> Result<Option<Identity>, Error> {
        self.pool.acquire().await?
            .fetch_optional(query(&format!("delete from identities where id = $1 returning {IDENTITY_COLUMNS}")).bind(id))
            .await?
            .as_ref()
            .map(identity_from_row)
            .transpose()
    }
}

impl MessageRepository for Db {
    type Error = Error;

    async fn fetch_messages(&self) -> Result<Vec<Message>, Error> {
        self.pool.acquire().await?
            .fetch_all(r#"
                select
                    messages.id, subject, content, sender, sender_name, recipient, timestamp,
                    array_agg(message_reads.reader) filter (where message_reads.reader is not null)
                from messages
                    left join message_reads on message_reads.message_id = messages.id
                group by messages.id
                order by max(messages.seq)
            "#)
            .await?
            .iter()
            .map(message_from_row)
            .collect()
    }

    async fn create_message(&self, message: &Message) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;
        transaction.execute(query(r#"
                insert into messages (id, subject, content, sender, sender_name, recipient, timestamp)
                values ($1, $2, $3, $4, $5, $6, $7)
            "#)
            .bind(message.id)
            .bind(&message.subject)
            .bind(&message.content)
            .bind(message.sender)
            .bind(&message.sender_name)
            .bind(message.recipient.to_string())
            .bind(message.timestamp))
            .await?;

        for reader in &message.read_by {
            transaction.execute(query("insert into message_reads (message_id, reader) values ($1, $2)")
                .bind(message.id)
                .bind(reader))
                .await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn mark_read(&self, message_id: &MessageId, reader: &IdentityId) -> Result<bool, Error> {
        let inserted = self.pool.acquire().await?
            .execute(query(r#"
                insert into message_reads (message_id, reader)
                select $1, $2 where exists (select 1 from messages where id = $1)
                on conflict do nothing
            "#).bind(message_id).bind(reader))
            .await?
            .rows_affected();
        Ok(inserted > 0)
    }

    async fn delete_messages_to(&self, recipient: &IdentityId) -> Result<usize, Error> {
        let deleted = self.pool.acquire().await?
            .execute(query("delete from messages where recipient = $1").bind(Recipient::Identity(*recipient).to_string()))
            .await?
            .rows_affected();
        Ok(deleted as usize)
    }
}

impl ProfileStorage for Db {
    type Error = Error;

    async fn load_session_slot(&self) -> Result<Option<SessionSlot>, Error> {
        let res = self.pool.acquire().await?
            .fetch_optional("select token, identity from session_slot where slot = 0")
            .await?
            .map(|row| SessionSlot { token: row.get(0), identity: row.get(1) });
        Ok(res)
    }

    async fn store_session_slot(&self, slot: SessionSlot) -> Result<(), Error> {
        self.pool.acquire().await?
            .execute(query(r#"
                insert into session_slot (slot, token, identity) values (0, $1, $2)
                on conflict (slot) do update set token = excluded.token, identity = excluded.identity
            "#).bind(slot.token).bind(slot.identity))
            .await?;
        Ok(())
    }

    async fn clear_session_slot(&self) -> Result<(), Error> {
        self.pool.acquire().await?.execute("delete from session_slot").await?;
        Ok(())
    }

    async fn fetch_last_login(&self, id: &IdentityId) -> Result<Option<DateTime<Utc>>, Error> {
        let res = self.pool.acquire().await?
            .fetch_optional(query("select at from last_logins where user_id = $1").bind(id))
            .await?
            .map(|row| row.get(0));
        Ok(res)
    }

    async fn record_last_login(&self, id: &IdentityId, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, Error> {
        let mut transaction = self.pool.begin().await?;
        let previous: Option<DateTime<Utc>> = transaction
            .fetch_optional(query("select at from last_logins where user_id = $1 for update").bind(id))
            .await?
            .map(|row| row.get(0));

        transaction.execute(query(r#"
                insert into last_logins (user_id, at) values ($1, $2)
                on conflict (user_id) do update set at = excluded.at
            "#).bind(id).bind(at))
            .await?;
        transaction.commit().await?;
        Ok(previous)
    }

    async fn forget_last_login(&self, id: &IdentityId) -> Result<(), Error> {
        self.pool.acquire().await?
            .execute(query("delete from last_logins where user_id = $1").bind(id))
            .await?;
        Ok(())
    }

    async fn load_theme(&self) -> Result<Option<Theme>, Error> {
        let row = self.pool.acquire().await?
            .fetch_optional(query("select value from preferences where key = $1").bind(THEME_KEY))
            .await?;
        match row {
            Some(row) => {
                let theme: &str = row.get(0);
                Ok(Some(theme.parse()?))
            },
            None => Ok(None),
        }
    }

    async fn store_theme(&self, theme: Theme) -> Result<(), Error> {
        self.pool.acquire().await?
            .execute(query(r#"
                insert into preferences (key, value) values ($1, $2)
                on conflict (key) do update set value = excluded.value
            "#).bind(THEME_KEY).bind(theme.to_string()))
            .await?;
        Ok(())
    }
}

impl ChannelDirectory for Db {
    type Error = Error;

    async fn fetch_channel_links(&self) -> Result<Vec<ChannelLink>, Error> {
        let res = self.pool.acquire().await?
            .fetch_all("select username, chat_id, connected_since from channel_links order by username")
            .await?
            .iter()
            .map(|row| ChannelLink { username: row.get(0), chat_id: row.get(1), connected_since: row.get(2) })
            .collect();
        Ok(res)
    }

    async fn link_channel(&self, link: &ChannelLink) -> Result<(), Error> {
        self.pool.acquire().await?
            .execute(query(r#"
                insert into channel_links (username, chat_id, connected_since) values ($1, $2, $3)
                on conflict (username) do update set chat_id = excluded.chat_id, connected_since = excluded.connected_since
            "#).bind(&link.username).bind(&link.chat_id).bind(link.connected_since))
            .await?;
        Ok(())
    }

    async fn unlink_channel(&self, username: &str) -> Result<Option<ChannelLink>, Error> {
        let res = self.pool.acquire().await?
            .fetch_optional(query(
                "delete from channel_links where username = $1 returning username, chat_id, connected_since"
            ).bind(username))
            .await?
            .map(|row| ChannelLink { username: row.get(0), chat_id: row.get(1), connected_since: row.get(2) });
        Ok(res)
    }
}

impl AuthStorage for Db {
    type Error = Error;

    async fn fetch_authentication(&self, user_id: &IdentityId) -> Result<Option<AuthenticationInfo>, Error> {
        let res = self.pool.acquire().await?
            .fetch_optional(query(r#"
            select phc_string from auth where user_id = $1
            "#).bind(user_id)).await?;

        match res {
            Some(row) => {
                let phc_string: &str = row.get(0);
                let auth_info = phc_string.parse()?;
                Ok(Some(auth_info))
            },
            None => Ok(None),
        }
    }

    async fn update_authentication(&self, user_id: &IdentityId, auth_info: AuthenticationInfo) -> Result<Option<AuthenticationInfo>, Error> {
        let mut transaction = self.pool.begin().await?;
        transaction.execute(query("lock table auth in exclusive mode")).await?;
        let old_auth = transaction.fetch_optional(query(
            "select phc_string from auth where user_id = $1"
        ).bind(user_id)).await?;

        match old_auth {
            Some(row) => {
                let old_phc_string: &str = row.get(0);
                let old_auth: AuthenticationInfo = old_phc_string.parse()?;
                transaction.execute(query(
                    "update auth set phc_string = $1 where user_id = $2"
                ).bind(auth_info.to_string()).bind(user_id)).await?;
                transaction.commit().await?;
                Ok(Some(old_auth))
            },
            None => {
                transaction.execute(query(r#"
                    insert into auth (user_id, phc_string) values ($1, $2)
                    "#).bind(user_id).bind(auth_info.to_string())).await?;
                transaction.commit().await?;
                Ok(None)
            },
        }
    }

    async fn remove_authentication(&self, user_id: &IdentityId) -> Result<Option<AuthenticationInfo>, Error> {
        let row = self.pool.acquire().await?
            .fetch_optional(query("delete from auth where user_id = $1 returning phc_string").bind(user_id))
            .await?;
        match row {
            Some(row) => {
                let phc_string: &str = row.get(0);
                Ok(Some(phc_string.parse()?))
            },
            None => Ok(None),
        }
    }
}
