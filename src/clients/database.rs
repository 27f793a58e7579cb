use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::{
    models::{
        channel::Channel,
        notification::{DeliveryLog, NewDeliveryLog, NewNotification, Notification, User},
        status::NotificationStatus,
        template::Template,
    },
    pipeline::ports::{NotificationStore, TemplateStore},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS templates (
    name TEXT PRIMARY KEY,
    priority INTEGER NOT NULL,
    subject TEXT,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    phone TEXT
);

CREATE TABLE IF NOT EXISTS notifications (
    id BIGSERIAL PRIMARY KEY,
    user_id TEXT NOT NULL,
    channel TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT NOT NULL,
    hash TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS notifications_hash_idx ON notifications (hash);

CREATE TABLE IF NOT EXISTS delivery_logs (
    id BIGSERIAL PRIMARY KEY,
    notification_id BIGINT NOT NULL REFERENCES notifications (id),
    channel TEXT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

const NOTIFICATION_COLUMNS: &str = "id, user_id, channel, status, message, hash";

pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to apply database schema: {}", e))?;

        debug!("Database schema ensured");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

fn notification_from_row(row: &Row) -> Result<Notification, Error> {
    let channel: String = row.try_get("channel")?;
    let status: String = row.try_get("status")?;

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        channel: channel.parse::<Channel>()?,
        status: NotificationStatus::from_string(&status)
            .ok_or_else(|| anyhow!("Unknown notification status: {}", status))?,
        message: row.try_get("message")?,
        hash: row.try_get("hash")?,
    })
}

#[async_trait]
impl TemplateStore for DatabaseClient {
    async fn find_template_by_name(&self, name: &str) -> Result<Option<Template>> {
        let row = self
            .client
            .query_opt(
                "SELECT name, priority, subject, body FROM templates WHERE name = $1",
                &[&name],
            )
            .await
            .map_err(|e| anyhow!("Template lookup failed: {}", e))?;

        row.map(|row| {
            Ok::<_, Error>(Template {
                name: row.try_get("name")?,
                priority: row.try_get("priority")?,
                subject: row.try_get("subject")?,
                body: row.try_get("body")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl NotificationStore for DatabaseClient {
    async fn find_notification(&self, id: i64) -> Result<Option<Notification>> {
        let query = format!("SELECT {} FROM notifications WHERE id = $1", NOTIFICATION_COLUMNS);

        let row = self
            .client
            .query_opt(query.as_str(), &[&id])
            .await
            .map_err(|e| anyhow!("Notification lookup failed: {}", e))?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn find_notification_by_hash(&self, hash: &str) -> Result<Option<Notification>> {
        let query = format!(
            "SELECT {} FROM notifications WHERE hash = $1 AND status <> 'failed' ORDER BY id LIMIT 1",
            NOTIFICATION_COLUMNS
        );

        let row = self
            .client
            .query_opt(query.as_str(), &[&hash])
            .await
            .map_err(|e| anyhow!("Notification hash lookup failed: {}", e))?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let query = format!(
            "INSERT INTO notifications (user_id, channel, status, message, hash) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            NOTIFICATION_COLUMNS
        );
        let status = NotificationStatus::Pending.to_string();

        let row = self
            .client
            .query_one(
                query.as_str(),
                &[
                    &notification.user_id,
                    &notification.channel.as_str(),
                    &status,
                    &notification.message,
                    &notification.hash,
                ],
            )
            .await
            .map_err(|e| anyhow!("Notification insert failed: {}", e))?;

        let stored = notification_from_row(&row)?;

        debug!(
            notification_id = stored.id,
            channel = %stored.channel,
            "Pending notification stored"
        );

        Ok(stored)
    }

    async fn save_notification(&self, notification: &Notification) -> Result<()> {
        let status = notification.status.to_string();

        let updated = self
            .client
            .execute(
                "UPDATE notifications SET status = $1, message = $2 WHERE id = $3",
                &[&status, &notification.message, &notification.id],
            )
            .await
            .map_err(|e| anyhow!("Notification update failed: {}", e))?;

        if updated == 0 {
            return Err(anyhow!("Notification {} does not exist", notification.id));
        }

        Ok(())
    }

    async fn append_delivery_log(&self, log: NewDeliveryLog) -> Result<DeliveryLog> {
        let status = log.status.to_string();

        let row = self
            .client
            .query_one(
                "INSERT INTO delivery_logs (notification_id, channel, status, error_message) \
                 VALUES ($1, $2, $3, $4) RETURNING id, created_at",
                &[
                    &log.notification_id,
                    &log.channel.as_str(),
                    &status,
                    &log.error_message,
                ],
            )
            .await
            .map_err(|e| anyhow!("Delivery log insert failed: {}", e))?;

        Ok(DeliveryLog {
            id: row.try_get("id")?,
            notification_id: log.notification_id,
            channel: log.channel,
            status: log.status,
            error_message: log.error_message,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = self
            .client
            .query_opt(
                "SELECT user_id, name, email, phone FROM users WHERE user_id = $1",
                &[&user_id],
            )
            .await
            .map_err(|e| anyhow!("User lookup failed: {}", e))?;

        row.map(|row| {
            Ok::<_, Error>(User {
                user_id: row.try_get("user_id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
            })
        })
        .transpose()
    }
}
