//! Notification dispatcher collaborator. Strictly fire-and-forget: a
//! delivery failure must never fail the transition that produced it, so
//! callers go through the outbox channel and only ever log errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    LessonReminder,
    BookingCancelled,
    BookingExpired,
    LessonCompleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub recipients: Vec<Recipient>,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> anyhow::Result<()>;
}

pub struct HttpNotificationDispatcher {
    client: Client,
    base_url: String,
}

impl HttpNotificationDispatcher {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn notify(&self, request: &NotificationRequest) -> anyhow::Result<()> {
        let url = format!("{}/notifications", self.base_url.trim_end_matches('/'));
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("notification dispatcher returned {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notify_posts_request() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/notifications")
            .match_header("content-type", "application/json")
            .with_status(202)
            .create_async()
            .await;

        let dispatcher = HttpNotificationDispatcher::new(server.url());
        let request = NotificationRequest {
            kind: NotificationKind::LessonReminder,
            recipients: vec![Recipient {
                user_id: Uuid::new_v4(),
                email: "student@example.com".to_string(),
                phone: None,
            }],
            payload: serde_json::json!({"join_url": "https://meet.example/room-42"}),
        };

        dispatcher.notify(&request).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_notify_surfaces_server_error() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/notifications")
            .with_status(500)
            .create_async()
            .await;

        let dispatcher = HttpNotificationDispatcher::new(server.url());
        let request = NotificationRequest {
            kind: NotificationKind::BookingConfirmed,
            recipients: vec![],
            payload: serde_json::json!({}),
        };

        assert!(dispatcher.notify(&request).await.is_err());
    }
}
