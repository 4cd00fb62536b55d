//! Online-meeting collaborator. A room is created when an appointment is
//! confirmed and torn down when it is cancelled; both calls are
//! best-effort from the state machine's point of view.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MeetingDetails {
    pub meeting_id: String,
    pub join_url: String,
}

#[async_trait]
pub trait MeetingProvider: Send + Sync {
    async fn create_meeting(
        &self,
        subject: &str,
        start: DateTime<Utc>,
        duration_minutes: i32,
    ) -> anyhow::Result<MeetingDetails>;

    async fn delete_meeting(&self, meeting_id: &str) -> anyhow::Result<()>;
}

pub struct HttpMeetingProvider {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateMeetingRequest<'a> {
    subject: &'a str,
    start: DateTime<Utc>,
    duration_minutes: i32,
}

impl HttpMeetingProvider {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl MeetingProvider for HttpMeetingProvider {
    async fn create_meeting(
        &self,
        subject: &str,
        start: DateTime<Utc>,
        duration_minutes: i32,
    ) -> anyhow::Result<MeetingDetails> {
        let response = self
            .client
            .post(self.url("/meetings"))
            .json(&CreateMeetingRequest {
                subject,
                start,
                duration_minutes,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("meeting provider returned {}", response.status());
        }

        Ok(response.json::<MeetingDetails>().await?)
    }

    async fn delete_meeting(&self, meeting_id: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/meetings/{meeting_id}")))
            .send()
            .await?;

        // Deleting an already-gone room is fine.
        if !response.status().is_success() && response.status() != 404 {
            anyhow::bail!("meeting provider returned {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_meeting() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/meetings")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"meeting_id":"room-42","join_url":"https://meet.example/room-42"}"#)
            .create_async()
            .await;

        let provider = HttpMeetingProvider::new(server.url());
        let details = provider
            .create_meeting("Algebra with Ada", Utc::now(), 60)
            .await
            .unwrap();
        assert_eq!(details.meeting_id, "room-42");
        assert_eq!(details.join_url, "https://meet.example/room-42");
    }

    #[tokio::test]
    async fn test_delete_missing_meeting_is_ok() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("DELETE", "/meetings/room-42")
            .with_status(404)
            .create_async()
            .await;

        let provider = HttpMeetingProvider::new(server.url());
        assert!(provider.delete_meeting("room-42").await.is_ok());
    }
}
