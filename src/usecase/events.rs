//! User and translation events
//!
//! Typed events published through the manager, and the handlers that consume
//! them. User events are keyed by user id so every event of one user lands on
//! one partition in order; translation events are keyed by
//! `"<user_id>-<event_type>"`.

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::TopicsConfig;
use crate::kafka::codec::decode_value;
use crate::kafka::constants::{TRANSLATION_EVENTS_GROUP_ID, USER_EVENTS_GROUP_ID};
use crate::kafka::consumer::MessageHandler;
use crate::kafka::error::Result;
use crate::kafka::manager::KafkaManager;

pub const USER_CREATED_EVENT: &str = "user.created";
pub const USER_UPDATED_EVENT: &str = "user.updated";
pub const USER_DELETED_EVENT: &str = "user.deleted";
pub const TRANSLATION_REQUESTED_EVENT: &str = "translation.requested";
pub const TRANSLATION_COMPLETED_EVENT: &str = "translation.completed";

/// A change to a user account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub id: i64,
    pub event_type: String,
    pub user_id: i64,
    pub email: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// RFC 3339 on the wire
    pub timestamp: DateTime<Utc>,
}

/// A translation request or result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationEvent {
    pub id: i64,
    pub event_type: String,
    pub user_id: i64,
    pub source: String,
    pub target: String,
    pub original: String,
    #[serde(default)]
    pub translated: String,
    /// RFC 3339 on the wire
    pub timestamp: DateTime<Utc>,
}

/// Event id: nanoseconds since the epoch at `now`
fn event_id(now: &DateTime<Utc>) -> i64 {
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

/// Key for a translation event
pub fn translation_event_key(user_id: i64, event_type: &str) -> String {
    format!("{}-{}", user_id, event_type)
}

/// Decodes user events and dispatches on their type
pub struct UserEventHandler;

#[async_trait]
impl MessageHandler for UserEventHandler {
    async fn handle(&self, _key: Bytes, value: Bytes) -> anyhow::Result<()> {
        let event: UserEvent =
            decode_value(&value).context("failed to decode user event")?;

        info!(
            event_type = %event.event_type,
            user_id = event.user_id,
            email = %event.email,
            "User event consumed"
        );

        match event.event_type.as_str() {
            USER_CREATED_EVENT => {
                info!(user_id = event.user_id, email = %event.email, "Processing user created event")
            }
            USER_UPDATED_EVENT => {
                info!(user_id = event.user_id, email = %event.email, "Processing user updated event")
            }
            USER_DELETED_EVENT => {
                info!(user_id = event.user_id, email = %event.email, "Processing user deleted event")
            }
            other => warn!(event_type = %other, "Unknown user event type"),
        }

        Ok(())
    }
}

/// Decodes translation events and dispatches on their type
pub struct TranslationEventHandler;

#[async_trait]
impl MessageHandler for TranslationEventHandler {
    async fn handle(&self, _key: Bytes, value: Bytes) -> anyhow::Result<()> {
        let event: TranslationEvent =
            decode_value(&value).context("failed to decode translation event")?;

        info!(
            event_type = %event.event_type,
            user_id = event.user_id,
            source = %event.source,
            target = %event.target,
            "Translation event consumed"
        );

        match event.event_type.as_str() {
            TRANSLATION_REQUESTED_EVENT => info!(
                user_id = event.user_id,
                original = %event.original,
                "Processing translation requested event"
            ),
            TRANSLATION_COMPLETED_EVENT => info!(
                user_id = event.user_id,
                translated = %event.translated,
                "Processing translation completed event"
            ),
            other => warn!(event_type = %other, "Unknown translation event type"),
        }

        Ok(())
    }
}

/// Produces and registers consumers for the application's event topics
#[derive(Clone)]
pub struct KafkaEventUseCase {
    manager: Arc<KafkaManager>,
    topics: TopicsConfig,
}

impl KafkaEventUseCase {
    pub fn new(manager: Arc<KafkaManager>, topics: TopicsConfig) -> Self {
        Self { manager, topics }
    }

    /// Publish a user event keyed by the user id
    pub async fn produce_user_event(
        &self,
        event_type: &str,
        user_id: i64,
        email: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let now = Utc::now();
        let event = UserEvent {
            id: event_id(&now),
            event_type: event_type.to_string(),
            user_id,
            email: email.to_string(),
            data,
            timestamp: now,
        };

        let key = user_id.to_string();
        self.manager
            .send(&self.topics.user_events, key.as_bytes(), &event)
            .await?;

        info!(event_type = %event_type, user_id = user_id, "User event produced");
        Ok(())
    }

    /// Publish a translation event keyed by user id and event type
    pub async fn produce_translation_event(
        &self,
        event_type: &str,
        user_id: i64,
        source: &str,
        target: &str,
        original: &str,
        translated: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let event = TranslationEvent {
            id: event_id(&now),
            event_type: event_type.to_string(),
            user_id,
            source: source.to_string(),
            target: target.to_string(),
            original: original.to_string(),
            translated: translated.to_string(),
            timestamp: now,
        };

        let key = translation_event_key(user_id, event_type);
        self.manager
            .send(&self.topics.translation_events, key.as_bytes(), &event)
            .await?;

        info!(
            event_type = %event_type,
            user_id = user_id,
            source = %source,
            target = %target,
            "Translation event produced"
        );
        Ok(())
    }

    /// Register the user event consumer; start it with the manager
    pub fn consume_user_events(&self) -> Result<()> {
        self.manager.register(
            &self.topics.user_events,
            USER_EVENTS_GROUP_ID,
            Arc::new(UserEventHandler),
        )
    }

    /// Register the translation event consumer; start it with the manager
    pub fn consume_translation_events(&self) -> Result<()> {
        self.manager.register(
            &self.topics.translation_events,
            TRANSLATION_EVENTS_GROUP_ID,
            Arc::new(TranslationEventHandler),
        )
    }
}
