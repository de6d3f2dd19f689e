//! Turns domain events into conversation system messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use service_core::events::payloads::{
    AppointmentSnapshot, PropertyChanged, PropertySold, APPOINTMENT_CANCELLED,
    APPOINTMENT_COMPLETED, APPOINTMENT_CONFIRMED, APPOINTMENT_CREATED, APPOINTMENT_FEEDBACK_ADDED,
    APPOINTMENT_REMINDER_DUE, APPOINTMENT_RESCHEDULED, PROPERTY_CREATED, PROPERTY_DELETED,
    PROPERTY_SOLD, PROPERTY_UPDATED,
};
use service_core::events::{BusError, DomainEvent, EventHandler, APPOINTMENT_EVENTS, PROPERTY_EVENTS};
use service_core::grpc::UserClient;
use std::sync::Arc;

use crate::models::{ChatMessage, Conversation};
use crate::services::ChatStore;

pub struct ChatEventHandler {
    store: Arc<dyn ChatStore>,
    users: UserClient,
}

fn when(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Text of the system message for an appointment event, `None` for events
/// that are not announced.
pub fn appointment_message(event_type: &str, appointment: &AppointmentSnapshot) -> Option<String> {
    let at = when(appointment.scheduled_at);
    let text = match event_type {
        APPOINTMENT_CREATED => format!("New {} scheduled for {}", appointment.kind, at),
        APPOINTMENT_CONFIRMED => format!("The appointment on {} is confirmed", at),
        APPOINTMENT_CANCELLED => format!("The appointment on {} was cancelled", at),
        APPOINTMENT_RESCHEDULED => format!("The appointment was moved to {}", at),
        APPOINTMENT_COMPLETED => format!("The appointment on {} is completed", at),
        APPOINTMENT_FEEDBACK_ADDED => match appointment.rating {
            Some(rating) => format!("Feedback received for the appointment on {}: {}/5", at, rating),
            None => format!("Feedback received for the appointment on {}", at),
        },
        APPOINTMENT_REMINDER_DUE => format!("Reminder: appointment on {}", at),
        _ => return None,
    };
    Some(text)
}

impl ChatEventHandler {
    pub fn new(store: Arc<dyn ChatStore>, users: UserClient) -> Self {
        Self { store, users }
    }

    /// Open a conversation between buyer and seller and announce the sale.
    async fn on_property_sold(&self, event: &DomainEvent, sale: PropertySold) -> Result<(), AppError> {
        if sale.buyer_id.is_empty() || sale.seller_id.is_empty() {
            tracing::warn!(event_id = %event.event_id, "Sale without buyer or seller ignored");
            return Ok(());
        }

        let conversation = match self.store.find_conversation(&sale.buyer_id, &sale.seller_id).await? {
            Some(existing) => existing,
            None => {
                let (buyer, seller) = tokio::join!(
                    self.users.get_user_or_default(&sale.buyer_id),
                    self.users.get_user_or_default(&sale.seller_id)
                );
                let conversation = Conversation::direct(
                    (&buyer.id, &buyer.role),
                    (&seller.id, &seller.role),
                    Utc::now(),
                );
                if self.store.create_conversation_if_absent(&conversation).await? {
                    metrics::counter!("chat_conversations_created_total").increment(1);
                    tracing::info!(
                        conversation_id = %conversation.conversation_id,
                        property_id = %sale.property_id,
                        "Conversation opened for property sale"
                    );
                }
                conversation
            }
        };

        let title = if sale.property_title.is_empty() {
            sale.property_id.as_str()
        } else {
            sale.property_title.as_str()
        };
        let message = ChatMessage::system(
            &conversation.conversation_id,
            &event.event_id,
            format!(
                "Transaction for property \"{}\" started. Use this conversation to discuss the details.",
                title
            ),
            Utc::now(),
        );
        self.append(message).await
    }

    /// Listing changes open no conversation and post nothing.
    fn on_property_changed(&self, event: &DomainEvent, change: PropertyChanged) -> Result<(), AppError> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            property_id = %change.property_id,
            owner_id = %change.owner_id,
            "Property change noted"
        );
        Ok(())
    }

    /// Post into the requester/agent conversation when one exists.
    async fn on_appointment(&self, event: &DomainEvent, appointment: AppointmentSnapshot) -> Result<(), AppError> {
        let Some(content) = appointment_message(&event.event_type, &appointment) else {
            return Ok(());
        };
        let Some(conversation) = self
            .store
            .find_conversation(&appointment.requester_user_id, &appointment.agent_user_id)
            .await?
        else {
            tracing::debug!(
                appointment_id = %appointment.appointment_id,
                "No conversation between requester and agent"
            );
            return Ok(());
        };

        let message = ChatMessage::system(&conversation.conversation_id, &event.event_id, content, Utc::now());
        self.append(message).await
    }

    async fn append(&self, message: ChatMessage) -> Result<(), AppError> {
        if self.store.append_message(&message).await? {
            metrics::counter!("chat_system_messages_total").increment(1);
            tracing::info!(
                conversation_id = %message.conversation_id,
                event_id = %message.source_event_id,
                "System message posted"
            );
        } else {
            tracing::debug!(event_id = %message.source_event_id, "System message already posted");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ChatEventHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<(), BusError> {
        let result = match (event.topic.as_str(), event.event_type.as_str()) {
            (PROPERTY_EVENTS, PROPERTY_SOLD) => match event.decode::<PropertySold>() {
                Ok(sale) => self.on_property_sold(event, sale).await,
                Err(e) => return skip_malformed(event, e),
            },
            (PROPERTY_EVENTS, PROPERTY_CREATED | PROPERTY_UPDATED | PROPERTY_DELETED) => {
                match event.decode::<PropertyChanged>() {
                    Ok(change) => self.on_property_changed(event, change),
                    Err(e) => return skip_malformed(event, e),
                }
            }
            (APPOINTMENT_EVENTS, _) => match event.decode::<AppointmentSnapshot>() {
                Ok(appointment) => self.on_appointment(event, appointment).await,
                Err(e) => return skip_malformed(event, e),
            },
            (topic, event_type) => {
                tracing::debug!(topic, event_type, "Event not relevant to chat");
                Ok(())
            }
        };
        result.map_err(BusError::from)
    }
}

/// A payload that cannot be decoded never will be; acknowledge it.
fn skip_malformed(event: &DomainEvent, error: BusError) -> Result<(), BusError> {
    tracing::warn!(
        event_id = %event.event_id,
        event_type = %event.event_type,
        error = %error,
        "Malformed event payload skipped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryChatStore;
    use service_core::grpc::{ClientDirectory, RetryConfig, RpcAdapterConfig};
    use service_core::grpc::user_client::DEFAULT_USER_ROLE;
    use std::time::Duration;

    fn unreachable_users() -> UserClient {
        let directory = ClientDirectory::from_lookup(|key| {
            (key == "USER_SERVICE_URL").then(|| "http://127.0.0.1:1".to_string())
        });
        let config = RpcAdapterConfig {
            request_timeout: Duration::from_millis(300),
            retry: RetryConfig::no_retry(),
            ..Default::default()
        };
        UserClient::new(&directory, &config).unwrap()
    }

    fn sale_event() -> DomainEvent {
        DomainEvent::new(
            PROPERTY_EVENTS,
            "P1",
            PROPERTY_SOLD,
            serde_json::to_value(PropertySold {
                property_id: "P1".to_string(),
                property_title: "Loft".to_string(),
                buyer_id: "U1".to_string(),
                seller_id: "U2".to_string(),
            })
            .unwrap(),
        )
    }

    fn property_event(event_type: &str, payload: serde_json::Value) -> DomainEvent {
        DomainEvent::new(PROPERTY_EVENTS, "P1", event_type, payload)
    }

    fn appointment_event(event_type: &str, requester: &str, agent: &str) -> DomainEvent {
        let snapshot = AppointmentSnapshot {
            appointment_id: "A1".to_string(),
            property_id: "P1".to_string(),
            requester_user_id: requester.to_string(),
            agent_user_id: agent.to_string(),
            scheduled_at: Utc::now(),
            duration_minutes: 60,
            kind: "viewing".to_string(),
            status: "pending".to_string(),
            actor_id: requester.to_string(),
            rating: None,
        };
        DomainEvent::new(APPOINTMENT_EVENTS, "A1", event_type, serde_json::to_value(snapshot).unwrap())
    }

    #[test]
    fn not_every_event_is_announced() {
        let event = appointment_event(APPOINTMENT_CREATED, "U1", "U2");
        let snapshot: AppointmentSnapshot = event.decode().unwrap();
        assert!(appointment_message(APPOINTMENT_CREATED, &snapshot).unwrap().starts_with("New viewing"));
        assert!(appointment_message("APPOINTMENT_ARCHIVED", &snapshot).is_none());
    }

    #[test]
    fn reschedule_announces_the_new_start() {
        let event = appointment_event(APPOINTMENT_RESCHEDULED, "U1", "U2");
        let snapshot: AppointmentSnapshot = event.decode().unwrap();
        let text = appointment_message(APPOINTMENT_RESCHEDULED, &snapshot).unwrap();
        assert_eq!(text, format!("The appointment was moved to {}", when(snapshot.scheduled_at)));
    }

    #[tokio::test]
    async fn listing_changes_are_acknowledged_without_messages() {
        let store = Arc::new(InMemoryChatStore::new());
        let handler = ChatEventHandler::new(store.clone(), unreachable_users());

        for event_type in [PROPERTY_CREATED, PROPERTY_UPDATED, PROPERTY_DELETED] {
            let payload = serde_json::to_value(PropertyChanged {
                property_id: "P1".to_string(),
                title: "Loft".to_string(),
                owner_id: "U2".to_string(),
            })
            .unwrap();
            assert!(handler.handle(&property_event(event_type, payload)).await.is_ok());
        }
        // A change without a property id cannot be decoded and is still acknowledged.
        let broken = property_event(PROPERTY_UPDATED, serde_json::json!({"title": "Loft"}));
        assert!(handler.handle(&broken).await.is_ok());

        assert!(store.find_conversation("U1", "U2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rescheduled_appointment_is_posted_to_the_conversation() {
        let store = Arc::new(InMemoryChatStore::new());
        let handler = ChatEventHandler::new(store.clone(), unreachable_users());

        handler.handle(&sale_event()).await.unwrap();
        handler
            .handle(&appointment_event(APPOINTMENT_RESCHEDULED, "U1", "U2"))
            .await
            .unwrap();

        let messages = store.messages("U1:U2").await.unwrap();
        assert!(messages.iter().any(|m| m.content.starts_with("The appointment was moved to")));
    }

    #[tokio::test]
    async fn sale_opens_conversation_with_default_roles() {
        let store = Arc::new(InMemoryChatStore::new());
        let handler = ChatEventHandler::new(store.clone(), unreachable_users());

        let event = sale_event();
        handler.handle(&event).await.unwrap();
        // Redelivery does not duplicate anything.
        handler.handle(&event).await.unwrap();

        let conversation = store.find_conversation("U1", "U2").await.unwrap().unwrap();
        assert_eq!(conversation.participant_roles, vec![DEFAULT_USER_ROLE, DEFAULT_USER_ROLE]);
        let messages = store.messages(&conversation.conversation_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("Loft"));
        assert_eq!(messages[0].sender_id, crate::models::SYSTEM_SENDER);
    }

    #[tokio::test]
    async fn appointment_events_need_an_existing_conversation() {
        let store = Arc::new(InMemoryChatStore::new());
        let handler = ChatEventHandler::new(store.clone(), unreachable_users());

        handler
            .handle(&appointment_event(APPOINTMENT_CREATED, "U1", "U2"))
            .await
            .unwrap();
        assert!(store.find_conversation("U1", "U2").await.unwrap().is_none());

        handler.handle(&sale_event()).await.unwrap();
        handler
            .handle(&appointment_event(APPOINTMENT_CONFIRMED, "U2", "U1"))
            .await
            .unwrap();

        let messages = store.messages("U1:U2").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().any(|m| m.content.contains("confirmed")));
    }

    #[tokio::test]
    async fn malformed_payload_is_acknowledged() {
        let store = Arc::new(InMemoryChatStore::new());
        let handler = ChatEventHandler::new(store, unreachable_users());
        let event = DomainEvent::new(PROPERTY_EVENTS, "P1", PROPERTY_SOLD, serde_json::json!({"oops": 1}));
        assert!(handler.handle(&event).await.is_ok());
    }
}
