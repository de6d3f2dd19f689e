mod common;

use chrono::Utc;
use common::{spawn_user_service, TestApp};
use service_core::events::payloads::{
    AppointmentSnapshot, PropertySold, APPOINTMENT_CONFIRMED, APPOINTMENT_CREATED, PROPERTY_SOLD,
};
use service_core::events::{APPOINTMENT_EVENTS, PROPERTY_EVENTS};

fn sale() -> PropertySold {
    PropertySold {
        property_id: "P1".to_string(),
        property_title: "Harbour loft".to_string(),
        buyer_id: "U1".to_string(),
        seller_id: "U2".to_string(),
    }
}

fn snapshot() -> AppointmentSnapshot {
    AppointmentSnapshot {
        appointment_id: "A1".to_string(),
        property_id: "P1".to_string(),
        requester_user_id: "U1".to_string(),
        agent_user_id: "U2".to_string(),
        scheduled_at: Utc::now(),
        duration_minutes: 60,
        kind: "viewing".to_string(),
        status: "pending".to_string(),
        actor_id: "U1".to_string(),
        rating: None,
    }
}

#[tokio::test]
async fn property_sale_opens_conversation_with_roles() {
    let users = spawn_user_service(&[("U1", "Ada", "buyer"), ("U2", "Bo", "seller")]).await;
    let app = TestApp::spawn(&users).await;

    app.producer
        .publish(PROPERTY_EVENTS, "P1", PROPERTY_SOLD, &sale())
        .await
        .unwrap();

    let store = app.store.clone();
    assert!(
        app.eventually(|| {
            let store = store.clone();
            async move { store.find_conversation("U1", "U2").await.unwrap().is_some() }
        })
        .await
    );

    let conversation = app.store.find_conversation("U2", "U1").await.unwrap().unwrap();
    assert_eq!(conversation.role_of("U1"), Some("buyer"));
    assert_eq!(conversation.role_of("U2"), Some("seller"));

    let messages = app.store.messages(&conversation.conversation_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].content.contains("Harbour loft"));
}

#[tokio::test]
async fn appointment_events_land_in_existing_conversation() {
    let users = spawn_user_service(&[("U1", "Ada", "buyer"), ("U2", "Bo", "agent")]).await;
    let app = TestApp::spawn(&users).await;

    app.producer
        .publish(APPOINTMENT_EVENTS, "A1", APPOINTMENT_CREATED, &snapshot())
        .await
        .unwrap();
    app.producer
        .publish(PROPERTY_EVENTS, "P1", PROPERTY_SOLD, &sale())
        .await
        .unwrap();

    let store = app.store.clone();
    assert!(
        app.eventually(|| {
            let store = store.clone();
            async move { store.find_conversation("U1", "U2").await.unwrap().is_some() }
        })
        .await
    );

    app.producer
        .publish(APPOINTMENT_EVENTS, "A1", APPOINTMENT_CONFIRMED, &snapshot())
        .await
        .unwrap();

    let store = app.store.clone();
    assert!(
        app.eventually(|| {
            let store = store.clone();
            async move { store.messages("U1:U2").await.unwrap().len() == 2 }
        })
        .await
    );
    let messages = app.store.messages("U1:U2").await.unwrap();
    assert!(messages.iter().any(|m| m.content.contains("confirmed")));
    // The creation event arrived before the conversation existed.
    assert!(!messages.iter().any(|m| m.content.starts_with("New viewing")));
}

#[tokio::test]
async fn unknown_users_get_default_roles() {
    let users = spawn_user_service(&[]).await;
    let app = TestApp::spawn(&users).await;

    app.producer
        .publish(PROPERTY_EVENTS, "P1", PROPERTY_SOLD, &sale())
        .await
        .unwrap();

    let store = app.store.clone();
    assert!(
        app.eventually(|| {
            let store = store.clone();
            async move { store.find_conversation("U1", "U2").await.unwrap().is_some() }
        })
        .await
    );
    let conversation = app.store.find_conversation("U1", "U2").await.unwrap().unwrap();
    assert_eq!(conversation.participant_roles, vec!["buyer", "buyer"]);
}

#[tokio::test]
async fn health_reports_broker_outage() {
    let users = spawn_user_service(&[]).await;
    let app = TestApp::spawn(&users).await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{}/health", app.http_address))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    app.broker.set_available(false);
    let health = client
        .get(format!("{}/health", app.http_address))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 503);
}
