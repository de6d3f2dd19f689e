mod common;

use common::{booking, next_monday_at, timestamp, TestApp};
use chrono::Duration;
use service_core::error::AppError;
use service_core::events::payloads::{
    APPOINTMENT_CANCELLED, APPOINTMENT_CONFIRMED, APPOINTMENT_CREATED, APPOINTMENT_RESCHEDULED,
};
use service_core::events::APPOINTMENT_EVENTS;
use service_core::grpc::proto::appointment::{
    ListUserAppointmentsRequest, RescheduleAppointmentRequest,
};
use service_core::grpc::Transition;

#[tokio::test]
async fn booking_then_identical_booking_conflicts() {
    let app = TestApp::spawn().await;
    let at = next_monday_at(10);

    let created = app.client.create_appointment(booking(at)).await.unwrap();
    assert_eq!(created.status, "pending");
    assert_eq!(created.property_id, "P1");
    assert_eq!(created.scheduled_at.unwrap().seconds, at.timestamp());

    let err = app.client.create_appointment(booking(at)).await.unwrap_err();
    assert!(matches!(err, AppError::ScheduleConflict(_)), "got {:?}", err);

    let events = app.broker.published(APPOINTMENT_EVENTS).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, APPOINTMENT_CREATED);
}

#[tokio::test]
async fn partial_overlap_conflicts() {
    let app = TestApp::spawn().await;
    let at = next_monday_at(10);

    app.client.create_appointment(booking(at)).await.unwrap();
    let err = app
        .client
        .create_appointment(booking(at + Duration::minutes(30)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ScheduleConflict(_)));
}

#[tokio::test]
async fn weekend_booking_is_invalid_schedule() {
    let app = TestApp::spawn().await;
    let saturday = next_monday_at(10) - Duration::days(2);

    let err = app
        .client
        .create_appointment(booking(saturday))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidSchedule(_)), "got {:?}", err);

    let mut flexible = booking(saturday);
    flexible.flexible_date = true;
    let moved = app.client.create_appointment(flexible).await.unwrap();
    assert_eq!(
        moved.scheduled_at.unwrap().seconds,
        next_monday_at(10).timestamp()
    );
}

#[tokio::test]
async fn missing_agent_is_stored_as_placeholder() {
    let app = TestApp::spawn().await;
    let mut request = booking(next_monday_at(11));
    request.agent_user_id = String::new();

    let created = app.client.create_appointment(request).await.unwrap();
    assert_eq!(created.agent_user_id, "default_agent");
}

#[tokio::test]
async fn cancel_twice_succeeds_without_second_event() {
    let app = TestApp::spawn().await;
    let created = app
        .client
        .create_appointment(booking(next_monday_at(14)))
        .await
        .unwrap();

    let first = app
        .client
        .transition(Transition::Cancel, &created.id, "U1", "")
        .await
        .unwrap();
    let second = app
        .client
        .transition(Transition::Cancel, &created.id, "U1", "")
        .await
        .unwrap();
    assert_eq!(first.status, "cancelled");
    assert_eq!(second.status, "cancelled");

    let cancellations = app
        .broker
        .published(APPOINTMENT_EVENTS)
        .await
        .into_iter()
        .filter(|e| e.event_type == APPOINTMENT_CANCELLED)
        .count();
    assert_eq!(cancellations, 1);

    let err = app
        .client
        .transition(Transition::Confirm, &created.id, "U2", "")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition(_)));
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let app = TestApp::spawn().await;
    let err = app.client.get_appointment("missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_and_stats_reflect_bookings() {
    let app = TestApp::spawn().await;
    let monday = next_monday_at(9);
    for hours in [0, 2, 4] {
        app.client
            .create_appointment(booking(monday + Duration::hours(hours)))
            .await
            .unwrap();
    }

    let page = app
        .client
        .list_user_appointments(ListUserAppointmentsRequest {
            user_id: "U1".to_string(),
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.appointments.len(), 2);
    assert_eq!(page.page, 1);

    let from_later = app
        .client
        .list_user_appointments(ListUserAppointmentsRequest {
            user_id: "U2".to_string(),
            from: Some(timestamp(monday + Duration::hours(1))),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(from_later.total, 2);

    // Stats cover the period up to now, so future bookings are not counted.
    let stats = app.client.get_stats(Some("U1"), Some("week")).await.unwrap();
    assert_eq!(stats.period, "week");
    assert_eq!(stats.total, 0);
}

#[tokio::test]
async fn unreachable_service_is_reported() {
    use service_core::grpc::{AppointmentClient, ClientDirectory, RpcAdapterConfig, RetryConfig};

    let directory = ClientDirectory::from_lookup(|key| {
        (key == "APPOINTMENT_SERVICE_URL").then(|| "http://127.0.0.1:1".to_string())
    });
    let config = RpcAdapterConfig {
        request_timeout: std::time::Duration::from_millis(500),
        retry: RetryConfig::no_retry(),
        ..Default::default()
    };
    let client = AppointmentClient::new(&directory, &config).unwrap();

    let err = client
        .create_appointment(booking(next_monday_at(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unreachable(_)), "got {:?}", err);
}

async fn event_types(app: &TestApp) -> Vec<String> {
    app.broker
        .published(APPOINTMENT_EVENTS)
        .await
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

async fn user_total(app: &TestApp, user_id: &str) -> u64 {
    app.client
        .list_user_appointments(ListUserAppointmentsRequest {
            user_id: user_id.to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .total
}

#[tokio::test]
async fn broker_outage_during_booking_stores_exactly_one_appointment() {
    let app = TestApp::spawn().await;
    app.broker.set_available(false);

    let err = app
        .client
        .create_appointment(booking(next_monday_at(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BrokerUnavailable(_)), "got {:?}", err);

    let mut unassigned = booking(next_monday_at(15));
    unassigned.agent_user_id = String::new();
    let err = app.client.create_appointment(unassigned).await.unwrap_err();
    assert!(matches!(err, AppError::BrokerUnavailable(_)), "got {:?}", err);

    app.broker.set_available(true);
    assert_eq!(user_total(&app, "U1").await, 2);
}

#[tokio::test]
async fn confirmation_lost_to_an_outage_is_published_when_repeated() {
    let app = TestApp::spawn().await;
    let created = app
        .client
        .create_appointment(booking(next_monday_at(11)))
        .await
        .unwrap();

    app.broker.set_available(false);
    let err = app
        .client
        .transition(Transition::Confirm, &created.id, "U2", "")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BrokerUnavailable(_)), "got {:?}", err);

    app.broker.set_available(true);
    let confirmed = app
        .client
        .transition(Transition::Confirm, &created.id, "U2", "")
        .await
        .unwrap();
    assert_eq!(confirmed.status, "confirmed");
    assert_eq!(confirmed.history.len(), 2);
    assert_eq!(
        event_types(&app).await,
        vec![APPOINTMENT_CREATED, APPOINTMENT_CONFIRMED]
    );
}

#[tokio::test]
async fn reschedule_moves_the_appointment() {
    let app = TestApp::spawn().await;
    let at = next_monday_at(10);
    let created = app.client.create_appointment(booking(at)).await.unwrap();
    app.client
        .create_appointment(booking(at + Duration::hours(3)))
        .await
        .unwrap();

    let moved = app
        .client
        .reschedule(RescheduleAppointmentRequest {
            id: created.id.clone(),
            actor_id: "U2".to_string(),
            scheduled_at: Some(timestamp(at + Duration::days(1))),
            flexible_date: false,
        })
        .await
        .unwrap();
    assert_eq!(moved.status, "pending");
    assert_eq!(
        moved.scheduled_at.unwrap().seconds,
        (at + Duration::days(1)).timestamp()
    );
    assert_eq!(
        event_types(&app).await.last().map(String::as_str),
        Some(APPOINTMENT_RESCHEDULED)
    );

    // The old slot is free again; the other appointment still blocks its own.
    app.client.create_appointment(booking(at)).await.unwrap();
    let err = app
        .client
        .reschedule(RescheduleAppointmentRequest {
            id: created.id,
            actor_id: "U2".to_string(),
            scheduled_at: Some(timestamp(at + Duration::hours(3))),
            flexible_date: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ScheduleConflict(_)), "got {:?}", err);
}
