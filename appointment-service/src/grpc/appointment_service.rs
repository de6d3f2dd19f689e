use crate::grpc::proto::{
    appointment_service_server::AppointmentService, AddFeedbackRequest,
    Appointment as ProtoAppointment, AppointmentResponse, CreateAppointmentRequest,
    Feedback as ProtoFeedback, GetAppointmentRequest, GetAppointmentStatsRequest,
    GetAppointmentStatsResponse, ListAppointmentsResponse, ListPropertyAppointmentsRequest,
    ListUserAppointmentsRequest, RescheduleAppointmentRequest, StatusChange as ProtoStatusChange,
    StatusCount, TransitionRequest, WeekdayCount,
};
use crate::models::{Appointment, AppointmentFilter, AppointmentPage, AppointmentStatus, PageRequest};
use crate::workflow::{
    weekday_name, AppointmentWorkflow, BookingRequest, FeedbackRequest, RescheduleRequest,
    StatsPeriod, Transition,
};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use service_core::error::AppError;
use std::str::FromStr;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct AppointmentGrpcService {
    workflow: Arc<AppointmentWorkflow>,
}

impl AppointmentGrpcService {
    pub fn new(workflow: Arc<AppointmentWorkflow>) -> Self {
        Self { workflow }
    }

    async fn transition(
        &self,
        request: Request<TransitionRequest>,
        transition: Transition,
    ) -> Result<Response<AppointmentResponse>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(AppError::ValidationFailed("Appointment id is required".to_string()).into());
        }
        let appointment = self
            .workflow
            .transition(&req.id, transition, &req.actor_id, &req.note)
            .await?;
        Ok(appointment_response(&appointment))
    }
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn timestamp_to_datetime(ts: &Timestamp) -> Result<DateTime<Utc>, AppError> {
    u32::try_from(ts.nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
        .ok_or_else(|| AppError::ValidationFailed("Timestamp out of range".to_string()))
}

fn optional_datetime(ts: Option<&Timestamp>) -> Result<Option<DateTime<Utc>>, AppError> {
    ts.map(timestamp_to_datetime).transpose()
}

fn appointment_to_proto(a: &Appointment) -> ProtoAppointment {
    ProtoAppointment {
        id: a.appointment_id.clone(),
        property_id: a.property_id.clone(),
        requester_user_id: a.requester_user_id.clone(),
        agent_user_id: a.agent_user_id.clone(),
        scheduled_at: Some(datetime_to_timestamp(a.scheduled_at)),
        duration_minutes: a.duration_minutes,
        kind: a.kind.as_str().to_string(),
        note: a.note.clone(),
        status: a.status.as_str().to_string(),
        history: a
            .history
            .iter()
            .map(|h| ProtoStatusChange {
                status: h.status.as_str().to_string(),
                changed_by: h.changed_by.clone(),
                changed_at: Some(datetime_to_timestamp(h.changed_at)),
                note: h.note.clone(),
            })
            .collect(),
        feedback: a.feedback.as_ref().map(|f| ProtoFeedback {
            rating: f.rating,
            comment: f.comment.clone(),
            submitted_at: Some(datetime_to_timestamp(f.submitted_at)),
        }),
        created_at: Some(datetime_to_timestamp(a.created_utc)),
        updated_at: Some(datetime_to_timestamp(a.updated_utc)),
    }
}

fn appointment_response(a: &Appointment) -> Response<AppointmentResponse> {
    Response::new(AppointmentResponse {
        appointment: Some(appointment_to_proto(a)),
    })
}

fn page_to_proto(page: AppointmentPage) -> Response<ListAppointmentsResponse> {
    Response::new(ListAppointmentsResponse {
        appointments: page.appointments.iter().map(appointment_to_proto).collect(),
        total: page.total,
        page: page.page.page,
        limit: page.page.limit,
    })
}

fn list_filter(
    status: &str,
    from: Option<&Timestamp>,
    to: Option<&Timestamp>,
) -> Result<AppointmentFilter, AppError> {
    let status = if status.trim().is_empty() {
        None
    } else {
        Some(AppointmentStatus::from_str(status)?)
    };
    Ok(AppointmentFilter {
        status,
        from: optional_datetime(from)?,
        to: optional_datetime(to)?,
        ..Default::default()
    })
}

#[tonic::async_trait]
impl AppointmentService for AppointmentGrpcService {
    #[tracing::instrument(skip(self, request))]
    async fn create_appointment(
        &self,
        request: Request<CreateAppointmentRequest>,
    ) -> Result<Response<AppointmentResponse>, Status> {
        let req = request.into_inner();
        let booking = BookingRequest {
            property_id: req.property_id,
            requester_user_id: req.requester_user_id,
            agent_user_id: req.agent_user_id,
            scheduled_at: optional_datetime(req.scheduled_at.as_ref())?,
            duration_minutes: req.duration_minutes,
            kind: req.kind,
            note: req.note,
            status: req.status,
            flexible_date: req.flexible_date,
        };

        let appointment = self.workflow.book(booking).await?;
        Ok(appointment_response(&appointment))
    }

    #[tracing::instrument(skip(self, request))]
    async fn get_appointment(
        &self,
        request: Request<GetAppointmentRequest>,
    ) -> Result<Response<AppointmentResponse>, Status> {
        let req = request.into_inner();
        let appointment = self.workflow.get(&req.id).await?;
        Ok(appointment_response(&appointment))
    }

    #[tracing::instrument(skip(self, request))]
    async fn list_user_appointments(
        &self,
        request: Request<ListUserAppointmentsRequest>,
    ) -> Result<Response<ListAppointmentsResponse>, Status> {
        let req = request.into_inner();
        let filter = list_filter(&req.status, req.from.as_ref(), req.to.as_ref())?;
        let page = self
            .workflow
            .list_for_user(&req.user_id, filter, PageRequest::new(req.page, req.limit))
            .await?;
        Ok(page_to_proto(page))
    }

    #[tracing::instrument(skip(self, request))]
    async fn list_property_appointments(
        &self,
        request: Request<ListPropertyAppointmentsRequest>,
    ) -> Result<Response<ListAppointmentsResponse>, Status> {
        let req = request.into_inner();
        let filter = list_filter(&req.status, req.from.as_ref(), req.to.as_ref())?;
        let page = self
            .workflow
            .list_for_property(&req.property_id, filter, PageRequest::new(req.page, req.limit))
            .await?;
        Ok(page_to_proto(page))
    }

    #[tracing::instrument(skip(self, request))]
    async fn confirm_appointment(
        &self,
        request: Request<TransitionRequest>,
    ) -> Result<Response<AppointmentResponse>, Status> {
        self.transition(request, Transition::Confirm).await
    }

    #[tracing::instrument(skip(self, request))]
    async fn cancel_appointment(
        &self,
        request: Request<TransitionRequest>,
    ) -> Result<Response<AppointmentResponse>, Status> {
        self.transition(request, Transition::Cancel).await
    }

    #[tracing::instrument(skip(self, request))]
    async fn complete_appointment(
        &self,
        request: Request<TransitionRequest>,
    ) -> Result<Response<AppointmentResponse>, Status> {
        self.transition(request, Transition::Complete).await
    }

    #[tracing::instrument(skip(self, request))]
    async fn reschedule_appointment(
        &self,
        request: Request<RescheduleAppointmentRequest>,
    ) -> Result<Response<AppointmentResponse>, Status> {
        let req = request.into_inner();
        if req.id.is_empty() {
            return Err(AppError::ValidationFailed("Appointment id is required".to_string()).into());
        }
        let appointment = self
            .workflow
            .reschedule(RescheduleRequest {
                appointment_id: req.id,
                actor_id: req.actor_id,
                scheduled_at: optional_datetime(req.scheduled_at.as_ref())?,
                flexible_date: req.flexible_date,
            })
            .await?;
        Ok(appointment_response(&appointment))
    }

    #[tracing::instrument(skip(self, request))]
    async fn add_feedback(
        &self,
        request: Request<AddFeedbackRequest>,
    ) -> Result<Response<AppointmentResponse>, Status> {
        let req = request.into_inner();
        let appointment = self
            .workflow
            .add_feedback(FeedbackRequest {
                appointment_id: req.id,
                actor_id: req.actor_id,
                rating: req.rating,
                comment: req.comment,
            })
            .await?;
        Ok(appointment_response(&appointment))
    }

    #[tracing::instrument(skip(self, request))]
    async fn get_appointment_stats(
        &self,
        request: Request<GetAppointmentStatsRequest>,
    ) -> Result<Response<GetAppointmentStatsResponse>, Status> {
        let req = request.into_inner();
        let period = StatsPeriod::parse_or_month(&req.period);
        let stats = self.workflow.stats(Some(&req.user_id), period).await?;

        Ok(Response::new(GetAppointmentStatsResponse {
            total: stats.total,
            period: stats.period.as_str().to_string(),
            by_status: stats
                .by_status
                .iter()
                .map(|s| StatusCount {
                    status: s.key.as_str().to_string(),
                    count: s.count,
                    percentage: s.percentage,
                })
                .collect(),
            by_weekday: stats
                .by_weekday
                .iter()
                .map(|s| WeekdayCount {
                    weekday: weekday_name(s.key).to_string(),
                    count: s.count,
                    percentage: s.percentage,
                })
                .collect(),
            start: Some(datetime_to_timestamp(stats.start)),
            end: Some(datetime_to_timestamp(stats.end)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_convert_both_ways() {
        let now = DateTime::from_timestamp(1_900_000_000, 500).unwrap();
        assert_eq!(timestamp_to_datetime(&datetime_to_timestamp(now)).unwrap(), now);

        let negative_nanos = Timestamp { seconds: 0, nanos: -1 };
        assert!(timestamp_to_datetime(&negative_nanos).is_err());
    }

    #[test]
    fn blank_status_does_not_filter() {
        assert!(list_filter("", None, None).unwrap().status.is_none());
        assert_eq!(
            list_filter("Confirmed", None, None).unwrap().status,
            Some(AppointmentStatus::Confirmed)
        );
        assert!(list_filter("archived", None, None).is_err());
    }
}
