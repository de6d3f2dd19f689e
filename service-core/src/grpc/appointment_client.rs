//! Appointment service client. Every call is strict: bookings and state
//! changes never fall back to defaults. Booking is a single attempt, since a
//! replay would store a second appointment.

use tonic::Request;
use tonic::transport::Channel;

use super::adapter::{RpcAdapter, RpcAdapterConfig};
use super::directory::{ClientDirectory, LogicalService};
use super::interceptors::inject_trace_context;
use super::proto::appointment::appointment_service_client::AppointmentServiceClient;
use super::proto::appointment::{
    AddFeedbackRequest, Appointment, AppointmentResponse, CreateAppointmentRequest,
    GetAppointmentRequest, GetAppointmentStatsRequest, GetAppointmentStatsResponse,
    ListAppointmentsResponse, ListPropertyAppointmentsRequest, ListUserAppointmentsRequest,
    RescheduleAppointmentRequest, TransitionRequest,
};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Cancel,
    Complete,
}

impl Transition {
    fn method(&self) -> &'static str {
        match self {
            Transition::Confirm => "ConfirmAppointment",
            Transition::Cancel => "CancelAppointment",
            Transition::Complete => "CompleteAppointment",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppointmentClient {
    adapter: RpcAdapter,
    client: AppointmentServiceClient<Channel>,
}

fn unwrap_appointment(response: AppointmentResponse) -> Result<Appointment, AppError> {
    response
        .appointment
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Empty appointment response")))
}

impl AppointmentClient {
    pub fn new(directory: &ClientDirectory, config: &RpcAdapterConfig) -> Result<Self, AppError> {
        let endpoint = directory.resolve(LogicalService::Appointment)?;
        Ok(Self::from_adapter(RpcAdapter::new(endpoint, config)?))
    }

    pub fn from_adapter(adapter: RpcAdapter) -> Self {
        let client = AppointmentServiceClient::new(adapter.channel());
        Self { adapter, client }
    }

    pub async fn create_appointment(
        &self,
        message: CreateAppointmentRequest,
    ) -> Result<Appointment, AppError> {
        let response = self
            .adapter
            .call_once("CreateAppointment", || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move { client.create_appointment(request).await }
            })
            .await?;
        unwrap_appointment(response)
    }

    pub async fn get_appointment(&self, id: &str) -> Result<Appointment, AppError> {
        let response = self
            .adapter
            .call("GetAppointment", || {
                let mut client = self.client.clone();
                let mut request = Request::new(GetAppointmentRequest { id: id.to_string() });
                inject_trace_context(&mut request);
                async move { client.get_appointment(request).await }
            })
            .await?;
        unwrap_appointment(response)
    }

    pub async fn list_user_appointments(
        &self,
        message: ListUserAppointmentsRequest,
    ) -> Result<ListAppointmentsResponse, AppError> {
        self.adapter
            .call("ListUserAppointments", || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move { client.list_user_appointments(request).await }
            })
            .await
    }

    pub async fn list_property_appointments(
        &self,
        message: ListPropertyAppointmentsRequest,
    ) -> Result<ListAppointmentsResponse, AppError> {
        self.adapter
            .call("ListPropertyAppointments", || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move { client.list_property_appointments(request).await }
            })
            .await
    }

    pub async fn transition(
        &self,
        transition: Transition,
        id: &str,
        actor_id: &str,
        note: &str,
    ) -> Result<Appointment, AppError> {
        let message = TransitionRequest {
            id: id.to_string(),
            actor_id: actor_id.to_string(),
            note: note.to_string(),
        };
        let response = self
            .adapter
            .call(transition.method(), || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move {
                    match transition {
                        Transition::Confirm => client.confirm_appointment(request).await,
                        Transition::Cancel => client.cancel_appointment(request).await,
                        Transition::Complete => client.complete_appointment(request).await,
                    }
                }
            })
            .await?;
        unwrap_appointment(response)
    }

    /// Asking for the current slot again is a no-op on the server, so this
    /// call may be retried.
    pub async fn reschedule(
        &self,
        message: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppError> {
        let response = self
            .adapter
            .call("RescheduleAppointment", || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move { client.reschedule_appointment(request).await }
            })
            .await?;
        unwrap_appointment(response)
    }

    pub async fn add_feedback(
        &self,
        id: &str,
        actor_id: &str,
        rating: i32,
        comment: &str,
    ) -> Result<Appointment, AppError> {
        let message = AddFeedbackRequest {
            id: id.to_string(),
            actor_id: actor_id.to_string(),
            rating,
            comment: comment.to_string(),
        };
        let response = self
            .adapter
            .call("AddFeedback", || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move { client.add_feedback(request).await }
            })
            .await?;
        unwrap_appointment(response)
    }

    pub async fn get_stats(
        &self,
        user_id: Option<&str>,
        period: Option<&str>,
    ) -> Result<GetAppointmentStatsResponse, AppError> {
        let message = GetAppointmentStatsRequest {
            user_id: user_id.unwrap_or_default().to_string(),
            period: period.unwrap_or_default().to_string(),
        };
        self.adapter
            .call("GetAppointmentStats", || {
                let mut client = self.client.clone();
                let mut request = Request::new(message.clone());
                inject_trace_context(&mut request);
                async move { client.get_appointment_stats(request).await }
            })
            .await
    }
}
