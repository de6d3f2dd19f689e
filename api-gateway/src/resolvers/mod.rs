//! Operation resolvers. Each operation makes one primary call whose failure
//! fails the field, then enriches the result with best-effort lookups.

pub mod arguments;
pub mod deadline;
pub mod views;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use service_core::error::AppError;
use service_core::grpc::proto::appointment::{
    Appointment, CreateAppointmentRequest, ListAppointmentsResponse,
    ListPropertyAppointmentsRequest, ListUserAppointmentsRequest, RescheduleAppointmentRequest,
};
use service_core::grpc::{
    AppointmentClient, ClientDirectory, PropertyClient, PropertySummary, RpcAdapterConfig,
    Transition, UserClient, UserRef,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use self::arguments::{
    decode, CreateAppointmentArgs, FeedbackArgs, IdArgs, ListArgs, RescheduleArgs, StatsArgs,
    TransitionArgs, UsersArgs,
};
pub use self::deadline::Deadline;
use self::views::{to_timestamp, AppointmentListView, AppointmentView, PropertyView, StatsView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    User,
    Users,
    Property,
    Appointment,
    CreateAppointment,
    ConfirmAppointment,
    CancelAppointment,
    CompleteAppointment,
    RescheduleAppointment,
    AddAppointmentFeedback,
    UserAppointments,
    PropertyAppointments,
    AppointmentStats,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::User,
        Operation::Users,
        Operation::Property,
        Operation::Appointment,
        Operation::CreateAppointment,
        Operation::ConfirmAppointment,
        Operation::CancelAppointment,
        Operation::CompleteAppointment,
        Operation::RescheduleAppointment,
        Operation::AddAppointmentFeedback,
        Operation::UserAppointments,
        Operation::PropertyAppointments,
        Operation::AppointmentStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::User => "user",
            Operation::Users => "users",
            Operation::Property => "property",
            Operation::Appointment => "appointment",
            Operation::CreateAppointment => "createAppointment",
            Operation::ConfirmAppointment => "confirmAppointment",
            Operation::CancelAppointment => "cancelAppointment",
            Operation::CompleteAppointment => "completeAppointment",
            Operation::RescheduleAppointment => "rescheduleAppointment",
            Operation::AddAppointmentFeedback => "addAppointmentFeedback",
            Operation::UserAppointments => "userAppointments",
            Operation::PropertyAppointments => "propertyAppointments",
            Operation::AppointmentStats => "appointmentStats",
        }
    }
}

impl FromStr for Operation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| AppError::ValidationFailed(format!("Unknown operation: {}", s)))
    }
}

/// Per-query state shared by all of its operations.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Caller identity from `x-user-id`.
    pub caller: Option<String>,
    pub deadline: Deadline,
}

impl QueryContext {
    fn actor(&self) -> String {
        self.caller.clone().unwrap_or_default()
    }
}

/// Typed clients for every backend the gateway reaches.
#[derive(Clone)]
pub struct Resolver {
    users: UserClient,
    properties: PropertyClient,
    appointments: AppointmentClient,
}

fn to_json<T: Serialize>(value: T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::InternalError(e.into()))
}

impl Resolver {
    pub fn new(users: UserClient, properties: PropertyClient, appointments: AppointmentClient) -> Self {
        Self {
            users,
            properties,
            appointments,
        }
    }

    pub fn from_directory(
        directory: &ClientDirectory,
        config: &RpcAdapterConfig,
    ) -> Result<Self, AppError> {
        Ok(Self::new(
            UserClient::new(directory, config)?,
            PropertyClient::new(directory, config)?,
            AppointmentClient::new(directory, config)?,
        ))
    }

    /// Resolve one operation to its JSON value.
    #[tracing::instrument(skip(self, ctx, arguments), fields(caller = ?ctx.caller))]
    pub async fn resolve(
        &self,
        ctx: &QueryContext,
        operation: Operation,
        arguments: Value,
    ) -> Result<Value, AppError> {
        let deadline = ctx.deadline;
        match operation {
            Operation::User => {
                let args: IdArgs = decode(arguments)?;
                to_json(deadline.primary("GetUser", self.users.get_user(&args.id)).await?)
            }
            Operation::Users => {
                let args: UsersArgs = decode(arguments)?;
                let users = deadline
                    .primary("GetUsers", self.users.get_users(args.role.as_deref()))
                    .await?;
                to_json(users)
            }
            Operation::Property => {
                let args: IdArgs = decode(arguments)?;
                let property = deadline
                    .primary("GetProperty", self.properties.get_property(&args.id))
                    .await?;
                let owner = self.user_or_default(ctx, &property.owner_id).await;
                to_json(PropertyView { property, owner })
            }
            Operation::Appointment => {
                let args: IdArgs = decode(arguments)?;
                let appointment = deadline
                    .primary("GetAppointment", self.appointments.get_appointment(&args.id))
                    .await?;
                to_json(self.enrich(ctx, appointment).await)
            }
            Operation::CreateAppointment => {
                let args: CreateAppointmentArgs = decode(arguments)?;
                let request = CreateAppointmentRequest {
                    property_id: args.property_id,
                    requester_user_id: args
                        .requester_user_id
                        .or_else(|| ctx.caller.clone())
                        .unwrap_or_default(),
                    agent_user_id: args.agent_user_id.unwrap_or_default(),
                    scheduled_at: Some(to_timestamp(args.scheduled_at)),
                    duration_minutes: args.duration_minutes,
                    kind: args.kind,
                    note: args.note,
                    status: args.status,
                    flexible_date: args.flexible_date,
                };
                let appointment = deadline
                    .primary(
                        "CreateAppointment",
                        self.appointments.create_appointment(request),
                    )
                    .await?;
                to_json(self.enrich(ctx, appointment).await)
            }
            Operation::ConfirmAppointment => {
                self.transition(ctx, Transition::Confirm, arguments).await
            }
            Operation::CancelAppointment => {
                self.transition(ctx, Transition::Cancel, arguments).await
            }
            Operation::CompleteAppointment => {
                self.transition(ctx, Transition::Complete, arguments).await
            }
            Operation::RescheduleAppointment => {
                let args: RescheduleArgs = decode(arguments)?;
                let request = RescheduleAppointmentRequest {
                    id: args.id,
                    actor_id: ctx.actor(),
                    scheduled_at: Some(to_timestamp(args.scheduled_at)),
                    flexible_date: args.flexible_date,
                };
                let appointment = deadline
                    .primary(
                        "RescheduleAppointment",
                        self.appointments.reschedule(request),
                    )
                    .await?;
                to_json(self.enrich(ctx, appointment).await)
            }
            Operation::AddAppointmentFeedback => {
                let args: FeedbackArgs = decode(arguments)?;
                let actor = ctx.caller.clone().ok_or_else(|| {
                    AppError::ValidationFailed("Feedback requires the x-user-id header".to_string())
                })?;
                let appointment = deadline
                    .primary(
                        "AddFeedback",
                        self.appointments
                            .add_feedback(&args.id, &actor, args.rating, &args.comment),
                    )
                    .await?;
                to_json(self.enrich(ctx, appointment).await)
            }
            Operation::UserAppointments => {
                let args: ListArgs = decode(arguments)?;
                let user_id = args
                    .user_id
                    .clone()
                    .or_else(|| ctx.caller.clone())
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        AppError::ValidationFailed(
                            "userId is required without an x-user-id header".to_string(),
                        )
                    })?;
                let request = ListUserAppointmentsRequest {
                    user_id,
                    status: args.status.unwrap_or_default(),
                    from: args.from.map(to_timestamp),
                    to: args.to.map(to_timestamp),
                    page: args.page,
                    limit: args.limit,
                };
                let page = deadline
                    .primary(
                        "ListUserAppointments",
                        self.appointments.list_user_appointments(request),
                    )
                    .await?;
                to_json(self.enrich_page(ctx, page).await)
            }
            Operation::PropertyAppointments => {
                let args: ListArgs = decode(arguments)?;
                let property_id = args
                    .property_id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| AppError::ValidationFailed("propertyId is required".to_string()))?;
                let request = ListPropertyAppointmentsRequest {
                    property_id,
                    status: args.status.unwrap_or_default(),
                    from: args.from.map(to_timestamp),
                    to: args.to.map(to_timestamp),
                    page: args.page,
                    limit: args.limit,
                };
                let page = deadline
                    .primary(
                        "ListPropertyAppointments",
                        self.appointments.list_property_appointments(request),
                    )
                    .await?;
                to_json(self.enrich_page(ctx, page).await)
            }
            Operation::AppointmentStats => {
                let args: StatsArgs = decode(arguments)?;
                let stats = deadline
                    .primary(
                        "GetAppointmentStats",
                        self.appointments
                            .get_stats(args.user_id.as_deref(), args.period.as_deref()),
                    )
                    .await?;
                to_json(StatsView::from(stats))
            }
        }
    }

    async fn transition(
        &self,
        ctx: &QueryContext,
        transition: Transition,
        arguments: Value,
    ) -> Result<Value, AppError> {
        let args: TransitionArgs = decode(arguments)?;
        let actor = ctx.actor();
        let appointment = ctx
            .deadline
            .primary(
                "TransitionAppointment",
                self.appointments
                    .transition(transition, &args.id, &actor, &args.note),
            )
            .await?;
        to_json(self.enrich(ctx, appointment).await)
    }

    async fn user_or_default(&self, ctx: &QueryContext, id: &str) -> UserRef {
        ctx.deadline
            .optional("GetUser", self.users.get_user_or_default(id), || {
                UserRef::unknown(id)
            })
            .await
    }

    async fn property_or_none(&self, ctx: &QueryContext, id: &str) -> Option<PropertySummary> {
        ctx.deadline
            .optional("GetProperty", self.properties.get_property_or_none(id), || None)
            .await
    }

    /// Embed requester, agent and property, fetched concurrently.
    async fn enrich(&self, ctx: &QueryContext, appointment: Appointment) -> AppointmentView {
        let (requester, agent, property) = tokio::join!(
            self.user_or_default(ctx, &appointment.requester_user_id),
            self.user_or_default(ctx, &appointment.agent_user_id),
            self.property_or_none(ctx, &appointment.property_id),
        );
        AppointmentView::new(appointment, requester, agent, property)
    }

    /// Enrich a page, looking each distinct user and property up once.
    async fn enrich_page(
        &self,
        ctx: &QueryContext,
        page: ListAppointmentsResponse,
    ) -> AppointmentListView {
        let user_ids: HashSet<&str> = page
            .appointments
            .iter()
            .flat_map(|a| [a.requester_user_id.as_str(), a.agent_user_id.as_str()])
            .collect();
        let property_ids: HashSet<&str> = page
            .appointments
            .iter()
            .map(|a| a.property_id.as_str())
            .collect();

        let (users, properties) = tokio::join!(
            join_all(user_ids.into_iter().map(|id| async move {
                (id.to_string(), self.user_or_default(ctx, id).await)
            })),
            join_all(property_ids.into_iter().map(|id| async move {
                (id.to_string(), self.property_or_none(ctx, id).await)
            })),
        );
        let users: HashMap<String, UserRef> = users.into_iter().collect();
        let properties: HashMap<String, Option<PropertySummary>> =
            properties.into_iter().collect();

        let appointments = page
            .appointments
            .into_iter()
            .map(|a| {
                let requester = users
                    .get(&a.requester_user_id)
                    .cloned()
                    .unwrap_or_else(|| UserRef::unknown(&a.requester_user_id));
                let agent = users
                    .get(&a.agent_user_id)
                    .cloned()
                    .unwrap_or_else(|| UserRef::unknown(&a.agent_user_id));
                let property = properties.get(&a.property_id).cloned().flatten();
                AppointmentView::new(a, requester, agent, property)
            })
            .collect();

        AppointmentListView {
            appointments,
            total: page.total,
            page: page.page,
            limit: page.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert_eq!(
            "rescheduleAppointment".parse::<Operation>().unwrap(),
            Operation::RescheduleAppointment
        );
        let err = "deleteEverything".parse::<Operation>().unwrap_err();
        assert_eq!(err.kind(), "VALIDATION_FAILED");
    }
}
