use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::workflow::AppointmentWorkflow;

/// Periodically publishes reminders for confirmed appointments that are due,
/// and events left in appointment outboxes by earlier broker outages.
pub struct ReminderWorker {
    workflow: Arc<AppointmentWorkflow>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl ReminderWorker {
    pub fn new(workflow: Arc<AppointmentWorkflow>, interval: Duration, parent: &CancellationToken) -> Self {
        Self {
            workflow,
            interval,
            shutdown_token: parent.child_token(),
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting reminder worker");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = self.shutdown_token.cancelled() => {
                        tracing::info!("Reminder worker shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.workflow.publish_pending_events().await {
                            tracing::error!(error = %e, "Outbox sweep failed");
                        }
                        if let Err(e) = self.workflow.send_due_reminders().await {
                            tracing::error!(error = %e, "Reminder sweep failed");
                        }
                    }
                }
            }
        })
    }
}
