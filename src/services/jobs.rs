//! Durable deferred-job runner.
//!
//! Jobs live in the `deferred_jobs` table and are claimed with
//! `FOR UPDATE SKIP LOCKED`, so delivery is at-least-once and survives
//! restarts and parallel workers. Every handler re-fetches the
//! appointment's current state before acting: a job that fires after the
//! appointment moved on through another path is a guaranteed no-op.

use crate::db::queries;
use crate::domain::{
    Appointment, AppointmentStatus, DeferredJob, JobKind, PaymentStatus, ReminderPayload,
    ReminderVariant,
};
use crate::error::AppError;
use crate::providers::{NotificationKind, NotificationRequest, Recipient, TeacherDirectory};
use crate::services::notifier::NotificationOutbox;
use crate::services::settlement::SettlementService;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgExecutor, PgPool};
use std::sync::Arc;
use tokio::time::sleep;
use uuid::Uuid;

const POLL_INTERVAL_SECS: u64 = 5;
const CLAIM_BATCH_SIZE: i64 = 20;

/// Arms the bank-transfer expiry check. Runs on the caller's executor so
/// it can share the booking's insert transaction.
pub async fn arm_expire_job(
    executor: impl PgExecutor<'_>,
    appointment_id: Uuid,
    run_at: DateTime<Utc>,
) -> sqlx::Result<DeferredJob> {
    let job = DeferredJob::new(
        JobKind::ExpireBankTransfer,
        appointment_id,
        run_at,
        serde_json::json!({}),
    );
    queries::insert_job(executor, &job).await
}

/// Arms both reminders and the auto-completion check once an appointment
/// is confirmed. Fire times already in the past are skipped, not fired
/// immediately.
pub async fn arm_post_confirmation_jobs(
    pool: &PgPool,
    appointment: &Appointment,
    policy: &crate::config::BookingPolicy,
    now: DateTime<Utc>,
) -> sqlx::Result<Vec<DeferredJob>> {
    let mut armed = Vec::new();

    for variant in [ReminderVariant::MorningOf, ReminderVariant::OneHourBefore] {
        let run_at = variant.fire_at(appointment.scheduled_at);
        if run_at <= now {
            tracing::debug!(
                "Skipping {:?} reminder for {}, fire time {} already passed",
                variant,
                appointment.id,
                run_at
            );
            continue;
        }
        let payload = serde_json::to_value(ReminderPayload { variant })
            .unwrap_or_else(|_| serde_json::json!({}));
        let job = DeferredJob::new(JobKind::Reminder, appointment.id, run_at, payload);
        armed.push(queries::insert_job(pool, &job).await?);
    }

    let auto_complete_at =
        appointment.scheduled_end() + Duration::hours(policy.auto_complete_hours);
    let job = DeferredJob::new(
        JobKind::AutoComplete,
        appointment.id,
        auto_complete_at,
        serde_json::json!({}),
    );
    armed.push(queries::insert_job(pool, &job).await?);

    Ok(armed)
}

/// Polls the durable queue and executes due jobs.
#[derive(Clone)]
pub struct JobRunner {
    pool: PgPool,
    settlement: SettlementService,
    directory: Arc<dyn TeacherDirectory>,
    outbox: NotificationOutbox,
}

impl JobRunner {
    pub fn new(
        pool: PgPool,
        settlement: SettlementService,
        directory: Arc<dyn TeacherDirectory>,
        outbox: NotificationOutbox,
    ) -> Self {
        Self {
            pool,
            settlement,
            directory,
            outbox,
        }
    }

    /// Runner loop. Runs until the process stops; errors are logged and
    /// the next pass retries.
    pub async fn run(self) {
        tracing::info!("Deferred job runner started");

        loop {
            match self.run_due_pass(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Executed {} deferred job(s)", n),
                Err(e) => tracing::error!("Job runner pass failed: {}", e),
            }

            sleep(std::time::Duration::from_secs(POLL_INTERVAL_SECS)).await;
        }
    }

    /// One claim-and-execute pass. Claims due rows under lock, marks them
    /// running, commits to release the locks, then executes each handler.
    /// A failed handler returns its job to the queue.
    pub async fn run_due_pass(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        let due = queries::claim_due_jobs(&mut *tx, now, CLAIM_BATCH_SIZE).await?;
        if due.is_empty() {
            return Ok(0);
        }
        for job in &due {
            queries::mark_job_running(&mut *tx, job.id).await?;
        }
        tx.commit().await?;

        let mut executed = 0;
        for job in due {
            match self.execute(&job, now).await {
                Ok(()) => {
                    queries::mark_job_done(&self.pool, job.id).await?;
                    executed += 1;
                }
                Err(e) => {
                    tracing::error!("Job {} ({}) failed: {}", job.id, job.kind, e);
                    queries::mark_job_failed(&self.pool, job.id, &e.to_string()).await?;
                }
            }
        }

        Ok(executed)
    }

    async fn execute(&self, job: &DeferredJob, now: DateTime<Utc>) -> Result<(), AppError> {
        let kind: JobKind = job.kind.parse().map_err(AppError::Internal)?;

        let appointment = match queries::get_appointment(&self.pool, job.appointment_id).await? {
            Some(appointment) => appointment,
            None => {
                tracing::warn!(
                    "Job {} targets missing appointment {}",
                    job.id,
                    job.appointment_id
                );
                return Ok(());
            }
        };

        match kind {
            JobKind::ExpireBankTransfer => self.handle_expire(&appointment, now).await,
            JobKind::Reminder => self.handle_reminder(job, &appointment).await,
            JobKind::AutoComplete => self.handle_auto_complete(&appointment).await,
        }
    }

    /// No-op unless the appointment is still awaiting payment and the
    /// deadline has passed; then PENDING_PAYMENT -> EXPIRED.
    async fn handle_expire(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let still_pending = appointment.status == AppointmentStatus::PendingPayment.as_str()
            && appointment.payment_status == PaymentStatus::Pending.as_str();
        let overdue = appointment
            .payment_deadline
            .map(|deadline| now >= deadline)
            .unwrap_or(false);
        if !still_pending || !overdue {
            return Ok(());
        }

        let transitioned = queries::expire_appointment(&self.pool, appointment.id).await?;
        if !transitioned {
            // Someone confirmed or cancelled between the read and the
            // write; the job's work no longer exists.
            return Ok(());
        }

        tracing::info!(
            "Appointment {} expired, bank transfer missed deadline {:?}",
            appointment.order_code,
            appointment.payment_deadline
        );

        self.notify(
            appointment,
            NotificationKind::BookingExpired,
            serde_json::json!({ "order_code": appointment.order_code }),
        )
        .await;
        Ok(())
    }

    /// No-op unless the appointment is still confirmed; otherwise emits
    /// the reminder with both parties' contacts and the meeting link.
    async fn handle_reminder(
        &self,
        job: &DeferredJob,
        appointment: &Appointment,
    ) -> Result<(), AppError> {
        if appointment.status != AppointmentStatus::Confirmed.as_str() {
            return Ok(());
        }

        let variant = serde_json::from_value::<ReminderPayload>(job.payload.clone())
            .map(|p| p.variant)
            .unwrap_or(ReminderVariant::OneHourBefore);

        self.notify(
            appointment,
            NotificationKind::LessonReminder,
            serde_json::json!({
                "order_code": appointment.order_code,
                "variant": variant,
                "scheduled_at": appointment.scheduled_at,
                "join_url": appointment.meeting_join_url,
            }),
        )
        .await;
        Ok(())
    }

    /// No-op unless the lesson is in progress; otherwise completes it and
    /// settles the earning (a duplicate credit is detected and ignored).
    async fn handle_auto_complete(&self, appointment: &Appointment) -> Result<(), AppError> {
        if appointment.status != AppointmentStatus::InProgress.as_str() {
            return Ok(());
        }

        let transitioned = queries::complete_lesson(&self.pool, appointment.id).await?;
        if !transitioned {
            return Ok(());
        }

        self.settlement
            .credit_earning(
                appointment.teacher_id,
                appointment.id,
                &appointment.teacher_earning,
            )
            .await?;

        self.notify(
            appointment,
            NotificationKind::LessonCompleted,
            serde_json::json!({ "order_code": appointment.order_code }),
        )
        .await;
        Ok(())
    }

    async fn notify(
        &self,
        appointment: &Appointment,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) {
        let mut recipients = Vec::new();
        if let Ok(Some(profile)) = self.directory.teacher_profile(appointment.teacher_id).await {
            recipients.push(Recipient {
                user_id: profile.id,
                email: profile.email,
                phone: profile.phone,
            });
        }
        if let Ok(Some(contact)) = self.directory.student_contact(appointment.student_id).await {
            recipients.push(Recipient {
                user_id: contact.id,
                email: contact.email,
                phone: contact.phone,
            });
        }

        self.outbox.enqueue(NotificationRequest {
            kind,
            recipients,
            payload,
        });
    }
}
