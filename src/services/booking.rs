//! Appointment state machine.
//!
//! Owns every transition of a booking and the side effects hanging off
//! them. All guards re-check the persisted status inside the UPDATE
//! itself, so a cancellation racing an expiration job resolves to exactly
//! one winner; the loser surfaces as a Conflict or a handler no-op, never
//! a crash. Best-effort collaborators (meetings, notifications) are
//! invoked after the transition commits and can only ever log.

use crate::config::BookingPolicy;
use crate::db::queries;
use crate::domain::{
    generate_order_code, Appointment, AppointmentStatus, FeeSplit, PaymentMethod, PaymentStatus,
};
use crate::error::AppError;
use crate::providers::{
    CheckoutOrder, CheckoutSession, MeetingProvider, NotificationKind, NotificationRequest,
    PaymentGateway, Recipient, TeacherDirectory,
};
use crate::services::availability::AvailabilityChecker;
use crate::services::jobs;
use crate::services::notifier::NotificationOutbox;
use crate::services::settlement::SettlementService;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const SLOT_CONSTRAINT: &str = "appointments_active_slot_key";
const ORDER_CODE_CONSTRAINT: &str = "appointments_order_code_key";
const ORDER_CODE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CreateAppointmentInput {
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub subject_id: Uuid,
    pub scheduled_at: chrono::DateTime<Utc>,
    pub duration_minutes: i32,
    pub payment_method: PaymentMethod,
    pub note: Option<String>,
}

/// A freshly created booking; card payments also carry the hosted
/// checkout session to render.
#[derive(Debug)]
pub struct CreatedAppointment {
    pub appointment: Appointment,
    pub checkout: Option<CheckoutSession>,
}

/// What drove a payment confirmation: the gateway calling back with a
/// checkout token, or an admin approving a bank-transfer receipt.
#[derive(Debug, Clone)]
pub enum PaymentConfirmation {
    GatewayCallback { token: String },
    AdminApproval { admin_id: Uuid },
}

#[derive(Clone)]
pub struct BookingService {
    pool: PgPool,
    policy: BookingPolicy,
    directory: Arc<dyn TeacherDirectory>,
    availability: AvailabilityChecker,
    gateway: Arc<dyn PaymentGateway>,
    meetings: Arc<dyn MeetingProvider>,
    settlement: SettlementService,
    outbox: NotificationOutbox,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        policy: BookingPolicy,
        directory: Arc<dyn TeacherDirectory>,
        availability: AvailabilityChecker,
        gateway: Arc<dyn PaymentGateway>,
        meetings: Arc<dyn MeetingProvider>,
        settlement: SettlementService,
        outbox: NotificationOutbox,
    ) -> Self {
        Self {
            pool,
            policy,
            directory,
            availability,
            gateway,
            meetings,
            settlement,
            outbox,
        }
    }

    // -- create -------------------------------------------------------------

    pub async fn create_appointment(
        &self,
        input: CreateAppointmentInput,
    ) -> Result<CreatedAppointment, AppError> {
        let now = Utc::now();

        if input.duration_minutes < self.policy.min_duration_minutes as i32
            || input.duration_minutes > self.policy.max_duration_minutes as i32
        {
            return Err(AppError::Validation(format!(
                "duration must be between {} and {} minutes",
                self.policy.min_duration_minutes, self.policy.max_duration_minutes
            )));
        }
        if input.scheduled_at < now + Duration::hours(self.policy.min_booking_hours) {
            return Err(AppError::Validation(format!(
                "lessons must be booked at least {} hours ahead",
                self.policy.min_booking_hours
            )));
        }
        if input.scheduled_at > now + Duration::days(self.policy.max_booking_days) {
            return Err(AppError::Validation(format!(
                "lessons cannot be booked more than {} days ahead",
                self.policy.max_booking_days
            )));
        }

        let profile = self
            .directory
            .teacher_profile(input.teacher_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("teacher {} not found", input.teacher_id)))?;
        if !profile.approved {
            return Err(AppError::Validation(
                "teacher is not approved for bookings".to_string(),
            ));
        }

        let subject = self
            .directory
            .subject(input.subject_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subject {} not found", input.subject_id)))?;
        if subject.branch_id != profile.branch_id {
            return Err(AppError::Validation(
                "subject does not belong to the teacher's branch".to_string(),
            ));
        }

        if !self
            .availability
            .is_bookable(input.teacher_id, input.scheduled_at, input.duration_minutes)
            .await?
        {
            return Err(AppError::Validation(
                "teacher is not available at the requested time".to_string(),
            ));
        }

        let split = FeeSplit::compute(&profile.hourly_rate, &profile.commission_percent);
        let appointment = self.persist_new(&input, split, now).await?;

        let checkout = match input.payment_method {
            PaymentMethod::CreditCard => {
                let order = CheckoutOrder {
                    order_code: appointment.order_code.clone(),
                    appointment_id: appointment.id,
                    buyer_id: appointment.student_id,
                    amount: appointment.gross_amount.clone(),
                };
                let session = self
                    .gateway
                    .initialize_payment(&order)
                    .await
                    .map_err(|e| AppError::Gateway(e.to_string()))?;
                Some(session)
            }
            PaymentMethod::BankTransfer => None,
        };

        tracing::info!(
            "Created appointment {} ({}) for teacher {} at {}",
            appointment.id,
            appointment.order_code,
            appointment.teacher_id,
            appointment.scheduled_at
        );

        Ok(CreatedAppointment {
            appointment,
            checkout,
        })
    }

    /// Inserts the row (plus the expiry job for bank transfers) in one
    /// transaction. The partial unique index arbitrates concurrent
    /// bookings of the same slot; order-code collisions are regenerated.
    async fn persist_new(
        &self,
        input: &CreateAppointmentInput,
        split: FeeSplit,
        now: chrono::DateTime<Utc>,
    ) -> Result<Appointment, AppError> {
        for _ in 0..ORDER_CODE_ATTEMPTS {
            let mut appointment = Appointment::new(
                generate_order_code(now),
                input.teacher_id,
                input.student_id,
                input.subject_id,
                input.scheduled_at,
                input.duration_minutes,
                input.payment_method,
                split.clone(),
                input.note.clone(),
            );
            if input.payment_method == PaymentMethod::BankTransfer {
                appointment.payment_deadline =
                    Some(now + Duration::hours(self.policy.bank_transfer_deadline_hours));
            }

            let mut tx = self.pool.begin().await?;
            let inserted = match queries::insert_appointment(&mut *tx, &appointment).await {
                Ok(inserted) => inserted,
                Err(e) => match queries::violated_constraint(&e) {
                    Some(SLOT_CONSTRAINT) => {
                        return Err(AppError::Conflict(
                            "slot is no longer available".to_string(),
                        ))
                    }
                    Some(ORDER_CODE_CONSTRAINT) => continue,
                    _ => return Err(e.into()),
                },
            };

            if let Some(deadline) = inserted.payment_deadline {
                let run_at = deadline + Duration::hours(self.policy.expire_grace_hours);
                jobs::arm_expire_job(&mut *tx, inserted.id, run_at).await?;
            }

            tx.commit().await?;
            return Ok(inserted);
        }

        Err(AppError::Internal(
            "could not generate a unique order code".to_string(),
        ))
    }

    // -- confirm ------------------------------------------------------------

    /// Drives PENDING_PAYMENT -> CONFIRMED off a successful payment.
    /// Everything after the transition commits is best-effort.
    pub async fn confirm_payment(
        &self,
        appointment_id: Uuid,
        source: PaymentConfirmation,
    ) -> Result<Appointment, AppError> {
        let appointment = self.load(appointment_id).await?;

        let payment_ref = match &source {
            PaymentConfirmation::GatewayCallback { token } => {
                let result = self
                    .gateway
                    .retrieve_result(token)
                    .await
                    .map_err(|e| AppError::Gateway(e.to_string()))?;
                if !result.is_success() {
                    return Err(AppError::Gateway(format!(
                        "payment for {} was not successful: {}",
                        appointment.order_code, result.status
                    )));
                }
                if result.conversation_id != appointment.order_code {
                    return Err(AppError::Validation(format!(
                        "payment result belongs to {}, not {}",
                        result.conversation_id, appointment.order_code
                    )));
                }
                Some(result.payment_id)
            }
            PaymentConfirmation::AdminApproval { .. } => None,
        };

        let transitioned =
            queries::confirm_appointment(&self.pool, appointment_id, payment_ref.as_deref())
                .await?;
        if !transitioned {
            return Err(AppError::Conflict(format!(
                "appointment {} is no longer awaiting payment",
                appointment.order_code
            )));
        }

        if let PaymentConfirmation::AdminApproval { admin_id } = &source {
            tracing::info!(
                "Bank transfer for {} approved by admin {}",
                appointment.order_code,
                admin_id
            );
        }

        self.after_confirmation(&appointment).await;
        self.load(appointment_id).await
    }

    async fn after_confirmation(&self, appointment: &Appointment) {
        match self
            .meetings
            .create_meeting(
                &appointment.order_code,
                appointment.scheduled_at,
                appointment.duration_minutes,
            )
            .await
        {
            Ok(details) => {
                if let Err(e) = queries::set_meeting(
                    &self.pool,
                    appointment.id,
                    &details.meeting_id,
                    &details.join_url,
                )
                .await
                {
                    tracing::error!(
                        "Failed to store meeting link for {}: {}",
                        appointment.id,
                        e
                    );
                }
            }
            Err(e) => {
                tracing::warn!("Meeting creation failed for {}: {}", appointment.id, e);
            }
        }

        if let Err(e) =
            jobs::arm_post_confirmation_jobs(&self.pool, appointment, &self.policy, Utc::now())
                .await
        {
            tracing::error!(
                "Failed to arm lifecycle jobs for {}: {}",
                appointment.id,
                e
            );
        }

        match self
            .settlement
            .credit_earning(
                appointment.teacher_id,
                appointment.id,
                &appointment.teacher_earning,
            )
            .await
        {
            Ok(_) => {}
            Err(e) => {
                // The completion paths re-attempt this credit; the ledger
                // stays consistent either way.
                tracing::error!("Earning credit failed for {}: {}", appointment.id, e);
            }
        }

        self.notify_parties(
            appointment,
            NotificationKind::BookingConfirmed,
            serde_json::json!({
                "order_code": appointment.order_code,
                "scheduled_at": appointment.scheduled_at,
            }),
        )
        .await;
    }

    // -- cancel -------------------------------------------------------------

    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppError> {
        let appointment = self.load(appointment_id).await?;
        if actor_id != appointment.student_id {
            return Err(AppError::Forbidden(
                "only the booking owner may cancel".to_string(),
            ));
        }

        let status: AppointmentStatus = appointment
            .status
            .parse()
            .map_err(AppError::Internal)?;

        match status {
            AppointmentStatus::PendingPayment => {
                let transitioned = queries::cancel_appointment(
                    &self.pool,
                    appointment_id,
                    AppointmentStatus::PendingPayment,
                    PaymentStatus::Cancelled,
                    actor_id,
                    reason.as_deref(),
                )
                .await?;
                if !transitioned {
                    return Err(AppError::Conflict(
                        "appointment was already finalized".to_string(),
                    ));
                }
            }
            AppointmentStatus::Confirmed => {
                let cutoff = appointment.scheduled_at
                    - Duration::hours(self.policy.cancellation_deadline_hours);
                if Utc::now() >= cutoff {
                    return Err(AppError::DeadlineExceeded(format!(
                        "cancellations close {} hours before the lesson",
                        self.policy.cancellation_deadline_hours
                    )));
                }

                let transitioned = queries::cancel_appointment(
                    &self.pool,
                    appointment_id,
                    AppointmentStatus::Confirmed,
                    PaymentStatus::Paid,
                    actor_id,
                    reason.as_deref(),
                )
                .await?;
                if !transitioned {
                    return Err(AppError::Conflict(
                        "appointment was already finalized".to_string(),
                    ));
                }

                self.refund_and_reverse(&appointment).await;
                self.teardown_meeting(&appointment).await;
            }
            _ => {
                return Err(AppError::Conflict(format!(
                    "appointment in status {} cannot be cancelled",
                    appointment.status
                )));
            }
        }

        self.notify_parties(
            &appointment,
            NotificationKind::BookingCancelled,
            serde_json::json!({
                "order_code": appointment.order_code,
                "reason": reason,
            }),
        )
        .await;

        self.load(appointment_id).await
    }

    /// Admin rejection of a bank-transfer receipt: PENDING_PAYMENT ->
    /// CANCELLED with the review note attached.
    pub async fn reject_bank_transfer(
        &self,
        appointment_id: Uuid,
        admin_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, AppError> {
        let appointment = self.load(appointment_id).await?;
        if appointment.payment_method != PaymentMethod::BankTransfer.as_str() {
            return Err(AppError::Validation(
                "appointment was not paid by bank transfer".to_string(),
            ));
        }

        let transitioned = queries::cancel_appointment(
            &self.pool,
            appointment_id,
            AppointmentStatus::PendingPayment,
            PaymentStatus::Cancelled,
            admin_id,
            reason.as_deref(),
        )
        .await?;
        if !transitioned {
            return Err(AppError::Conflict(format!(
                "appointment {} is no longer awaiting payment",
                appointment.order_code
            )));
        }

        self.notify_parties(
            &appointment,
            NotificationKind::BookingCancelled,
            serde_json::json!({
                "order_code": appointment.order_code,
                "reason": reason,
            }),
        )
        .await;

        self.load(appointment_id).await
    }

    async fn refund_and_reverse(&self, appointment: &Appointment) {
        // Without a captured gateway payment there is nothing to refund
        // (admin-approved transfers are refunded out-of-band).
        if let Some(payment_ref) = &appointment.payment_ref {
            if let Err(e) = self
                .gateway
                .refund(payment_ref, &appointment.gross_amount)
                .await
            {
                tracing::error!("Refund failed for {}: {}", appointment.order_code, e);
                return;
            }
        }

        if let Err(e) =
            queries::set_payment_status(&self.pool, appointment.id, PaymentStatus::Refunded).await
        {
            tracing::error!(
                "Failed to mark {} refunded: {}",
                appointment.order_code,
                e
            );
        }
        if let Err(e) = self.settlement.reverse_earning(appointment.id).await {
            tracing::error!(
                "Failed to reverse earning for {}: {}",
                appointment.order_code,
                e
            );
        }
    }

    async fn teardown_meeting(&self, appointment: &Appointment) {
        if let Some(meeting_id) = &appointment.meeting_id {
            if let Err(e) = self.meetings.delete_meeting(meeting_id).await {
                tracing::warn!("Meeting teardown failed for {}: {}", appointment.id, e);
            }
        }
    }

    // -- lesson lifecycle ---------------------------------------------------

    /// CONFIRMED -> IN_PROGRESS, reported by the teacher at lesson start.
    pub async fn mark_lesson_started(
        &self,
        appointment_id: Uuid,
        teacher_id: Uuid,
    ) -> Result<Appointment, AppError> {
        let appointment = self.load(appointment_id).await?;
        if teacher_id != appointment.teacher_id {
            return Err(AppError::Forbidden(
                "only the assigned teacher may start the lesson".to_string(),
            ));
        }

        let transitioned = queries::start_lesson(&self.pool, appointment_id).await?;
        if !transitioned {
            return Err(AppError::Conflict(
                "lesson can only be started from a confirmed booking".to_string(),
            ));
        }

        self.load(appointment_id).await
    }

    /// CONFIRMED or IN_PROGRESS -> NO_SHOW, only once the scheduled start
    /// has passed.
    pub async fn mark_no_show(
        &self,
        appointment_id: Uuid,
        teacher_id: Uuid,
        notes: Option<String>,
    ) -> Result<Appointment, AppError> {
        let appointment = self.load(appointment_id).await?;
        if teacher_id != appointment.teacher_id {
            return Err(AppError::Forbidden(
                "only the assigned teacher may report a no-show".to_string(),
            ));
        }
        if Utc::now() < appointment.scheduled_at {
            return Err(AppError::Validation(
                "a no-show cannot be reported before the scheduled start".to_string(),
            ));
        }

        let from_confirmed = queries::mark_no_show(
            &self.pool,
            appointment_id,
            AppointmentStatus::Confirmed,
            notes.as_deref(),
        )
        .await?;
        let transitioned = if from_confirmed {
            true
        } else {
            queries::mark_no_show(
                &self.pool,
                appointment_id,
                AppointmentStatus::InProgress,
                notes.as_deref(),
            )
            .await?
        };
        if !transitioned {
            return Err(AppError::Conflict(format!(
                "appointment in status {} cannot be marked as a no-show",
                appointment.status
            )));
        }

        self.load(appointment_id).await
    }

    /// IN_PROGRESS -> COMPLETED via feedback submission. The auto-complete
    /// job takes the same storage path.
    pub async fn complete_lesson(
        &self,
        appointment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Appointment, AppError> {
        let appointment = self.load(appointment_id).await?;
        if actor_id != appointment.teacher_id && actor_id != appointment.student_id {
            return Err(AppError::Forbidden(
                "only a lesson participant may complete it".to_string(),
            ));
        }

        let transitioned = queries::complete_lesson(&self.pool, appointment_id).await?;
        if !transitioned {
            return Err(AppError::Conflict(
                "only a lesson in progress can be completed".to_string(),
            ));
        }

        if let Err(e) = self
            .settlement
            .credit_earning(
                appointment.teacher_id,
                appointment.id,
                &appointment.teacher_earning,
            )
            .await
        {
            tracing::error!("Earning credit failed for {}: {}", appointment.id, e);
        }

        self.notify_parties(
            &appointment,
            NotificationKind::LessonCompleted,
            serde_json::json!({ "order_code": appointment.order_code }),
        )
        .await;

        self.load(appointment_id).await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppError> {
        self.load(appointment_id).await
    }

    // -- helpers ------------------------------------------------------------

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppError> {
        queries::get_appointment(&self.pool, appointment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("appointment {appointment_id} not found")))
    }

    async fn notify_parties(
        &self,
        appointment: &Appointment,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) {
        let mut recipients = Vec::new();
        match self.directory.teacher_profile(appointment.teacher_id).await {
            Ok(Some(profile)) => recipients.push(Recipient {
                user_id: profile.id,
                email: profile.email,
                phone: profile.phone,
            }),
            Ok(None) => {}
            Err(e) => tracing::warn!("Teacher lookup failed for notification: {}", e),
        }
        match self.directory.student_contact(appointment.student_id).await {
            Ok(Some(contact)) => recipients.push(Recipient {
                user_id: contact.id,
                email: contact.email,
                phone: contact.phone,
            }),
            Ok(None) => {}
            Err(e) => tracing::warn!("Student lookup failed for notification: {}", e),
        }

        self.outbox.enqueue(NotificationRequest {
            kind,
            recipients,
            payload,
        });
    }
}
