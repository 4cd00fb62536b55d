use crate::domain::{Appointment, PaymentMethod};
use crate::error::AppError;
use crate::providers::CheckoutSession;
use crate::services::{CreateAppointmentInput, PaymentConfirmation};
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub subject_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub payment_method: PaymentMethod,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub order_code: String,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: String,
    pub payment_method: String,
    pub payment_status: String,
    pub gross_amount: BigDecimal,
    pub platform_fee: BigDecimal,
    pub teacher_earning: BigDecimal,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub no_show: bool,
    pub lesson_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub meeting_join_url: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Appointment> for AppointmentResponse {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            order_code: a.order_code,
            teacher_id: a.teacher_id,
            student_id: a.student_id,
            subject_id: a.subject_id,
            scheduled_at: a.scheduled_at,
            duration_minutes: a.duration_minutes,
            status: a.status,
            payment_method: a.payment_method,
            payment_status: a.payment_status,
            gross_amount: a.gross_amount,
            platform_fee: a.platform_fee,
            teacher_earning: a.teacher_earning,
            payment_deadline: a.payment_deadline,
            cancellation_reason: a.cancellation_reason,
            no_show: a.no_show,
            lesson_started_at: a.lesson_started_at,
            completed_at: a.completed_at,
            meeting_join_url: a.meeting_join_url,
            note: a.note,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateAppointmentResponse {
    pub appointment: AppointmentResponse,
    pub checkout: Option<CheckoutSession>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<CreateAppointmentResponse>, AppError> {
    let created = state
        .booking
        .create_appointment(CreateAppointmentInput {
            student_id: request.student_id,
            teacher_id: request.teacher_id,
            subject_id: request.subject_id,
            scheduled_at: request.scheduled_at,
            duration_minutes: request.duration_minutes,
            payment_method: request.payment_method,
            note: request.note,
        })
        .await?;

    Ok(Json(CreateAppointmentResponse {
        appointment: created.appointment.into(),
        checkout: created.checkout,
    }))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state.booking.get_appointment(id).await?;
    Ok(Json(appointment.into()))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor_id: Uuid,
    pub reason: Option<String>,
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state
        .booking
        .cancel_appointment(id, request.actor_id, request.reason)
        .await?;
    Ok(Json(appointment.into()))
}

#[derive(Debug, Deserialize)]
pub struct StartLessonRequest {
    pub teacher_id: Uuid,
}

pub async fn start_lesson(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StartLessonRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state
        .booking
        .mark_lesson_started(id, request.teacher_id)
        .await?;
    Ok(Json(appointment.into()))
}

#[derive(Debug, Deserialize)]
pub struct NoShowRequest {
    pub teacher_id: Uuid,
    pub notes: Option<String>,
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<NoShowRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state
        .booking
        .mark_no_show(id, request.teacher_id, request.notes)
        .await?;
    Ok(Json(appointment.into()))
}

#[derive(Debug, Deserialize)]
pub struct CompleteLessonRequest {
    pub actor_id: Uuid,
}

/// Feedback submission finishes the lesson; the auto-complete job covers
/// participants who never submit one.
pub async fn complete_lesson(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteLessonRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state.booking.complete_lesson(id, request.actor_id).await?;
    Ok(Json(appointment.into()))
}

#[derive(Debug, Deserialize)]
pub struct TransferReviewRequest {
    pub admin_id: Uuid,
    pub reason: Option<String>,
}

pub async fn approve_bank_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransferReviewRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state
        .booking
        .confirm_payment(
            id,
            PaymentConfirmation::AdminApproval {
                admin_id: request.admin_id,
            },
        )
        .await?;
    Ok(Json(appointment.into()))
}

pub async fn reject_bank_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransferReviewRequest>,
) -> Result<Json<AppointmentResponse>, AppError> {
    let appointment = state
        .booking
        .reject_bank_transfer(id, request.admin_id, request.reason)
        .await?;
    Ok(Json(appointment.into()))
}
