//! Raw SQL for the appointment, wallet and deferred-job tables.
//!
//! State transitions are written with the previous status as a
//! precondition of the UPDATE, so two racing transitions resolve to
//! exactly one winner at the storage layer. Functions take any
//! `PgExecutor` so callers can enlist them in their own transactions.

use crate::domain::{Appointment, AppointmentStatus, DeferredJob, PaymentStatus, Wallet, WalletTransaction};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, Result};
use uuid::Uuid;

pub async fn insert_appointment(
    executor: impl PgExecutor<'_>,
    appt: &Appointment,
) -> Result<Appointment> {
    sqlx::query_as::<_, Appointment>(
        r#"
        INSERT INTO appointments (
            id, order_code, teacher_id, student_id, subject_id, scheduled_at,
            duration_minutes, status, payment_method, payment_status,
            gross_amount, platform_fee, teacher_earning, payment_deadline,
            payment_ref, note, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
        RETURNING *
        "#,
    )
    .bind(appt.id)
    .bind(&appt.order_code)
    .bind(appt.teacher_id)
    .bind(appt.student_id)
    .bind(appt.subject_id)
    .bind(appt.scheduled_at)
    .bind(appt.duration_minutes)
    .bind(&appt.status)
    .bind(&appt.payment_method)
    .bind(&appt.payment_status)
    .bind(&appt.gross_amount)
    .bind(&appt.platform_fee)
    .bind(&appt.teacher_earning)
    .bind(appt.payment_deadline)
    .bind(&appt.payment_ref)
    .bind(&appt.note)
    .bind(appt.created_at)
    .bind(appt.updated_at)
    .fetch_one(executor)
    .await
}

pub async fn get_appointment(
    executor: impl PgExecutor<'_>,
    id: Uuid,
) -> Result<Option<Appointment>> {
    sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_appointment_by_order_code(
    executor: impl PgExecutor<'_>,
    order_code: &str,
) -> Result<Option<Appointment>> {
    sqlx::query_as::<_, Appointment>("SELECT * FROM appointments WHERE order_code = $1")
        .bind(order_code)
        .fetch_optional(executor)
        .await
}

/// PENDING_PAYMENT -> CONFIRMED, gated on the persisted status so a racing
/// expiration or cancellation leaves exactly one winner. The gateway's
/// payment id is kept for later refunds; admin approvals have none.
pub async fn confirm_appointment(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    payment_ref: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE appointments
         SET status = 'confirmed', payment_status = 'paid',
             payment_ref = COALESCE($2, payment_ref), updated_at = NOW()
         WHERE id = $1 AND status = 'pending_payment' AND payment_status = 'pending'",
    )
    .bind(id)
    .bind(payment_ref)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// PENDING_PAYMENT -> EXPIRED for an overdue bank transfer.
pub async fn expire_appointment(executor: impl PgExecutor<'_>, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE appointments
         SET status = 'expired', payment_status = 'cancelled', updated_at = NOW()
         WHERE id = $1 AND status = 'pending_payment' AND payment_status = 'pending'",
    )
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Cancellation out of the given status; the caller decides the resulting
/// payment status (cancelled for unpaid rows, refunded for paid ones).
pub async fn cancel_appointment(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    from: AppointmentStatus,
    payment_status: PaymentStatus,
    actor_id: Uuid,
    reason: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE appointments
         SET status = 'cancelled', payment_status = $4, cancelled_by = $3,
             cancellation_reason = $5, updated_at = NOW()
         WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(actor_id)
    .bind(payment_status.as_str())
    .bind(reason)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// CONFIRMED -> IN_PROGRESS.
pub async fn start_lesson(executor: impl PgExecutor<'_>, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE appointments
         SET status = 'in_progress', lesson_started_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND status = 'confirmed'",
    )
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// IN_PROGRESS -> COMPLETED.
pub async fn complete_lesson(executor: impl PgExecutor<'_>, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE appointments
         SET status = 'completed', completed_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND status = 'in_progress'",
    )
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// CONFIRMED or IN_PROGRESS -> NO_SHOW, reported by the teacher.
pub async fn mark_no_show(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    from: AppointmentStatus,
    notes: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE appointments
         SET status = 'no_show', no_show = TRUE,
             cancellation_reason = COALESCE($3, cancellation_reason), updated_at = NOW()
         WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(notes)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Payment status fixup outside a status transition (e.g. refund settled
/// after a paid cancellation).
pub async fn set_payment_status(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    payment_status: PaymentStatus,
) -> Result<()> {
    sqlx::query("UPDATE appointments SET payment_status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(payment_status.as_str())
        .execute(executor)
        .await?;
    Ok(())
}

/// Best-effort meeting linkage written after a confirm; not part of the
/// transition itself.
pub async fn set_meeting(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    meeting_id: &str,
    join_url: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE appointments SET meeting_id = $2, meeting_join_url = $3, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(meeting_id)
    .bind(join_url)
    .execute(executor)
    .await?;
    Ok(())
}

/// Active (non-terminal) appointment for a teacher at an exact instant.
/// The partial unique index is the authority; this read exists for
/// friendlier pre-checks and tests.
pub async fn find_active_at(
    executor: impl PgExecutor<'_>,
    teacher_id: Uuid,
    scheduled_at: DateTime<Utc>,
) -> Result<Option<Appointment>> {
    sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments
         WHERE teacher_id = $1 AND scheduled_at = $2
           AND status IN ('pending_payment', 'confirmed', 'in_progress')",
    )
    .bind(teacher_id)
    .bind(scheduled_at)
    .fetch_optional(executor)
    .await
}

// -- wallets ----------------------------------------------------------------

pub async fn get_wallet(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Wallet>> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn get_wallet_by_teacher(
    executor: impl PgExecutor<'_>,
    teacher_id: Uuid,
) -> Result<Option<Wallet>> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE teacher_id = $1")
        .bind(teacher_id)
        .fetch_optional(executor)
        .await
}

/// Row-locks the wallet for a balance mutation. Credits and debits against
/// the same wallet serialize here.
pub async fn lock_wallet(executor: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Wallet>> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn lock_wallet_by_teacher(
    executor: impl PgExecutor<'_>,
    teacher_id: Uuid,
) -> Result<Option<Wallet>> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE teacher_id = $1 FOR UPDATE")
        .bind(teacher_id)
        .fetch_optional(executor)
        .await
}

/// Lazy wallet creation. ON CONFLICT DO NOTHING keeps two concurrent
/// first-credits from failing; the caller re-selects under lock afterwards.
pub async fn insert_wallet_if_absent(
    executor: impl PgExecutor<'_>,
    wallet: &Wallet,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO wallets (id, teacher_id, available_balance, pending_balance,
                              total_earned, total_withdrawn, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (teacher_id) DO NOTHING",
    )
    .bind(wallet.id)
    .bind(wallet.teacher_id)
    .bind(&wallet.available_balance)
    .bind(&wallet.pending_balance)
    .bind(&wallet.total_earned)
    .bind(&wallet.total_withdrawn)
    .bind(wallet.created_at)
    .bind(wallet.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn insert_wallet_transaction(
    executor: impl PgExecutor<'_>,
    tx: &WalletTransaction,
) -> Result<WalletTransaction> {
    sqlx::query_as::<_, WalletTransaction>(
        "INSERT INTO wallet_transactions (id, wallet_id, kind, amount, balance_after,
                                          appointment_id, batch_reference, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(tx.id)
    .bind(tx.wallet_id)
    .bind(&tx.kind)
    .bind(&tx.amount)
    .bind(&tx.balance_after)
    .bind(tx.appointment_id)
    .bind(&tx.batch_reference)
    .bind(tx.created_at)
    .fetch_one(executor)
    .await
}

pub async fn update_wallet_credited(
    executor: impl PgExecutor<'_>,
    wallet_id: Uuid,
    balance_after: &BigDecimal,
    amount: &BigDecimal,
) -> Result<()> {
    sqlx::query(
        "UPDATE wallets
         SET available_balance = $2, total_earned = total_earned + $3, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(wallet_id)
    .bind(balance_after)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_wallet_debited(
    executor: impl PgExecutor<'_>,
    wallet_id: Uuid,
    balance_after: &BigDecimal,
    amount: &BigDecimal,
) -> Result<()> {
    sqlx::query(
        "UPDATE wallets
         SET available_balance = $2, total_withdrawn = total_withdrawn + $3, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(wallet_id)
    .bind(balance_after)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_wallet_adjusted(
    executor: impl PgExecutor<'_>,
    wallet_id: Uuid,
    balance_after: &BigDecimal,
) -> Result<()> {
    sqlx::query("UPDATE wallets SET available_balance = $2, updated_at = NOW() WHERE id = $1")
        .bind(wallet_id)
        .bind(balance_after)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn list_wallet_transactions(
    executor: impl PgExecutor<'_>,
    wallet_id: Uuid,
) -> Result<Vec<WalletTransaction>> {
    sqlx::query_as::<_, WalletTransaction>(
        "SELECT * FROM wallet_transactions WHERE wallet_id = $1 ORDER BY created_at, id",
    )
    .bind(wallet_id)
    .fetch_all(executor)
    .await
}

pub async fn earning_for_appointment(
    executor: impl PgExecutor<'_>,
    appointment_id: Uuid,
) -> Result<Option<WalletTransaction>> {
    sqlx::query_as::<_, WalletTransaction>(
        "SELECT * FROM wallet_transactions WHERE appointment_id = $1 AND kind = 'earning'",
    )
    .bind(appointment_id)
    .fetch_optional(executor)
    .await
}

pub async fn adjustment_for_appointment(
    executor: impl PgExecutor<'_>,
    appointment_id: Uuid,
) -> Result<Option<WalletTransaction>> {
    sqlx::query_as::<_, WalletTransaction>(
        "SELECT * FROM wallet_transactions WHERE appointment_id = $1 AND kind = 'adjustment'",
    )
    .bind(appointment_id)
    .fetch_optional(executor)
    .await
}

// -- deferred jobs ----------------------------------------------------------

pub async fn insert_job(executor: impl PgExecutor<'_>, job: &DeferredJob) -> Result<DeferredJob> {
    sqlx::query_as::<_, DeferredJob>(
        "INSERT INTO deferred_jobs (id, kind, appointment_id, run_at, payload, status,
                                    attempts, last_error, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING *",
    )
    .bind(job.id)
    .bind(&job.kind)
    .bind(job.appointment_id)
    .bind(job.run_at)
    .bind(&job.payload)
    .bind(&job.status)
    .bind(job.attempts)
    .bind(&job.last_error)
    .bind(job.created_at)
    .bind(job.updated_at)
    .fetch_one(executor)
    .await
}

/// Due jobs, row-locked. SKIP LOCKED keeps concurrent runner passes from
/// claiming the same rows.
pub async fn claim_due_jobs(
    executor: impl PgExecutor<'_>,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DeferredJob>> {
    sqlx::query_as::<_, DeferredJob>(
        "SELECT * FROM deferred_jobs
         WHERE status = 'pending' AND run_at <= $1
         ORDER BY run_at ASC
         LIMIT $2
         FOR UPDATE SKIP LOCKED",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(executor)
    .await
}

pub async fn mark_job_running(executor: impl PgExecutor<'_>, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE deferred_jobs
         SET status = 'running', attempts = attempts + 1, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_job_done(executor: impl PgExecutor<'_>, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE deferred_jobs SET status = 'done', updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// A failed handler returns the job to the queue; the durable runner
/// retries it on the next due pass (at-least-once delivery).
pub async fn mark_job_failed(
    executor: impl PgExecutor<'_>,
    id: Uuid,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE deferred_jobs
         SET status = 'pending', last_error = $2, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn jobs_for_appointment(
    executor: impl PgExecutor<'_>,
    appointment_id: Uuid,
) -> Result<Vec<DeferredJob>> {
    sqlx::query_as::<_, DeferredJob>(
        "SELECT * FROM deferred_jobs WHERE appointment_id = $1 ORDER BY run_at",
    )
    .bind(appointment_id)
    .fetch_all(executor)
    .await
}

// -- reporting --------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeacherEarningsRow {
    pub teacher_id: Uuid,
    pub lesson_count: i64,
    pub total_gross: BigDecimal,
    pub total_platform_fee: BigDecimal,
    pub total_teacher_earning: BigDecimal,
    pub wallet_balance: Option<BigDecimal>,
}

/// Monthly aggregate over completed, paid lessons; a read-only projection
/// of the amounts snapshotted at booking time, joined with the current
/// wallet balance.
pub async fn monthly_earnings(
    executor: impl PgExecutor<'_>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<Vec<TeacherEarningsRow>> {
    sqlx::query_as::<_, TeacherEarningsRow>(
        "SELECT a.teacher_id,
                COUNT(*) AS lesson_count,
                SUM(a.gross_amount) AS total_gross,
                SUM(a.platform_fee) AS total_platform_fee,
                SUM(a.teacher_earning) AS total_teacher_earning,
                w.available_balance AS wallet_balance
         FROM appointments a
         LEFT JOIN wallets w ON w.teacher_id = a.teacher_id
         WHERE a.status = 'completed'
           AND a.payment_status = 'paid'
           AND a.scheduled_at >= $1
           AND a.scheduled_at < $2
         GROUP BY a.teacher_id, w.available_balance
         ORDER BY total_teacher_earning DESC",
    )
    .bind(period_start)
    .bind(period_end)
    .fetch_all(executor)
    .await
}

/// Name of the violated constraint, when the error is a database error.
/// Used to tell a slot conflict from an order-code collision.
pub fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) => db.constraint(),
        _ => None,
    }
}
