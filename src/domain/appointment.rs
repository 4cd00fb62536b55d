//! Appointment domain entity.
//! Framework-agnostic representation of a booked lesson slot and the
//! status machine that governs it.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingPayment,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Expired,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::PendingPayment => "pending_payment",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Expired => "expired",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::Cancelled
                | AppointmentStatus::Expired
                | AppointmentStatus::NoShow
        )
    }

    /// Legal successor table. Every persisted transition re-checks this
    /// against the currently stored status.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Confirmed)
                | (PendingPayment, Expired)
                | (PendingPayment, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
                | (InProgress, Completed)
                | (InProgress, NoShow)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(AppointmentStatus::PendingPayment),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "expired" => Ok(AppointmentStatus::Expired),
            "no_show" => Ok(AppointmentStatus::NoShow),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// Commission split computed once at booking time from the teacher's
/// current hourly rate. Rate changes never touch existing rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSplit {
    pub gross_amount: BigDecimal,
    pub platform_fee: BigDecimal,
    pub teacher_earning: BigDecimal,
}

impl FeeSplit {
    /// `fee = rate * percent / 100`, `earning = rate - fee`. The earning is
    /// derived by subtraction so the three amounts always add up exactly.
    pub fn compute(hourly_rate: &BigDecimal, commission_percent: &BigDecimal) -> FeeSplit {
        let gross = hourly_rate.with_scale(2);
        let fee = ((hourly_rate * commission_percent) / BigDecimal::from(100)).with_scale(2);
        let earning = &gross - &fee;
        FeeSplit {
            gross_amount: gross,
            platform_fee: fee,
            teacher_earning: earning,
        }
    }
}

/// One booked lesson slot. Statuses are stored as lowercase text and
/// parsed at the edges; rows are never deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Appointment {
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
    pub payment_ref: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub no_show: bool,
    pub lesson_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub meeting_id: Option<String>,
    pub meeting_join_url: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_code: String,
        teacher_id: Uuid,
        student_id: Uuid,
        subject_id: Uuid,
        scheduled_at: DateTime<Utc>,
        duration_minutes: i32,
        payment_method: PaymentMethod,
        split: FeeSplit,
        note: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_code,
            teacher_id,
            student_id,
            subject_id,
            scheduled_at,
            duration_minutes,
            status: AppointmentStatus::PendingPayment.as_str().to_string(),
            payment_method: payment_method.as_str().to_string(),
            payment_status: PaymentStatus::Pending.as_str().to_string(),
            gross_amount: split.gross_amount,
            platform_fee: split.platform_fee,
            teacher_earning: split.teacher_earning,
            payment_deadline: None,
            payment_ref: None,
            cancelled_by: None,
            cancellation_reason: None,
            no_show: false,
            lesson_started_at: None,
            completed_at: None,
            meeting_id: None,
            meeting_join_url: None,
            note,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_at + chrono::Duration::minutes(self.duration_minutes as i64)
    }
}

const ORDER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const ORDER_CODE_SUFFIX_LEN: usize = 6;

/// Human-readable order code, e.g. `LSN-20250314-K7Q2XN`. Collisions are
/// accepted as negligible; the unique index catches them and the caller
/// regenerates.
pub fn generate_order_code(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_CODE_SUFFIX_LEN)
        .map(|_| ORDER_CODE_ALPHABET[rng.gen_range(0..ORDER_CODE_ALPHABET.len())] as char)
        .collect();
    format!("LSN-{}-{}", now.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fee_split_rate_1000_commission_20() {
        let split = FeeSplit::compute(&BigDecimal::from(1000), &BigDecimal::from(20));
        assert_eq!(split.platform_fee, BigDecimal::from(200).with_scale(2));
        assert_eq!(split.teacher_earning, BigDecimal::from(800).with_scale(2));
        assert_eq!(split.gross_amount, BigDecimal::from(1000).with_scale(2));
    }

    #[test]
    fn test_fee_split_fractional_rate() {
        let rate = BigDecimal::from_str("333.33").unwrap();
        let split = FeeSplit::compute(&rate, &BigDecimal::from(15));
        assert_eq!(
            &split.platform_fee + &split.teacher_earning,
            split.gross_amount
        );
    }

    proptest! {
        #[test]
        fn prop_split_always_adds_up(rate in 1u32..100_000u32, percent in 0u32..=100u32) {
            let split = FeeSplit::compute(&BigDecimal::from(rate), &BigDecimal::from(percent));
            prop_assert_eq!(
                &split.platform_fee + &split.teacher_earning,
                split.gross_amount
            );
        }
    }

    #[test]
    fn test_transition_table() {
        use AppointmentStatus::*;
        assert!(PendingPayment.can_transition_to(Confirmed));
        assert!(PendingPayment.can_transition_to(Expired));
        assert!(PendingPayment.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(InProgress));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(NoShow));

        // skipping in_progress is not allowed
        assert!(!Confirmed.can_transition_to(Completed));
        // nothing leaves a terminal state
        for terminal in [Completed, Cancelled, Expired, NoShow] {
            for next in [
                PendingPayment, Confirmed, InProgress, Completed, Cancelled, Expired, NoShow,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            AppointmentStatus::PendingPayment,
            AppointmentStatus::Confirmed,
            AppointmentStatus::InProgress,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Expired,
            AppointmentStatus::NoShow,
        ] {
            assert_eq!(status.as_str().parse::<AppointmentStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_order_code_shape() {
        let now = DateTime::parse_from_rfc3339("2025-03-14T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let code = generate_order_code(now);
        assert!(code.starts_with("LSN-20250314-"));
        assert_eq!(code.len(), "LSN-20250314-".len() + 6);
        let suffix = &code["LSN-20250314-".len()..];
        assert!(suffix.bytes().all(|b| ORDER_CODE_ALPHABET.contains(&b)));
    }
}
