//! Settlement engine: splits confirmed payments into the wallet ledger
//! and serves the monthly earnings projection.
//!
//! Every balance mutation is one database transaction that row-locks the
//! wallet, appends the ledger entry and updates the accumulator columns.
//! Concurrent credits and debits against the same wallet serialize on the
//! row lock; duplicate earning credits die on the ledger's partial unique
//! index.

use crate::db::queries;
use crate::db::queries::TeacherEarningsRow;
use crate::domain::{TransactionKind, Wallet, WalletTransaction};
use crate::error::AppError;
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const EARNING_UNIQUE_CONSTRAINT: &str = "wallet_transactions_earning_key";

/// Outcome of a credit attempt. A duplicate is not an error for the
/// idempotent callers (job handlers) but is visible to anyone who cares.
#[derive(Debug)]
pub enum CreditOutcome {
    Credited(WalletTransaction),
    Duplicate,
}

#[derive(Clone)]
pub struct SettlementService {
    pool: PgPool,
}

impl SettlementService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Credits a teacher's earning for one appointment, creating the
    /// wallet lazily. At most one earning entry can ever exist per
    /// appointment.
    pub async fn credit_earning(
        &self,
        teacher_id: Uuid,
        appointment_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<CreditOutcome, AppError> {
        if amount <= &BigDecimal::from(0) {
            return Err(AppError::Validation(
                "credit amount must be positive".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        if queries::earning_for_appointment(&mut *tx, appointment_id)
            .await?
            .is_some()
        {
            return Ok(CreditOutcome::Duplicate);
        }

        let wallet = match queries::lock_wallet_by_teacher(&mut *tx, teacher_id).await? {
            Some(wallet) => wallet,
            None => {
                queries::insert_wallet_if_absent(&mut *tx, &Wallet::new(teacher_id)).await?;
                queries::lock_wallet_by_teacher(&mut *tx, teacher_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!("wallet for teacher {teacher_id} vanished"))
                    })?
            }
        };

        let balance_after = &wallet.available_balance + amount;
        let entry = WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            kind: TransactionKind::Earning.as_str().to_string(),
            amount: amount.clone(),
            balance_after: balance_after.clone(),
            appointment_id: Some(appointment_id),
            batch_reference: None,
            created_at: Utc::now(),
        };

        let inserted = match queries::insert_wallet_transaction(&mut *tx, &entry).await {
            Ok(inserted) => inserted,
            Err(e) if queries::violated_constraint(&e) == Some(EARNING_UNIQUE_CONSTRAINT) => {
                // Lost the race to a concurrent credit for the same
                // appointment; the ledger already holds the entry.
                return Ok(CreditOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        };

        queries::update_wallet_credited(&mut *tx, wallet.id, &balance_after, amount).await?;
        tx.commit().await?;

        tracing::info!(
            "Credited {} to wallet {} for appointment {}",
            amount,
            wallet.id,
            appointment_id
        );
        Ok(CreditOutcome::Credited(inserted))
    }

    /// Debits a wallet for a payout. Fails on insufficient balance before
    /// touching the ledger; bank-detail checks belong to the payout
    /// orchestrator.
    pub async fn debit(
        &self,
        wallet_id: Uuid,
        amount: &BigDecimal,
        batch_reference: Option<&str>,
    ) -> Result<WalletTransaction, AppError> {
        if amount <= &BigDecimal::from(0) {
            return Err(AppError::Validation(
                "debit amount must be positive".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let wallet = queries::lock_wallet(&mut *tx, wallet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("wallet {wallet_id} not found")))?;

        if amount > &wallet.available_balance {
            return Err(AppError::InsufficientBalance(format!(
                "wallet {} holds {}, requested {}",
                wallet_id, wallet.available_balance, amount
            )));
        }

        let balance_after = &wallet.available_balance - amount;
        let entry = WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            kind: TransactionKind::Withdrawal.as_str().to_string(),
            amount: -amount.clone(),
            balance_after: balance_after.clone(),
            appointment_id: None,
            batch_reference: batch_reference.map(str::to_string),
            created_at: Utc::now(),
        };

        let inserted = queries::insert_wallet_transaction(&mut *tx, &entry).await?;
        queries::update_wallet_debited(&mut *tx, wallet.id, &balance_after, amount).await?;
        tx.commit().await?;

        tracing::info!("Debited {} from wallet {}", amount, wallet_id);
        Ok(inserted)
    }

    /// Compensates a previously credited earning (paid appointment got
    /// cancelled and refunded). No-op when nothing was credited or the
    /// reversal already exists.
    pub async fn reverse_earning(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<WalletTransaction>, AppError> {
        let mut tx = self.pool.begin().await?;

        let earning = match queries::earning_for_appointment(&mut *tx, appointment_id).await? {
            Some(earning) => earning,
            None => return Ok(None),
        };
        if queries::adjustment_for_appointment(&mut *tx, appointment_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let wallet = queries::lock_wallet(&mut *tx, earning.wallet_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("wallet {} vanished", earning.wallet_id))
            })?;

        let balance_after = &wallet.available_balance - &earning.amount;
        let entry = WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            kind: TransactionKind::Adjustment.as_str().to_string(),
            amount: -earning.amount.clone(),
            balance_after: balance_after.clone(),
            appointment_id: Some(appointment_id),
            batch_reference: None,
            created_at: Utc::now(),
        };

        let inserted = queries::insert_wallet_transaction(&mut *tx, &entry).await?;
        queries::update_wallet_adjusted(&mut *tx, wallet.id, &balance_after).await?;
        tx.commit().await?;

        tracing::info!(
            "Reversed earning of {} on wallet {} for appointment {}",
            earning.amount,
            wallet.id,
            appointment_id
        );
        Ok(Some(inserted))
    }

    /// Monthly aggregate of completed, paid lessons per teacher, joined
    /// with current wallet balances. Amounts come from the columns
    /// snapshotted at booking time; nothing is recomputed here.
    pub async fn monthly_report(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<TeacherEarningsRow>, AppError> {
        let start_date = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| AppError::Validation(format!("invalid period {year}-{month}")))?;
        let end_date = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| AppError::Validation(format!("invalid period {year}-{month}")))?;

        let period_start = Utc.from_utc_datetime(&start_date.and_time(chrono::NaiveTime::MIN));
        let period_end = Utc.from_utc_datetime(&end_date.and_time(chrono::NaiveTime::MIN));

        Ok(queries::monthly_earnings(&self.pool, period_start, period_end).await?)
    }
}
