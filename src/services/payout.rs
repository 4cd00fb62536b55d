//! Payout orchestrator: single and batched withdrawals against wallet
//! balances. A batch is deliberately best-effort: each item stands alone
//! and one wallet's failure never aborts its siblings.

use crate::db::queries;
use crate::error::AppError;
use crate::providers::TeacherDirectory;
use crate::services::settlement::SettlementService;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutItem {
    pub wallet_id: Uuid,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutReceipt {
    pub transaction_id: Uuid,
    pub wallet_id: Uuid,
    pub teacher_id: Uuid,
    pub amount: BigDecimal,
    pub batch_reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedPayout {
    pub wallet_id: Uuid,
    pub amount: BigDecimal,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct BulkPayoutSummary {
    pub successful: Vec<PayoutReceipt>,
    pub failed: Vec<FailedPayout>,
    pub total_amount: BigDecimal,
}

#[derive(Clone)]
pub struct PayoutService {
    pool: PgPool,
    settlement: SettlementService,
    directory: Arc<dyn TeacherDirectory>,
}

impl PayoutService {
    pub fn new(
        pool: PgPool,
        settlement: SettlementService,
        directory: Arc<dyn TeacherDirectory>,
    ) -> Self {
        Self {
            pool,
            settlement,
            directory,
        }
    }

    /// One withdrawal: balance and bank-account checks, then a single
    /// ledger debit.
    pub async fn process_payout(
        &self,
        wallet_id: Uuid,
        amount: &BigDecimal,
        actor_id: Uuid,
        reference: Option<&str>,
    ) -> Result<PayoutReceipt, AppError> {
        let wallet = queries::get_wallet(&self.pool, wallet_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("wallet {wallet_id} not found")))?;

        let profile = self
            .directory
            .teacher_profile(wallet.teacher_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("teacher {} not found", wallet.teacher_id))
            })?;
        if profile.bank_account.is_none() {
            return Err(AppError::MissingPayoutDetails(format!(
                "teacher {} has no bank account on file",
                wallet.teacher_id
            )));
        }

        let transaction = self.settlement.debit(wallet_id, amount, reference).await?;

        tracing::info!(
            "Payout of {} from wallet {} processed by {}",
            amount,
            wallet_id,
            actor_id
        );

        Ok(PayoutReceipt {
            transaction_id: transaction.id,
            wallet_id,
            teacher_id: wallet.teacher_id,
            amount: amount.clone(),
            batch_reference: reference.map(str::to_string),
        })
    }

    /// Batched withdrawals with per-item failure isolation. There is no
    /// cross-item transaction and no rollback; the summary reports both
    /// sides and totals only the successes.
    pub async fn process_bulk_payout(
        &self,
        items: Vec<PayoutItem>,
        actor_id: Uuid,
        batch_reference: &str,
    ) -> BulkPayoutSummary {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut total_amount = BigDecimal::from(0);

        for item in items {
            match self
                .process_payout(item.wallet_id, &item.amount, actor_id, Some(batch_reference))
                .await
            {
                Ok(receipt) => {
                    total_amount += &receipt.amount;
                    successful.push(receipt);
                }
                Err(e) => {
                    tracing::warn!(
                        "Bulk payout item for wallet {} failed: {}",
                        item.wallet_id,
                        e
                    );
                    failed.push(FailedPayout {
                        wallet_id: item.wallet_id,
                        amount: item.amount,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Bulk payout {} finished: {} ok, {} failed, {} paid out",
            batch_reference,
            successful.len(),
            failed.len(),
            total_amount
        );

        BulkPayoutSummary {
            successful,
            failed,
            total_amount,
        }
    }
}
