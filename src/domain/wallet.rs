//! Teacher wallet and its append-only transaction ledger.
//!
//! The wallet's available balance is a running accumulator; the ledger is
//! the authority. Every entry carries the balance snapshot after it was
//! applied, so the sequence of `balance_after` values must equal the
//! cumulative sum of amounts.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Earning,
    Withdrawal,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Earning => "earning",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earning" => Ok(TransactionKind::Earning),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "adjustment" => Ok(TransactionKind::Adjustment),
            other => Err(format!("unknown wallet transaction kind: {other}")),
        }
    }
}

/// One wallet per teacher, created lazily on first credit, never deleted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub available_balance: BigDecimal,
    pub pending_balance: BigDecimal,
    pub total_earned: BigDecimal,
    pub total_withdrawn: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(teacher_id: Uuid) -> Self {
        let now = Utc::now();
        let zero = BigDecimal::from(0);
        Self {
            id: Uuid::new_v4(),
            teacher_id,
            available_balance: zero.clone(),
            pending_balance: zero.clone(),
            total_earned: zero.clone(),
            total_withdrawn: zero,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable ledger entry. `amount` is signed: earnings positive,
/// withdrawals negative, adjustments either way.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub kind: String,
    pub amount: BigDecimal,
    pub balance_after: BigDecimal,
    pub appointment_id: Option<Uuid>,
    pub batch_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_is_empty() {
        let wallet = Wallet::new(Uuid::new_v4());
        assert_eq!(wallet.available_balance, BigDecimal::from(0));
        assert_eq!(wallet.total_earned, BigDecimal::from(0));
        assert_eq!(wallet.total_withdrawn, BigDecimal::from(0));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            TransactionKind::Earning,
            TransactionKind::Withdrawal,
            TransactionKind::Adjustment,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
    }
}
