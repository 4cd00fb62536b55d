mod common;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use common::*;
use lectern_core::db::queries;
use lectern_core::domain::PaymentMethod;
use lectern_core::error::AppError;
use lectern_core::services::{CreditOutcome, SettlementService};
use uuid::Uuid;

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn test_first_credit_creates_wallet() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, _branch) = seed_teacher(&pool, 1000, 20, true, true).await;
    let service = SettlementService::new(pool.clone());

    let outcome = service
        .credit_earning(teacher_id, Uuid::new_v4(), &BigDecimal::from(800))
        .await
        .unwrap();
    assert!(matches!(outcome, CreditOutcome::Credited(_)));

    let wallet = queries::get_wallet_by_teacher(&pool, teacher_id)
        .await
        .unwrap()
        .expect("wallet created lazily on first credit");
    assert_eq!(wallet.available_balance, BigDecimal::from(800));
    assert_eq!(wallet.total_earned, BigDecimal::from(800));
    assert_eq!(wallet.total_withdrawn, BigDecimal::from(0));

    let entries = queries::list_wallet_transactions(&pool, wallet.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, "earning");
    assert_eq!(entries[0].amount, BigDecimal::from(800));
    assert_eq!(entries[0].balance_after, BigDecimal::from(800));
}

#[tokio::test]
async fn test_second_credit_for_same_appointment_is_duplicate() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, _branch) = seed_teacher(&pool, 1000, 20, true, true).await;
    let service = SettlementService::new(pool.clone());
    let appointment_id = Uuid::new_v4();

    service
        .credit_earning(teacher_id, appointment_id, &BigDecimal::from(800))
        .await
        .unwrap();
    let outcome = service
        .credit_earning(teacher_id, appointment_id, &BigDecimal::from(800))
        .await
        .unwrap();
    assert!(matches!(outcome, CreditOutcome::Duplicate));

    let wallet = queries::get_wallet_by_teacher(&pool, teacher_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, BigDecimal::from(800));
    let entries = queries::list_wallet_transactions(&pool, wallet.id).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_ledger_is_the_running_sum_of_amounts() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, _branch) = seed_teacher(&pool, 1000, 20, true, true).await;
    let service = SettlementService::new(pool.clone());

    let reversed_appointment = Uuid::new_v4();
    service
        .credit_earning(teacher_id, reversed_appointment, &BigDecimal::from(800))
        .await
        .unwrap();
    service
        .credit_earning(teacher_id, Uuid::new_v4(), &BigDecimal::from(500))
        .await
        .unwrap();

    let wallet = queries::get_wallet_by_teacher(&pool, teacher_id)
        .await
        .unwrap()
        .unwrap();
    service
        .debit(wallet.id, &BigDecimal::from(300), Some("batch-7"))
        .await
        .unwrap();
    service.reverse_earning(reversed_appointment).await.unwrap();

    let entries = queries::list_wallet_transactions(&pool, wallet.id).await.unwrap();
    assert_eq!(entries.len(), 4);

    // balance_after of every entry equals the cumulative sum of amounts
    let mut running = BigDecimal::from(0);
    for entry in &entries {
        running += &entry.amount;
        assert_eq!(entry.balance_after, running, "entry {} drifted", entry.id);
    }

    let wallet = queries::get_wallet(&pool, wallet.id).await.unwrap().unwrap();
    assert_eq!(wallet.available_balance, running);
    assert_eq!(wallet.available_balance, BigDecimal::from(200));
    assert_eq!(wallet.total_earned, BigDecimal::from(1300));
    assert_eq!(wallet.total_withdrawn, BigDecimal::from(300));
}

#[tokio::test]
async fn test_reverse_earning_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, _branch) = seed_teacher(&pool, 1000, 20, true, true).await;
    let service = SettlementService::new(pool.clone());
    let appointment_id = Uuid::new_v4();

    // nothing credited yet: nothing to reverse
    assert!(service.reverse_earning(appointment_id).await.unwrap().is_none());

    service
        .credit_earning(teacher_id, appointment_id, &BigDecimal::from(800))
        .await
        .unwrap();
    assert!(service.reverse_earning(appointment_id).await.unwrap().is_some());
    // the second reversal finds the adjustment and declines
    assert!(service.reverse_earning(appointment_id).await.unwrap().is_none());

    let wallet = queries::get_wallet_by_teacher(&pool, teacher_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, BigDecimal::from(0));
}

#[tokio::test]
async fn test_debit_insufficient_balance() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, _branch) = seed_teacher(&pool, 1000, 20, true, true).await;
    let service = SettlementService::new(pool.clone());

    service
        .credit_earning(teacher_id, Uuid::new_v4(), &BigDecimal::from(100))
        .await
        .unwrap();
    let wallet = queries::get_wallet_by_teacher(&pool, teacher_id)
        .await
        .unwrap()
        .unwrap();

    let err = service
        .debit(wallet.id, &BigDecimal::from(101), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance(_)));

    // nothing was written
    let wallet = queries::get_wallet(&pool, wallet.id).await.unwrap().unwrap();
    assert_eq!(wallet.available_balance, BigDecimal::from(100));
    let entries = queries::list_wallet_transactions(&pool, wallet.id).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_debit_unknown_wallet() {
    let (pool, _container) = setup_test_db().await;
    let service = SettlementService::new(pool.clone());

    let err = service
        .debit(Uuid::new_v4(), &BigDecimal::from(10), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_non_positive_amounts_are_rejected() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, _branch) = seed_teacher(&pool, 1000, 20, true, true).await;
    let service = SettlementService::new(pool.clone());

    let err = service
        .credit_earning(teacher_id, Uuid::new_v4(), &BigDecimal::from(0))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = service
        .debit(Uuid::new_v4(), &BigDecimal::from(-5), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_monthly_report_aggregates_stored_split() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_a, branch_a) = seed_teacher(&pool, 1000, 20, true, true).await;
    let (teacher_b, _branch_b) = seed_teacher(&pool, 600, 10, true, true).await;
    let subject_id = seed_subject(&pool, branch_a).await;
    let student_id = seed_student(&pool).await;
    let service = SettlementService::new(pool.clone());

    // two paid completed lessons for teacher A in March 2025
    for day in ["2025-03-10T10:00:00Z", "2025-03-17T10:00:00Z"] {
        insert_appointment_row(
            &pool,
            teacher_a,
            student_id,
            subject_id,
            ts(day),
            PaymentMethod::CreditCard,
            "completed",
            "paid",
            None,
        )
        .await;
    }
    // one for teacher B in the same month
    insert_appointment_row(
        &pool,
        teacher_b,
        student_id,
        subject_id,
        ts("2025-03-20T15:00:00Z"),
        PaymentMethod::BankTransfer,
        "completed",
        "paid",
        None,
    )
    .await;
    // outside the period
    insert_appointment_row(
        &pool,
        teacher_a,
        student_id,
        subject_id,
        ts("2025-04-01T10:00:00Z"),
        PaymentMethod::CreditCard,
        "completed",
        "paid",
        None,
    )
    .await;
    // in the period but never settled as paid
    insert_appointment_row(
        &pool,
        teacher_a,
        student_id,
        subject_id,
        ts("2025-03-25T10:00:00Z"),
        PaymentMethod::BankTransfer,
        "expired",
        "cancelled",
        None,
    )
    .await;

    service
        .credit_earning(teacher_a, Uuid::new_v4(), &BigDecimal::from(1600))
        .await
        .unwrap();

    let rows = service.monthly_report(2025, 3).await.unwrap();
    assert_eq!(rows.len(), 2);

    let row_a = rows.iter().find(|r| r.teacher_id == teacher_a).unwrap();
    assert_eq!(row_a.lesson_count, 2);
    // fixture rows snapshot a 1000/20% split regardless of current rates
    assert_eq!(row_a.total_gross, BigDecimal::from(2000).with_scale(2));
    assert_eq!(row_a.total_platform_fee, BigDecimal::from(400).with_scale(2));
    assert_eq!(row_a.total_teacher_earning, BigDecimal::from(1600).with_scale(2));
    assert_eq!(row_a.wallet_balance, Some(BigDecimal::from(1600)));

    let row_b = rows.iter().find(|r| r.teacher_id == teacher_b).unwrap();
    assert_eq!(row_b.lesson_count, 1);
    assert_eq!(row_b.wallet_balance, None);

    let err = service.monthly_report(2025, 13).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
