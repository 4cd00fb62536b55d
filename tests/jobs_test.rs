mod common;

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use common::*;
use lectern_core::db::queries;
use lectern_core::domain::{DeferredJob, JobKind, PaymentMethod};
use lectern_core::providers::NotificationKind;
use lectern_core::services::CreateAppointmentInput;
use tokio::time::sleep;
use uuid::Uuid;

#[tokio::test]
async fn test_unpaid_bank_transfer_expires_after_deadline() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, branch_id) = seed_teacher(&pool, 1000, 20, true, true).await;
    let subject_id = seed_subject(&pool, branch_id).await;
    let student_id = seed_student(&pool).await;
    seed_full_availability(&pool, teacher_id).await;

    let (booking, _gateway) = booking_service(&pool, test_policy());
    let runner = job_runner(&pool);

    // hourly rate 1000, commission 20%, paid by bank transfer with a 24h deadline
    let created = booking
        .create_appointment(CreateAppointmentInput {
            student_id,
            teacher_id,
            subject_id,
            scheduled_at: Utc::now() + Duration::days(10),
            duration_minutes: 60,
            payment_method: PaymentMethod::BankTransfer,
            note: None,
        })
        .await
        .unwrap();
    assert_eq!(created.appointment.platform_fee, BigDecimal::from(200).with_scale(2));
    assert_eq!(created.appointment.teacher_earning, BigDecimal::from(800).with_scale(2));

    // nothing is due before the deadline passes
    let executed = runner.run_due_pass(Utc::now()).await.unwrap();
    assert_eq!(executed, 0);

    // 25 hours later no payment arrived: the expiry job fires
    let executed = runner
        .run_due_pass(Utc::now() + Duration::hours(25) + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(executed, 1);

    let expired = queries::get_appointment(&pool, created.appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(expired.status, "expired");
    assert_eq!(expired.payment_status, "cancelled");
}

#[tokio::test]
async fn test_expire_job_is_idempotent() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, branch_id) = seed_teacher(&pool, 1000, 20, true, true).await;
    let subject_id = seed_subject(&pool, branch_id).await;
    let student_id = seed_student(&pool).await;

    let runner = job_runner(&pool);
    let appointment = insert_appointment_row(
        &pool,
        teacher_id,
        student_id,
        subject_id,
        Utc::now() + Duration::days(5),
        PaymentMethod::BankTransfer,
        "pending_payment",
        "pending",
        Some(Utc::now() - Duration::hours(2)),
    )
    .await;

    let job = DeferredJob::new(
        JobKind::ExpireBankTransfer,
        appointment.id,
        Utc::now() - Duration::hours(1),
        serde_json::json!({}),
    );
    queries::insert_job(&pool, &job).await.unwrap();

    // first firing expires the appointment exactly once
    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 1);
    let after_first = queries::get_appointment(&pool, appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_first.status, "expired");

    // a duplicate job for the same appointment is a harmless no-op
    let duplicate = DeferredJob::new(
        JobKind::ExpireBankTransfer,
        appointment.id,
        Utc::now() - Duration::minutes(30),
        serde_json::json!({}),
    );
    queries::insert_job(&pool, &duplicate).await.unwrap();
    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 1);

    let after_second = queries::get_appointment(&pool, appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_second.status, "expired");
    assert_eq!(after_second.updated_at, after_first.updated_at);
}

#[tokio::test]
async fn test_expire_job_noop_once_paid() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, branch_id) = seed_teacher(&pool, 1000, 20, true, true).await;
    let subject_id = seed_subject(&pool, branch_id).await;
    let student_id = seed_student(&pool).await;

    let runner = job_runner(&pool);
    let appointment = insert_appointment_row(
        &pool,
        teacher_id,
        student_id,
        subject_id,
        Utc::now() + Duration::days(5),
        PaymentMethod::BankTransfer,
        "confirmed",
        "paid",
        Some(Utc::now() - Duration::hours(2)),
    )
    .await;

    let job = DeferredJob::new(
        JobKind::ExpireBankTransfer,
        appointment.id,
        Utc::now() - Duration::hours(1),
        serde_json::json!({}),
    );
    queries::insert_job(&pool, &job).await.unwrap();

    runner.run_due_pass(Utc::now()).await.unwrap();

    let unchanged = queries::get_appointment(&pool, appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.status, "confirmed");
    assert_eq!(unchanged.payment_status, "paid");

    // the stale job was consumed, not retried forever
    let jobs = queries::jobs_for_appointment(&pool, appointment.id).await.unwrap();
    assert!(jobs.iter().all(|j| j.status == "done"));
}

#[tokio::test]
async fn test_reminder_fires_for_confirmed_lesson() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, branch_id) = seed_teacher(&pool, 1000, 20, true, true).await;
    let subject_id = seed_subject(&pool, branch_id).await;
    let student_id = seed_student(&pool).await;

    let (runner, recorder) = job_runner_with_recorder(&pool);
    let appointment = insert_appointment_row(
        &pool,
        teacher_id,
        student_id,
        subject_id,
        Utc::now() + Duration::minutes(50),
        PaymentMethod::CreditCard,
        "confirmed",
        "paid",
        None,
    )
    .await;
    queries::set_meeting(&pool, appointment.id, "room-test", "https://meet.test/room-test")
        .await
        .unwrap();

    let job = DeferredJob::new(
        JobKind::Reminder,
        appointment.id,
        Utc::now() - Duration::minutes(1),
        serde_json::json!({"variant": "one_hour_before"}),
    );
    queries::insert_job(&pool, &job).await.unwrap();

    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 1);
    sleep(std::time::Duration::from_millis(100)).await;

    let kinds = recorder.kinds.lock().unwrap().clone();
    assert_eq!(kinds, vec![NotificationKind::LessonReminder]);
}

#[tokio::test]
async fn test_reminder_noop_after_cancellation() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, branch_id) = seed_teacher(&pool, 1000, 20, true, true).await;
    let subject_id = seed_subject(&pool, branch_id).await;
    let student_id = seed_student(&pool).await;

    let (runner, recorder) = job_runner_with_recorder(&pool);
    let appointment = insert_appointment_row(
        &pool,
        teacher_id,
        student_id,
        subject_id,
        Utc::now() + Duration::hours(2),
        PaymentMethod::CreditCard,
        "cancelled",
        "refunded",
        None,
    )
    .await;

    let job = DeferredJob::new(
        JobKind::Reminder,
        appointment.id,
        Utc::now() - Duration::minutes(1),
        serde_json::json!({"variant": "morning_of"}),
    );
    queries::insert_job(&pool, &job).await.unwrap();

    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 1);
    sleep(std::time::Duration::from_millis(100)).await;

    assert!(recorder.kinds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_auto_complete_finishes_lesson_and_credits_once() {
    let (pool, _container) = setup_test_db().await;
    let (teacher_id, branch_id) = seed_teacher(&pool, 1000, 20, true, true).await;
    let subject_id = seed_subject(&pool, branch_id).await;
    let student_id = seed_student(&pool).await;

    let runner = job_runner(&pool);
    let appointment = insert_appointment_row(
        &pool,
        teacher_id,
        student_id,
        subject_id,
        Utc::now() - Duration::hours(14),
        PaymentMethod::CreditCard,
        "in_progress",
        "paid",
        None,
    )
    .await;

    let job = DeferredJob::new(
        JobKind::AutoComplete,
        appointment.id,
        Utc::now() - Duration::minutes(1),
        serde_json::json!({}),
    );
    queries::insert_job(&pool, &job).await.unwrap();

    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 1);

    let completed = queries::get_appointment(&pool, appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.status, "completed");
    assert!(completed.completed_at.is_some());

    let wallet = queries::get_wallet_by_teacher(&pool, teacher_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, completed.teacher_earning);

    // running the handler again leaves the same end state
    let duplicate = DeferredJob::new(
        JobKind::AutoComplete,
        appointment.id,
        Utc::now() - Duration::minutes(1),
        serde_json::json!({}),
    );
    queries::insert_job(&pool, &duplicate).await.unwrap();
    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 1);

    let wallet = queries::get_wallet_by_teacher(&pool, teacher_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wallet.available_balance, completed.teacher_earning);
    let entries = queries::list_wallet_transactions(&pool, wallet.id).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_runner_only_claims_due_jobs() {
    let (pool, _container) = setup_test_db().await;
    let runner = job_runner(&pool);

    let job = DeferredJob::new(
        JobKind::Reminder,
        Uuid::new_v4(),
        Utc::now() + Duration::hours(3),
        serde_json::json!({"variant": "one_hour_before"}),
    );
    queries::insert_job(&pool, &job).await.unwrap();

    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 0);

    let jobs = queries::jobs_for_appointment(&pool, job.appointment_id).await.unwrap();
    assert_eq!(jobs[0].status, "pending");
    assert_eq!(jobs[0].attempts, 0);
}

#[tokio::test]
async fn test_job_for_missing_appointment_is_consumed() {
    let (pool, _container) = setup_test_db().await;
    let runner = job_runner(&pool);

    let job = DeferredJob::new(
        JobKind::AutoComplete,
        Uuid::new_v4(),
        Utc::now() - Duration::minutes(1),
        serde_json::json!({}),
    );
    queries::insert_job(&pool, &job).await.unwrap();

    assert_eq!(runner.run_due_pass(Utc::now()).await.unwrap(), 1);
    let jobs = queries::jobs_for_appointment(&pool, job.appointment_id).await.unwrap();
    assert_eq!(jobs[0].status, "done");
}
