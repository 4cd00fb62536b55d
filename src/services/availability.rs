//! Availability checking for the booking path.
//!
//! A slot is bookable when some window of the teacher's calendar contains
//! it: either a recurring weekly window on that weekday or a one-off
//! window for that exact date. Collision with other appointments is not
//! decided here; that race belongs to the storage layer's unique index.

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub weekday: Option<i16>,
    pub specific_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    /// Windows applying to the given date: recurring ones on its weekday
    /// plus date-specific ones.
    async fn windows_covering(
        &self,
        teacher_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, AppError>;
}

pub struct PgAvailabilityStore {
    pool: PgPool,
}

impl PgAvailabilityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AvailabilityStore for PgAvailabilityStore {
    async fn windows_covering(
        &self,
        teacher_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, AppError> {
        let weekday = date.weekday().num_days_from_sunday() as i16;

        let windows = sqlx::query_as::<_, AvailabilityWindow>(
            "SELECT id, teacher_id, weekday, specific_date, start_time, end_time
             FROM availability_windows
             WHERE teacher_id = $1 AND (weekday = $2 OR specific_date = $3)",
        )
        .bind(teacher_id)
        .bind(weekday)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(windows)
    }
}

#[derive(Clone)]
pub struct AvailabilityChecker {
    store: std::sync::Arc<dyn AvailabilityStore>,
}

impl AvailabilityChecker {
    pub fn new(store: std::sync::Arc<dyn AvailabilityStore>) -> Self {
        Self { store }
    }

    /// True when the whole lesson fits inside one availability window on
    /// the lesson date. Lessons crossing midnight never match.
    pub async fn is_bookable(
        &self,
        teacher_id: Uuid,
        scheduled_at: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<bool, AppError> {
        let date = scheduled_at.date_naive();
        let end_at = scheduled_at + Duration::minutes(duration_minutes as i64);
        if end_at.date_naive() != date {
            return Ok(false);
        }

        let start = scheduled_at.time();
        let end = end_at.time();
        let windows = self.store.windows_covering(teacher_id, date).await?;

        Ok(windows
            .iter()
            .any(|w| w.start_time <= start && end <= w.end_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedStore(Vec<AvailabilityWindow>);

    #[async_trait]
    impl AvailabilityStore for FixedStore {
        async fn windows_covering(
            &self,
            _teacher_id: Uuid,
            _date: NaiveDate,
        ) -> Result<Vec<AvailabilityWindow>, AppError> {
            Ok(self.0.clone())
        }
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> AvailabilityWindow {
        AvailabilityWindow {
            id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            weekday: Some(5),
            specific_date: None,
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_slot_inside_window_is_bookable() {
        let checker = AvailabilityChecker::new(std::sync::Arc::new(FixedStore(vec![window((9, 0), (17, 0))])));
        assert!(checker
            .is_bookable(Uuid::new_v4(), ts("2025-03-14T10:00:00Z"), 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_slot_ending_at_window_edge_is_bookable() {
        let checker = AvailabilityChecker::new(std::sync::Arc::new(FixedStore(vec![window((9, 0), (17, 0))])));
        assert!(checker
            .is_bookable(Uuid::new_v4(), ts("2025-03-14T16:00:00Z"), 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_slot_overflowing_window_is_rejected() {
        let checker = AvailabilityChecker::new(std::sync::Arc::new(FixedStore(vec![window((9, 0), (17, 0))])));
        assert!(!checker
            .is_bookable(Uuid::new_v4(), ts("2025-03-14T16:30:00Z"), 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_no_windows_means_not_bookable() {
        let checker = AvailabilityChecker::new(std::sync::Arc::new(FixedStore(vec![])));
        assert!(!checker
            .is_bookable(Uuid::new_v4(), ts("2025-03-14T10:00:00Z"), 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_midnight_crossing_slot_is_rejected() {
        let checker = AvailabilityChecker::new(std::sync::Arc::new(FixedStore(vec![window((0, 0), (23, 59))])));
        assert!(!checker
            .is_bookable(Uuid::new_v4(), ts("2025-03-14T23:30:00Z"), 90)
            .await
            .unwrap());
    }
}
