use crate::db::queries::TeacherEarningsRow;
use crate::error::AppError;
use crate::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct MonthlyReportQuery {
    pub year: i32,
    pub month: u32,
}

/// Monthly earnings per teacher
///
/// Aggregates completed, paid lessons in the given month.
#[utoipa::path(
    get,
    path = "/reports/monthly",
    params(
        ("year" = i32, Query, description = "Report year"),
        ("month" = u32, Query, description = "Report month (1-12)")
    ),
    responses(
        (status = 200, description = "Per-teacher earnings for the period"),
        (status = 400, description = "Invalid period")
    ),
    tag = "Reports"
)]
pub async fn monthly_report(
    State(state): State<AppState>,
    Query(query): Query<MonthlyReportQuery>,
) -> Result<Json<Vec<TeacherEarningsRow>>, AppError> {
    let rows = state
        .settlement
        .monthly_report(query.year, query.month)
        .await?;
    Ok(Json(rows))
}
