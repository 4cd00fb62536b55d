//! Read-only view of the profile system: teacher approval, pricing,
//! payout details, subject/branch linkage and contact data. Profile CRUD
//! itself lives outside this service; here it is a directory the booking
//! and payout paths consult.

use crate::error::AppError;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BankAccount {
    pub iban: String,
    pub holder: String,
}

#[derive(Debug, Clone)]
pub struct TeacherProfile {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub branch_id: Uuid,
    pub hourly_rate: BigDecimal,
    pub commission_percent: BigDecimal,
    pub approved: bool,
    pub bank_account: Option<BankAccount>,
}

#[derive(Debug, Clone)]
pub struct SubjectInfo {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct StudentContact {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[async_trait]
pub trait TeacherDirectory: Send + Sync {
    async fn teacher_profile(&self, id: Uuid) -> Result<Option<TeacherProfile>, AppError>;
    async fn subject(&self, id: Uuid) -> Result<Option<SubjectInfo>, AppError>;
    async fn student_contact(&self, id: Uuid) -> Result<Option<StudentContact>, AppError>;
}

pub struct PgTeacherDirectory {
    pool: PgPool,
}

impl PgTeacherDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TeacherRow {
    id: Uuid,
    display_name: String,
    email: String,
    phone: Option<String>,
    branch_id: Uuid,
    hourly_rate: BigDecimal,
    commission_percent: BigDecimal,
    approved: bool,
    bank_account_iban: Option<String>,
    bank_account_holder: Option<String>,
}

#[async_trait]
impl TeacherDirectory for PgTeacherDirectory {
    async fn teacher_profile(&self, id: Uuid) -> Result<Option<TeacherProfile>, AppError> {
        let row = sqlx::query_as::<_, TeacherRow>(
            "SELECT id, display_name, email, phone, branch_id, hourly_rate,
                    commission_percent, approved, bank_account_iban, bank_account_holder
             FROM teachers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let bank_account = match (r.bank_account_iban, r.bank_account_holder) {
                (Some(iban), Some(holder)) => Some(BankAccount { iban, holder }),
                _ => None,
            };
            TeacherProfile {
                id: r.id,
                display_name: r.display_name,
                email: r.email,
                phone: r.phone,
                branch_id: r.branch_id,
                hourly_rate: r.hourly_rate,
                commission_percent: r.commission_percent,
                approved: r.approved,
                bank_account,
            }
        }))
    }

    async fn subject(&self, id: Uuid) -> Result<Option<SubjectInfo>, AppError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String)>(
            "SELECT id, branch_id, name FROM subjects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, branch_id, name)| SubjectInfo {
            id,
            branch_id,
            name,
        }))
    }

    async fn student_contact(&self, id: Uuid) -> Result<Option<StudentContact>, AppError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, Option<String>)>(
            "SELECT id, display_name, email, phone FROM students WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, display_name, email, phone)| StudentContact {
            id,
            display_name,
            email,
            phone,
        }))
    }
}
