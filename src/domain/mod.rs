pub mod appointment;
pub mod job;
pub mod wallet;

pub use appointment::{
    generate_order_code, Appointment, AppointmentStatus, FeeSplit, PaymentMethod, PaymentStatus,
};
pub use job::{DeferredJob, JobKind, ReminderPayload, ReminderVariant};
pub use wallet::{TransactionKind, Wallet, WalletTransaction};
