pub mod availability;
pub mod booking;
pub mod jobs;
pub mod notifier;
pub mod payout;
pub mod settlement;

pub use availability::{AvailabilityChecker, AvailabilityStore, PgAvailabilityStore};
pub use booking::{BookingService, CreateAppointmentInput, CreatedAppointment, PaymentConfirmation};
pub use jobs::JobRunner;
pub use notifier::NotificationOutbox;
pub use payout::{BulkPayoutSummary, FailedPayout, PayoutItem, PayoutReceipt, PayoutService};
pub use settlement::{CreditOutcome, SettlementService};
