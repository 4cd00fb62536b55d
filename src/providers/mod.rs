pub mod directory;
pub mod meetings;
pub mod notify;
pub mod payment;

pub use directory::{BankAccount, StudentContact, SubjectInfo, TeacherDirectory, TeacherProfile};
pub use meetings::{MeetingDetails, MeetingProvider};
pub use notify::{NotificationDispatcher, NotificationKind, NotificationRequest, Recipient};
pub use payment::{CheckoutOrder, CheckoutSession, GatewayError, PaymentGateway, PaymentResult};
