pub mod message;
pub mod prescription;
pub mod session;

pub use message::{ChatMessage, ChatTurn, MessageKind, Role};
pub use prescription::{LifestyleAdvice, MedicineEntry, PrescriptionRecord};
pub use session::{ChatSession, OpenedSession};
