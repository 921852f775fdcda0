//! MongoDB document schemas

pub mod credit;
pub mod design;
pub mod metadata;
pub mod reservation;

pub use credit::{CreditDoc, CREDIT_COLLECTION};
pub use design::{DesignDoc, DESIGN_COLLECTION};
pub use metadata::Metadata;
pub use reservation::{ReservationDoc, RESERVATION_COLLECTION};
