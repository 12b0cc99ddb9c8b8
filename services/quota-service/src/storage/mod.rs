pub mod database;
pub mod error;
pub mod schema;

pub use database::{AttachmentRecord, ClientRecord, ClinicDatabase, StaffUserRecord};
pub use error::StorageError;

pub const CLINIC_DB_FILENAME: &str = "clinic.db";
