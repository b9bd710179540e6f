pub mod models;

pub use models::{Account, AccountStatus, DayUploader};
