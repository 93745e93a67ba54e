//! Front-end HTTP surface: upload, download, admin.

pub mod handlers;

pub use handlers::{router, AppState};
