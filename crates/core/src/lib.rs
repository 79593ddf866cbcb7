pub mod errors;
pub mod events;
pub mod models;
pub mod symbol;
pub mod traits;

pub use errors::*;
pub use events::*;
pub use models::*;
pub use symbol::*;
pub use traits::*;

/// Current unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
