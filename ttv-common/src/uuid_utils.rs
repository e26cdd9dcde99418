//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new UUIDv4 rendered as a hyphenated string
pub fn generate_string() -> String {
    Uuid::new_v4().to_string()
}
