//! Job identifier generation (spec §4.1).

use uuid::Uuid;

/// Mints a fresh, time-sortable job identifier.
///
/// UUIDv7 embeds a millisecond timestamp in its most significant bits, which
/// keeps rows roughly insertion-ordered in the store's primary-key index —
/// the property spec §4.1 asks for ("time-sortable UUID... to aid DB
/// locality").
pub fn new_job_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_fresh_and_sortable() {
        let a = new_job_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_job_id();
        assert_ne!(a, b);
        assert!(a < b, "uuidv7 ids should sort by creation time");
    }
}
