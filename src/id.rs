//! ID generation utilities
//!
//! Provides identifiers for retrain jobs and tracking-store records.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a retrain job ID
///
/// Format: `retrain-{timestamp_ms}-{random_hex}`
/// Example: `retrain-1738300800123-a1b2`
pub fn generate_job_id() -> String {
    let random: u16 = rand::rng().random();
    format!("retrain-{}-{:04x}", now_ms(), random)
}

/// Generate a run ID for a recorded training run
///
/// Format: 32 lowercase hex characters, the same shape MLflow uses.
pub fn generate_run_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Generate a numeric experiment ID
pub fn generate_experiment_id() -> String {
    let random: u32 = rand::rng().random();
    format!("{}", random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_job_id_format() {
        let id = generate_job_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "retrain");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_run_id_format() {
        let id = generate_run_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_run_id_uniqueness() {
        assert_ne!(generate_run_id(), generate_run_id());
    }

    #[test]
    fn test_generate_experiment_id_is_numeric() {
        assert!(generate_experiment_id().chars().all(|c| c.is_ascii_digit()));
    }
}
