pub mod fs;
pub mod memory;

pub use fs::FsStagingStore;
pub use memory::MemoryStagingStore;

use engine_core::error::StagingError;

/// Staging paths are relative, slash separated and may not escape the root.
pub(crate) fn validate_path(path: &str) -> Result<(), StagingError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(StagingError::InvalidPath(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_paths() {
        assert!(validate_path("staging/acme.ads/bat-1.json").is_ok());
        for bad in ["", "/abs", "a/../b", "a//b", "./a", "a\\b"] {
            assert!(validate_path(bad).is_err(), "{bad} should be rejected");
        }
    }
}
