//! Stable project identity.
//!
//! A project is recognized across analysis runs and process restarts by
//! the SHA-256 of its normalized path. Normalization makes the identity
//! independent of casing, separator style, surrounding whitespace, and
//! trailing slashes.

use sha2::{Digest, Sha256};

/// Normalize a project path for hashing.
///
/// - trims surrounding whitespace
/// - converts `\` separators to `/`
/// - removes trailing `/` (a bare root `/` is kept)
/// - lower-cases the result
pub fn normalize_project_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/").to_lowercase();
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Deterministic one-way hash of the normalized project path (hex SHA-256).
///
/// ```rust
/// use project_context_core::identity::project_hash;
///
/// assert_eq!(project_hash("/Work/App/"), project_hash("/work/app"));
/// assert_ne!(project_hash("/a/b"), project_hash("/a/c"));
/// ```
pub fn project_hash(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_project_path(path).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stable() {
        let a = project_hash("/home/dev/project");
        let b = project_hash("/home/dev/project");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_normalizes() {
        let base = project_hash("/home/dev/project");
        assert_eq!(base, project_hash("/home/dev/project/"));
        assert_eq!(base, project_hash("/HOME/Dev/Project"));
        assert_eq!(base, project_hash("  /home/dev/project//  "));
        assert_eq!(project_hash("C:\\src\\app"), project_hash("c:/src/app"));
    }

    #[test]
    fn test_hash_distinguishes() {
        assert_ne!(project_hash("/a/b"), project_hash("/a/c"));
    }

    #[test]
    fn test_root_kept() {
        assert_eq!(normalize_project_path("/"), "/");
        assert_eq!(normalize_project_path("///"), "/");
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            project_hash("/A/B/"),
            "662b7b62a798bb2d53e67cad9778e12e48297c79eae98d3aae7197be825d768f"
        );
    }
}
