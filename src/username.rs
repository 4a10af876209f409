//! Canonical form of usernames.

/// Usernames shorter than this (after normalization, in characters) are never available.
pub const MIN_USERNAME_LENGTH: usize = 3;

/// Trims surrounding whitespace and lowercases.
///
/// This is the form that is stored, compared, and used in anonymous rate limit keys, so
/// `"  Alice "`, `"alice"` and `"ALICE"` all name the same user.
pub fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Whether an already normalized username is too short to ever be claimed.
pub fn is_too_short(normalized: &str) -> bool {
    normalized.chars().count() < MIN_USERNAME_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants_collide() {
        assert_eq!(normalize("  Alice "), "alice");
        assert_eq!(normalize("alice"), "alice");
        assert_eq!(normalize("ALICE"), "alice");
        assert_eq!(normalize("\tBoB\n"), "bob");
    }

    #[test]
    fn test_idempotent() {
        for raw in ["  Alice ", "ALICE", "Ünïcode Näme", " x ", "", "MiXeD_case-42"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_too_short() {
        assert!(is_too_short(""));
        assert!(is_too_short("ab"));
        assert!(!is_too_short("abc"));
        // Length is counted in characters, not bytes
        assert!(is_too_short("éé"));
        assert!(!is_too_short("ééé"));
    }

    #[test]
    fn test_length_counts_scalar_values() {
        // A character outside the basic plane counts once, although it takes two UTF-16 units
        assert_eq!("😀a".encode_utf16().count(), 3);
        assert!(is_too_short("😀a"));
        assert!(!is_too_short("😀ab"));
    }
}
