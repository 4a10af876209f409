//! Normalization of the profile submitted with a password sign-up.

use crate::username;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Email is required")]
    EmailRequired,
}

/// A normalized sign-up profile, ready to be stored as an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub email: String,
    pub name: Option<String>,
}

impl Profile {
    /// Email is trimmed and lowercased, and must not be empty.
    ///
    /// The name goes through the same normalization as availability checks, and is dropped
    /// entirely when it is blank.
    pub fn normalize(email: &str, name: Option<&str>) -> Result<Self, Error> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(Error::EmailRequired);
        }
        let name = name.map(username::normalize).filter(|n| !n.is_empty());
        Ok(Self { email, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let profile = Profile::normalize("  Alice@Example.COM ", Some(" Alice ")).unwrap();
        assert_eq!(profile.email, "alice@example.com");
        assert_eq!(profile.name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_blank_name_dropped() {
        let profile = Profile::normalize("a@b.c", Some("   ")).unwrap();
        assert_eq!(profile.name, None);
        let profile = Profile::normalize("a@b.c", None).unwrap();
        assert_eq!(profile.name, None);
    }

    #[test]
    fn test_email_required() {
        assert_eq!(
            Profile::normalize("   ", Some("alice")),
            Err(Error::EmailRequired)
        );
    }
}
