//! Rendering of the password reset and welcome emails.
//!
//! Templates contain `{{ name }}` placeholders. Stored [EmailSettings] may override the subject
//! and body of each email; anything left unset falls back to the built-in defaults.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_RESET_SUBJECT: &str = "Reset your Nexus password";
pub const DEFAULT_RESET_HTML: &str = r#"
  <p>Someone requested a password reset for your Nexus account.</p>
  <p><a href="{{resetUrl}}">Reset your password</a></p>
  <p>If you did not request this, you can ignore this email.</p>
"#;
pub const DEFAULT_WELCOME_SUBJECT: &str = "Welcome to Nexus";
pub const DEFAULT_WELCOME_HTML: &str = r#"
  <p>Welcome to Nexus{{name}},</p>
  <p>Your account is ready. You can sign in anytime to manage your workspace.</p>
"#;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder regex"));

/// Replaces every `{{ key }}` with its value, or with nothing when the key is unknown.
pub fn render_template(template: &str, variables: &HashMap<&str, &str>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            variables.get(&caps[1]).copied().unwrap_or_default().to_owned()
        })
        .into_owned()
}

/// Overrides for the email templates, as stored by an administrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmailSettings {
    pub reset_subject: Option<String>,
    pub reset_html: Option<String>,
    pub welcome_subject: Option<String>,
    pub welcome_html: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

impl EmailSettings {
    /// Renders the password reset email. Placeholders: `resetUrl`, `email`.
    pub fn password_reset(&self, reset_url: &str, email: &str) -> RenderedEmail {
        let variables = HashMap::from([("resetUrl", reset_url), ("email", email)]);
        RenderedEmail {
            subject: self
                .reset_subject
                .as_deref()
                .unwrap_or(DEFAULT_RESET_SUBJECT)
                .to_owned(),
            html: render_template(
                self.reset_html.as_deref().unwrap_or(DEFAULT_RESET_HTML),
                &variables,
            ),
        }
    }

    /// Renders the welcome email. Placeholders: `name`, `email`.
    ///
    /// `name` renders with a leading space (or as nothing), so that `Welcome{{name}},` reads
    /// naturally either way.
    pub fn welcome(&self, name: Option<&str>, email: &str) -> RenderedEmail {
        let name_suffix = name.map(|n| format!(" {n}")).unwrap_or_default();
        let variables = HashMap::from([("name", name_suffix.as_str()), ("email", email)]);
        RenderedEmail {
            subject: self
                .welcome_subject
                .as_deref()
                .unwrap_or(DEFAULT_WELCOME_SUBJECT)
                .to_owned(),
            html: render_template(
                self.welcome_html.as_deref().unwrap_or(DEFAULT_WELCOME_HTML),
                &variables,
            ),
        }
    }
}
