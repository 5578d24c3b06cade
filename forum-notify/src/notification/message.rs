//! Digest message composition.

use serde::{Deserialize, Serialize};

use super::mailer::EmailMessage;
use crate::config::env_string;
use crate::domain::{TopicActivity, User};

/// Settings used to render digest and account emails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestSettings {
    /// Forum name shown in subjects and greetings.
    pub forum_name: String,
    /// Server base URL, with or without scheme.
    pub base_url: String,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            forum_name: "forum".to_string(),
            base_url: "localhost".to_string(),
        }
    }
}

impl DigestSettings {
    /// Load from `FORUM_NAME` and `SERVER_NAME`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            forum_name: env_string("FORUM_NAME").unwrap_or(defaults.forum_name),
            base_url: env_string("SERVER_NAME").unwrap_or(defaults.base_url),
        }
    }

    /// Base URL with a scheme. Bare host names get `https://`.
    pub fn forum_link(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            base.to_string()
        } else {
            format!("https://{}", base)
        }
    }
}

/// Compose the digest email for one user.
///
/// `topics` should not be empty; users without new activity get no email.
pub fn compose_digest(
    user: &User,
    topics: &[TopicActivity],
    settings: &DigestSettings,
) -> EmailMessage {
    let link = settings.forum_link();
    let subject = format!("New messages in {}", settings.forum_name);

    let mut text = format!(
        "Hello {},\nNew messages have been posted in {}:\n",
        user.username, settings.forum_name
    );
    for topic in topics {
        text.push_str("- ");
        text.push_str(&topic.title);
        text.push('\n');
    }
    text.push_str(&format!("Forum link: {}", link));

    let items: String = topics
        .iter()
        .map(|topic| format!("        <li>{}</li>\n", escape_html(&topic.title)))
        .collect();
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body>
    <p>Hello {},</p>
    <p>New messages have been posted in {}:</p>
    <ul>
{}    </ul>
    <p><a href="{}">{}</a></p>
</body>
</html>"#,
        escape_html(&user.username),
        escape_html(&settings.forum_name),
        items,
        escape_html(&link),
        escape_html(&link),
    );

    EmailMessage::new(subject, vec![user.email.clone()], text).with_html(html)
}

/// Minimal HTML escaping for text nodes and attribute values.
pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
