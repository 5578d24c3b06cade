//! Account emails: password recovery and activation tokens.
//!
//! These go through the same [`Mailer`] as digests and are sent once, with no
//! retry.

use super::mailer::{EmailMessage, Mailer};
use super::message::{DigestSettings, escape_html};
use crate::Result;

/// Send a password reset token to the user.
pub async fn send_reset_token(
    mailer: &dyn Mailer,
    settings: &DigestSettings,
    token: &str,
    username: &str,
    email: &str,
) -> Result<()> {
    let link = format!("{}/auth/reset-password/{}", settings.forum_link(), token);
    let message = token_email(
        "Password Recovery Confirmation",
        &format!(
            "Someone requested a password reset for your account on {}.",
            settings.forum_name
        ),
        "To reset your password, open the following link:",
        &link,
        username,
        email,
    );
    mailer.send(&message).await
}

/// Send an account activation token to the user.
pub async fn send_activation_token(
    mailer: &dyn Mailer,
    settings: &DigestSettings,
    token: &str,
    username: &str,
    email: &str,
) -> Result<()> {
    let link = format!("{}/auth/activate/{}", settings.forum_link(), token);
    let message = token_email(
        "Account Activation",
        &format!("Welcome to {}!", settings.forum_name),
        "To activate your account, open the following link:",
        &link,
        username,
        email,
    );
    mailer.send(&message).await
}

fn token_email(
    subject: &str,
    intro: &str,
    action: &str,
    link: &str,
    username: &str,
    email: &str,
) -> EmailMessage {
    let text = format!(
        "Dear {},\n\n{}\n{}\n\n{}\n\nIf you did not request this, ignore this email.",
        username, intro, action, link
    );
    let html = format!(
        "<p>Dear {},</p>\n<p>{}</p>\n<p>{} <a href=\"{}\">{}</a></p>\n<p>If you did not request this, ignore this email.</p>",
        escape_html(username),
        escape_html(intro),
        escape_html(action),
        escape_html(link),
        escape_html(link),
    );
    EmailMessage::new(subject, vec![email.to_string()], text).with_html(html)
}
