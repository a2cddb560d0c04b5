//! Template rendering.
//!
//! Substitutes `{first_name}`, `{last_name}` and `{email}` with a recipient's
//! fields. Any other brace token is copied through unchanged, and substituted
//! values are never scanned again, so a name containing `{email}` renders as
//! written.

use crate::domain::{Campaign, Recipient, RenderedMessage, GREETING_TEMPLATE};

fn lookup<'a>(key: &str, recipient: &'a Recipient) -> Option<&'a str> {
    match key {
        "first_name" => Some(recipient.first_name()),
        "last_name" => Some(recipient.last_name()),
        "email" => Some(recipient.email()),
        _ => None,
    }
}

/// Renders `template` for `recipient`.
pub fn render(template: &str, recipient: &Recipient) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        match lookup(key, recipient) {
            Some(value) => out.push_str(value),
            None => {
                // Unknown token: emit the brace and keep scanning after it, so
                // a placeholder nested inside stray braces is still found.
                out.push('{');
                rest = after;
                continue;
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Renders a campaign's subject and body for one recipient.
pub fn render_message(campaign: &Campaign, recipient: &Recipient) -> RenderedMessage {
    let body = if campaign.greeting {
        let mut body = render(GREETING_TEMPLATE, recipient);
        body.push_str(&render(&campaign.body_template, recipient));
        body
    } else {
        render(&campaign.body_template, recipient)
    };

    RenderedMessage {
        subject: render(&campaign.subject_template, recipient),
        body,
    }
}
