use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub content_base64: String,
    /// Content id for inline images (`cid:` references in the html).
    pub content_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Credentials handed back by the membership service for a new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub identity_id: String,
    pub username: String,
    pub temporary_password: Option<String>,
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Payment confirmation for an event or trip registration.
pub fn confirmation(
    to: &str,
    description: &str,
    participant_name: Option<&str>,
    qr_token: Option<&str>,
) -> Notification {
    let activity = description
        .strip_prefix("Inschrijving ")
        .unwrap_or(description);
    let ticket = qr_token
        .map(|token| {
            format!(
                "<p>Your entry code:</p><p style=\"font-family: monospace;\">{}</p>",
                escape(token)
            )
        })
        .unwrap_or_default();
    Notification {
        to: to.to_string(),
        subject: format!("Ticket: {description}"),
        html: format!(
            "<h2>Thanks for signing up!</h2><p>Dear {},</p><p>Your payment for <strong>{}</strong> has been received.</p>{ticket}",
            escape(participant_name.unwrap_or("participant")),
            escape(activity),
        ),
        attachments: Vec::new(),
    }
}

/// Pub-crawl confirmation listing one code per issued ticket.
pub fn pub_crawl_tickets(to: &str, description: &str, tickets: &[(String, String)]) -> Notification {
    let rows: String = tickets
        .iter()
        .map(|(name, token)| format!("<li>{}: <code>{}</code></li>", escape(name), escape(token)))
        .collect();
    Notification {
        to: to.to_string(),
        subject: format!("Tickets: {description}"),
        html: format!(
            "<h2>Your pub crawl tickets</h2><p>Show one code per participant at the entrance.</p><ul>{rows}</ul>"
        ),
        attachments: Vec::new(),
    }
}

pub fn membership_renewed(to: &str) -> Notification {
    Notification {
        to: to.to_string(),
        subject: "Your membership has been renewed".to_string(),
        html: "<p>Thanks! Your membership has been extended by one year.</p>".to_string(),
        attachments: Vec::new(),
    }
}

pub fn welcome(to: &str, first_name: &str, credentials: &Credentials) -> Notification {
    let password = credentials
        .temporary_password
        .as_deref()
        .map(|p| format!("<p>Temporary password: <code>{}</code></p>", escape(p)))
        .unwrap_or_default();
    Notification {
        to: to.to_string(),
        subject: "Welcome! Your account is ready".to_string(),
        html: format!(
            "<h2>Welcome, {}!</h2><p>Your username: <code>{}</code></p>{password}<p>Change your password after the first login.</p>",
            escape(first_name),
            escape(&credentials.username),
        ),
        attachments: Vec::new(),
    }
}
