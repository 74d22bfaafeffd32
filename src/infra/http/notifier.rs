use {
    super::ServiceClient,
    crate::domain::{
        error::PipelineError,
        notification::Notification,
        ports::{BoxFuture, Notifier},
    },
    serde::Serialize,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingAttachment<'a> {
    name: &'a str,
    content_type: &'a str,
    content_bytes: &'a str,
    is_inline: bool,
    content_id: Option<&'a str>,
}

#[derive(Serialize)]
struct OutgoingMail<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    attachments: Vec<OutgoingAttachment<'a>>,
}

/// Mail delivery through the notification service's `/send-email`.
pub struct HttpNotifier {
    client: ServiceClient,
}

impl HttpNotifier {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

impl Notifier for HttpNotifier {
    fn send(&self, notification: &Notification) -> BoxFuture<'_, Result<(), PipelineError>> {
        let mail = OutgoingMail {
            to: &notification.to,
            subject: &notification.subject,
            html: &notification.html,
            attachments: notification
                .attachments
                .iter()
                .map(|a| OutgoingAttachment {
                    name: &a.name,
                    content_type: &a.content_type,
                    content_bytes: &a.content_base64,
                    is_inline: a.content_id.is_some(),
                    content_id: a.content_id.as_deref(),
                })
                .collect(),
        };
        let body = serde_json::to_value(&mail);
        Box::pin(async move {
            let body = body?;
            self.client
                .send(self.client.post("/send-email").json(&body))
                .await?;
            Ok(())
        })
    }
}
