use serde::{Deserialize, Serialize};

/// One attendee listed on a pub-crawl signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    #[serde(default)]
    pub initial: String,
}

/// Issued entry ticket. `(signup_id, participant_index)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub signup_id: String,
    pub participant_index: u32,
    pub name: String,
    pub initial: String,
    pub qr_token: String,
}

impl Ticket {
    pub fn issue(signup_id: &str, participant_index: u32, participant: &Participant) -> Self {
        Self {
            signup_id: signup_id.to_string(),
            participant_index,
            name: participant.name.clone(),
            initial: participant.initial.clone(),
            qr_token: format!(
                "r-{signup_id}-{participant_index}-{}",
                uuid::Uuid::new_v4().simple()
            ),
        }
    }

    pub fn key(&self) -> (&str, u32) {
        (&self.signup_id, self.participant_index)
    }
}
