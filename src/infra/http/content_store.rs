//! Content store client speaking the Directus REST dialect: every answer is
//! wrapped in `{"data": ...}`, collections live under `/items/{collection}`.

use {
    super::ServiceClient,
    crate::domain::{
        error::PipelineError,
        money::MoneyAmount,
        ports::{
            BoxFuture, ContentStore, ContentUser, PaymentSettings, RegistrationContact,
            RegistrationPatch,
        },
        pricing::{SelectedActivity, TripQuote},
        ticket::{Participant, Ticket},
        transaction::{CustomerDetails, RegistrationKind, RegistrationRef},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, de::DeserializeOwned},
};

const SETTINGS_PAGE: &str = "payment_settings";

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct UserRow {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    entra_id: Option<String>,
}

impl From<UserRow> for ContentUser {
    fn from(row: UserRow) -> Self {
        ContentUser {
            id: row.id,
            email: row.email,
            identity_id: row.entra_id.filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct IdRow {
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct PriceHolder {
    #[serde(default)]
    price: Option<MoneyAmount>,
}

#[derive(Deserialize)]
struct ListedPriceRow {
    #[serde(default)]
    event_id: Option<PriceHolder>,
    #[serde(default)]
    pub_crawl_event_id: Option<PriceHolder>,
}

#[derive(Deserialize)]
struct TripRow {
    #[serde(default)]
    base_price: Option<MoneyAmount>,
    #[serde(default)]
    crew_discount: Option<MoneyAmount>,
    #[serde(default)]
    deposit_amount: Option<MoneyAmount>,
}

#[derive(Deserialize)]
struct TripSignupRow {
    #[serde(default)]
    role: Option<String>,
    trip_id: TripRow,
}

#[derive(Deserialize)]
struct ActivityOption {
    name: String,
    #[serde(default)]
    price: Option<MoneyAmount>,
}

#[derive(Deserialize)]
struct ActivityRow {
    #[serde(default)]
    price: Option<MoneyAmount>,
    #[serde(default)]
    options: Vec<ActivityOption>,
}

#[derive(Deserialize)]
struct SignupActivityRow {
    #[serde(default)]
    selected_options: serde_json::Value,
    #[serde(default)]
    trip_activity_id: Option<ActivityRow>,
}

impl SignupActivityRow {
    fn into_selected(self) -> Option<SelectedActivity> {
        let activity = self.trip_activity_id?;
        let chosen = json_list::<String>(self.selected_options);
        let option_prices = chosen
            .iter()
            .filter_map(|name| activity.options.iter().find(|o| &o.name == name))
            .map(|o| o.price.unwrap_or(MoneyAmount::ZERO))
            .collect();
        Some(SelectedActivity {
            price: activity.price.unwrap_or(MoneyAmount::ZERO),
            option_prices,
        })
    }
}

#[derive(Deserialize)]
struct ContactRow {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    participant_name: Option<String>,
    #[serde(default)]
    qr_token: Option<String>,
}

#[derive(Deserialize)]
struct ParticipantsRow {
    #[serde(default)]
    name_initials: serde_json::Value,
}

#[derive(Deserialize)]
struct SettingsRow {
    id: serde_json::Value,
    #[serde(default)]
    disabled_message: Option<String>,
}

/// Lists arrive either as JSON arrays or as JSON encoded in a string.
fn json_list<T: DeserializeOwned>(value: serde_json::Value) -> Vec<T> {
    let value = match value {
        serde_json::Value::String(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        other => other,
    };
    serde_json::from_value(value).unwrap_or_default()
}

fn id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct DirectusContentStore {
    client: ServiceClient,
}

impl DirectusContentStore {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    async fn settings_row(&self) -> Result<Option<SettingsRow>, PipelineError> {
        let rows: Envelope<Vec<SettingsRow>> = self
            .client
            .send_json(self.client.get("/items/site_settings").query(&[
                ("filter[page][_eq]", SETTINGS_PAGE),
                ("fields", "id,disabled_message"),
                ("limit", "1"),
            ]))
            .await?;
        Ok(rows.data.into_iter().next())
    }
}

impl ContentStore for DirectusContentStore {
    fn user_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Option<ContentUser>, PipelineError>> {
        let email = email.trim().to_lowercase();
        Box::pin(async move {
            let rows: Envelope<Vec<UserRow>> = self
                .client
                .send_json(self.client.get("/users").query(&[
                    ("filter[email][_eq]", email.as_str()),
                    ("fields", "id,email,entra_id"),
                    ("limit", "1"),
                ]))
                .await?;
            Ok(rows.data.into_iter().next().map(ContentUser::from))
        })
    }

    fn current_user(
        &self,
        bearer: &str,
    ) -> BoxFuture<'_, Result<Option<ContentUser>, PipelineError>> {
        let bearer = bearer.to_string();
        Box::pin(async move {
            let request = self
                .client
                .get_as("/users/me", &bearer)
                .query(&[("fields", "id,email,entra_id")]);
            let response = request
                .send()
                .await
                .map_err(|e| PipelineError::upstream(self.client.name(), e.to_string()))?;
            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(PipelineError::upstream(self.client.name(), status.to_string()));
            }
            let user: Envelope<UserRow> = response
                .json()
                .await
                .map_err(|e| PipelineError::upstream(self.client.name(), format!("decode: {e}")))?;
            Ok(Some(user.data.into()))
        })
    }

    fn is_committee_member(&self, user_id: &str) -> BoxFuture<'_, Result<bool, PipelineError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let rows: Envelope<Vec<IdRow>> = self
                .client
                .send_json(self.client.get("/items/committee_members").query(&[
                    ("filter[user_id][_eq]", user_id.as_str()),
                    ("fields", "id"),
                    ("limit", "1"),
                ]))
                .await?;
            Ok(!rows.data.is_empty())
        })
    }

    fn trip_quote(
        &self,
        signup_id: &str,
    ) -> BoxFuture<'_, Result<Option<TripQuote>, PipelineError>> {
        let signup_id = signup_id.to_string();
        Box::pin(async move {
            let signup: Option<Envelope<TripSignupRow>> = self
                .client
                .send_optional(
                    self.client
                        .get(&format!("/items/trip_signups/{signup_id}"))
                        .query(&[(
                            "fields",
                            "role,trip_id.base_price,trip_id.crew_discount,trip_id.deposit_amount",
                        )]),
                )
                .await?;
            let Some(Envelope { data: signup }) = signup else {
                return Ok(None);
            };

            let activities: Envelope<Vec<SignupActivityRow>> = self
                .client
                .send_json(self.client.get("/items/trip_signup_activities").query(&[
                    ("filter[trip_signup_id][_eq]", signup_id.as_str()),
                    ("fields", "selected_options,trip_activity_id.price,trip_activity_id.options"),
                    ("limit", "-1"),
                ]))
                .await?;

            Ok(Some(TripQuote {
                base_price: signup.trip_id.base_price.unwrap_or(MoneyAmount::ZERO),
                activities: activities
                    .data
                    .into_iter()
                    .filter_map(SignupActivityRow::into_selected)
                    .collect(),
                crew_discount: signup.trip_id.crew_discount.unwrap_or(MoneyAmount::ZERO),
                is_crew: signup.role.as_deref() == Some("crew"),
                deposit: signup.trip_id.deposit_amount.unwrap_or(MoneyAmount::ZERO),
            }))
        })
    }

    fn listed_price(
        &self,
        registration: &RegistrationRef,
    ) -> BoxFuture<'_, Result<Option<MoneyAmount>, PipelineError>> {
        let fields = match registration.kind {
            RegistrationKind::EventSignup => Some("event_id.price"),
            RegistrationKind::PubCrawlSignup => Some("pub_crawl_event_id.price"),
            RegistrationKind::TripSignup => None,
        };
        let path = format!(
            "/items/{}/{}",
            registration.kind.collection(),
            registration.id
        );
        Box::pin(async move {
            let Some(fields) = fields else {
                return Ok(None);
            };
            let row: Option<Envelope<ListedPriceRow>> = self
                .client
                .send_optional(self.client.get(&path).query(&[("fields", fields)]))
                .await?;
            Ok(row.and_then(|Envelope { data }| {
                data.event_id
                    .or(data.pub_crawl_event_id)
                    .and_then(|holder| holder.price)
            }))
        })
    }

    fn patch_registration(
        &self,
        registration: &RegistrationRef,
        patch: RegistrationPatch,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        let path = format!(
            "/items/{}/{}",
            registration.kind.collection(),
            registration.id
        );
        let body = match patch {
            RegistrationPatch::Paid => serde_json::json!({ "payment_status": "paid" }),
            RegistrationPatch::DepositPaid { at } => {
                serde_json::json!({ "deposit_paid": true, "deposit_paid_at": at })
            }
            RegistrationPatch::FullPaymentPaid { at } => {
                serde_json::json!({ "full_payment_paid": true, "full_payment_paid_at": at })
            }
        };
        Box::pin(async move {
            self.client.send(self.client.patch(&path).json(&body)).await?;
            Ok(())
        })
    }

    fn registration_contact(
        &self,
        registration: &RegistrationRef,
    ) -> BoxFuture<'_, Result<RegistrationContact, PipelineError>> {
        let path = format!(
            "/items/{}/{}",
            registration.kind.collection(),
            registration.id
        );
        Box::pin(async move {
            let row: Option<Envelope<ContactRow>> = self
                .client
                .send_optional(
                    self.client
                        .get(&path)
                        .query(&[("fields", "email,participant_name,qr_token")]),
                )
                .await?;
            Ok(row
                .map(|Envelope { data }| RegistrationContact {
                    email: data.email,
                    participant_name: data.participant_name,
                    qr_token: data.qr_token,
                })
                .unwrap_or_default())
        })
    }

    fn pub_crawl_participants(
        &self,
        signup_id: &str,
    ) -> BoxFuture<'_, Result<Vec<Participant>, PipelineError>> {
        let path = format!(
            "/items/{}/{signup_id}",
            RegistrationKind::PubCrawlSignup.collection()
        );
        Box::pin(async move {
            let row: Envelope<ParticipantsRow> = self
                .client
                .send_json(self.client.get(&path).query(&[("fields", "name_initials")]))
                .await?;
            Ok(json_list(row.data.name_initials))
        })
    }

    fn tickets_for(&self, signup_id: &str) -> BoxFuture<'_, Result<Vec<Ticket>, PipelineError>> {
        let signup_id = signup_id.to_string();
        Box::pin(async move {
            let rows: Envelope<Vec<Ticket>> = self
                .client
                .send_json(self.client.get("/items/pub_crawl_tickets").query(&[
                    ("filter[signup_id][_eq]", signup_id.as_str()),
                    ("fields", "signup_id,participant_index,name,initial,qr_token"),
                    ("limit", "-1"),
                ]))
                .await?;
            Ok(rows.data)
        })
    }

    fn create_ticket(&self, ticket: &Ticket) -> BoxFuture<'_, Result<(), PipelineError>> {
        let body = serde_json::to_value(ticket);
        Box::pin(async move {
            let body = body?;
            self.client
                .send(self.client.post("/items/pub_crawl_tickets").json(&body))
                .await?;
            Ok(())
        })
    }

    fn create_user_record(
        &self,
        customer: &CustomerDetails,
    ) -> BoxFuture<'_, Result<String, PipelineError>> {
        let body = serde_json::json!({
            "email": customer.email,
            "first_name": customer.first_name,
            "last_name": customer.last_name,
            "phone_number": customer.phone_number,
            "date_of_birth": customer.date_of_birth,
            "status": "active",
        });
        Box::pin(async move {
            let created: Envelope<IdRow> = self
                .client
                .send_json(self.client.post("/users").json(&body))
                .await?;
            Ok(id_string(&created.data.id))
        })
    }

    fn link_identity(
        &self,
        user_id: &str,
        identity_id: &str,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        let path = format!("/users/{user_id}");
        let body = serde_json::json!({ "entra_id": identity_id });
        Box::pin(async move {
            self.client.send(self.client.patch(&path).json(&body)).await?;
            Ok(())
        })
    }

    fn set_membership_expiry(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        let path = format!("/users/{user_id}");
        let body = serde_json::json!({
            "membership_expiry": expires_at.date_naive().to_string(),
        });
        Box::pin(async move {
            self.client.send(self.client.patch(&path).json(&body)).await?;
            Ok(())
        })
    }

    fn payment_settings(&self) -> BoxFuture<'_, Result<PaymentSettings, PipelineError>> {
        Box::pin(async move {
            let settings = self
                .settings_row()
                .await?
                .and_then(|row| row.disabled_message)
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            Ok(settings)
        })
    }

    fn update_payment_settings(
        &self,
        settings: PaymentSettings,
    ) -> BoxFuture<'_, Result<PaymentSettings, PipelineError>> {
        Box::pin(async move {
            let encoded = serde_json::to_string(&settings)?;
            match self.settings_row().await? {
                Some(row) => {
                    let path = format!("/items/site_settings/{}", id_string(&row.id));
                    let body = serde_json::json!({ "disabled_message": encoded });
                    self.client.send(self.client.patch(&path).json(&body)).await?;
                }
                None => {
                    let body = serde_json::json!({
                        "page": SETTINGS_PAGE,
                        "disabled_message": encoded,
                    });
                    self.client
                        .send(self.client.post("/items/site_settings").json(&body))
                        .await?;
                }
            }
            Ok(settings)
        })
    }
}
