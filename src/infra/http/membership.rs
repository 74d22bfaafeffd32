use {
    super::ServiceClient,
    crate::domain::{
        error::PipelineError,
        notification::Credentials,
        ports::{BoxFuture, MembershipService},
        transaction::CustomerDetails,
    },
    serde::{Deserialize, Serialize},
};

#[derive(Serialize)]
struct CreateUser {
    first_name: String,
    last_name: String,
    personal_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_of_birth: Option<String>,
}

#[derive(Deserialize)]
struct CreatedUser {
    user_id: String,
    #[serde(default, alias = "upn", alias = "email")]
    username: Option<String>,
    #[serde(default, alias = "temporary_password")]
    password: Option<String>,
}

/// Client for the membership service that owns external identities.
pub struct HttpMembershipService {
    client: ServiceClient,
}

impl HttpMembershipService {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

impl MembershipService for HttpMembershipService {
    fn provision(&self, user_id: &str) -> BoxFuture<'_, Result<(), PipelineError>> {
        let body = serde_json::json!({ "user_id": user_id });
        Box::pin(async move {
            self.client
                .send(self.client.post("/register").json(&body))
                .await?;
            Ok(())
        })
    }

    fn create_account(
        &self,
        customer: &CustomerDetails,
    ) -> BoxFuture<'_, Result<Credentials, PipelineError>> {
        let request = match (&customer.first_name, &customer.last_name, &customer.email) {
            (Some(first), Some(last), Some(email)) => Ok(CreateUser {
                first_name: first.clone(),
                last_name: last.clone(),
                personal_email: email.clone(),
                phone_number: customer.phone_number.clone(),
                date_of_birth: customer.date_of_birth.clone(),
            }),
            _ => Err(PipelineError::Validation(
                "account creation needs first name, last name and email".into(),
            )),
        };
        Box::pin(async move {
            let request = request?;
            let created: CreatedUser = self
                .client
                .send_json(self.client.post("/create-user").json(&request))
                .await?;
            Ok(Credentials {
                identity_id: created.user_id,
                username: created.username.unwrap_or(request.personal_email),
                temporary_password: created.password,
            })
        })
    }
}
