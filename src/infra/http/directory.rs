use {
    super::ServiceClient,
    crate::domain::{
        error::PipelineError,
        ports::{BoxFuture, DirectorySync},
    },
};

/// Triggers a directory → content store sync for one user.
pub struct HttpDirectorySync {
    client: ServiceClient,
}

impl HttpDirectorySync {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

impl DirectorySync for HttpDirectorySync {
    fn sync(&self, user_id: &str) -> BoxFuture<'_, Result<(), PipelineError>> {
        let body = serde_json::json!({ "userId": user_id });
        Box::pin(async move {
            self.client
                .send(self.client.post("/sync/user").json(&body))
                .await?;
            Ok(())
        })
    }
}
