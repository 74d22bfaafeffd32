pub mod http;
pub mod memory;
pub mod postgres;

use {
    crate::domain::{
        error::PipelineError,
        notification::Credentials,
        ports::{BoxFuture, DirectorySync, MembershipService},
        transaction::CustomerDetails,
    },
    std::future::ready,
};

/// Stand-in for a collaborator whose URL is not configured. Every call fails
/// as a transient upstream error, so outbox jobs stay visible and retryable
/// until the service is wired up.
pub struct Unconfigured(pub &'static str);

impl Unconfigured {
    fn error<T: Send + 'static>(&self) -> BoxFuture<'_, Result<T, PipelineError>> {
        Box::pin(ready(Err(PipelineError::upstream(self.0, "not configured"))))
    }
}

impl MembershipService for Unconfigured {
    fn provision(&self, _user_id: &str) -> BoxFuture<'_, Result<(), PipelineError>> {
        self.error()
    }

    fn create_account(
        &self,
        _customer: &CustomerDetails,
    ) -> BoxFuture<'_, Result<Credentials, PipelineError>> {
        self.error()
    }
}

impl DirectorySync for Unconfigured {
    fn sync(&self, _user_id: &str) -> BoxFuture<'_, Result<(), PipelineError>> {
        self.error()
    }
}
