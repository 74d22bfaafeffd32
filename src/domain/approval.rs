use super::transaction::{ApprovalStatus, Environment};

/// Server-side policy inputs. Built once from configuration; the manual
/// approval flag may be refreshed from the settings store per decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub environment: Environment,
    pub manual_approval: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub status: ApprovalStatus,
    /// Environment stamped on the ledger row: always the server's.
    pub environment: Environment,
    /// The caller claimed production while this server is not.
    pub spoof_attempt: bool,
}

/// | server      | manual approval | result        |
/// |-------------|-----------------|---------------|
/// | production  | off             | auto_approved |
/// | production  | on              | pending       |
/// | other       | any             | pending       |
///
/// `claimed` is whatever the client said about its origin. It never widens
/// the outcome; it only feeds the spoofing alert.
pub fn decide(policy: &PolicyConfig, claimed: Option<Environment>) -> ApprovalDecision {
    let status = match (policy.environment, policy.manual_approval) {
        (Environment::Production, false) => ApprovalStatus::AutoApproved,
        (Environment::Production, true) => ApprovalStatus::Pending,
        (Environment::Development, _) => ApprovalStatus::Pending,
    };

    let spoof_attempt = policy.environment != Environment::Production
        && claimed == Some(Environment::Production);
    if spoof_attempt {
        tracing::warn!(
            security = true,
            server_environment = %policy.environment,
            "request claimed production on a non-production server, forcing pending approval"
        );
    }

    ApprovalDecision {
        status,
        environment: policy.environment,
        spoof_attempt,
    }
}
