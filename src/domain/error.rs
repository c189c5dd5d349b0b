use thiserror::Error;

use super::types::OutboxStatus;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("outbox item `{id}` cannot {action} from `{}`", from.as_str())]
    InvalidTransition {
        id: String,
        action: &'static str,
        from: OutboxStatus,
    },
}

impl DomainError {
    pub fn invalid_transition(id: &str, action: &'static str, from: OutboxStatus) -> Self {
        Self::InvalidTransition {
            id: id.to_string(),
            action,
            from,
        }
    }
}
