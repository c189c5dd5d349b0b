use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    application::{
        lifecycle::LifecycleError, messages::MessageError, repos::OutboxError,
        strategy::RefreshError,
    },
    cache::StoreError,
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic chain attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Error surfaced by the control endpoints, rendered as a JSON body.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let detail = self.report.messages.first().cloned().unwrap_or_default();
        let body = json!({ "error": self.public_message, "detail": detail });
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<MessageError> for HttpError {
    fn from(error: MessageError) -> Self {
        const SOURCE: &str = "infra::http::message_error_to_http_error";
        match &error {
            MessageError::UnknownType(_)
            | MessageError::MissingField { .. }
            | MessageError::InvalidUrl { .. }
            | MessageError::ForeignOrigin(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Message could not be processed",
                &error,
            ),
            MessageError::Store(_) | MessageError::Lifecycle(_) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Message handling failed",
                &error,
            ),
        }
    }
}

impl From<OutboxError> for HttpError {
    fn from(error: OutboxError) -> Self {
        const SOURCE: &str = "infra::http::outbox_error_to_http_error";
        let (status, message) = match &error {
            OutboxError::NotFound(_) => (StatusCode::NOT_FOUND, "Order not found"),
            OutboxError::Encode { .. } => (StatusCode::BAD_REQUEST, "Order could not be stored"),
            OutboxError::Persistence(_) => (StatusCode::SERVICE_UNAVAILABLE, "Outbox unavailable"),
        };
        HttpError::from_error(SOURCE, status, message, &error)
    }
}

impl From<RefreshError> for HttpError {
    fn from(error: RefreshError) -> Self {
        HttpError::from_error(
            "infra::http::refresh_error_to_http_error",
            StatusCode::BAD_GATEWAY,
            "Refresh failed",
            &error,
        )
    }
}

/// Top-level error for command execution in `main`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Outbox(OutboxError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            AppError::Outbox(_) | AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_)
            | AppError::Lifecycle(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Outbox(OutboxError::NotFound(_)) => "Order not found",
            AppError::Domain(_) => "Order is not in a state that allows this",
            AppError::Outbox(_) | AppError::Store(_) => "Storage temporarily unavailable",
            AppError::Lifecycle(_) => "Cache installation failed",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(_) => "I/O failure",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_message_maps_to_bad_request() {
        let error: HttpError = MessageError::UnknownType("reboot".to_string()).into();
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_order_maps_to_not_found() {
        let response = AppError::from(OutboxError::NotFound("ord_x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response.extensions().get::<ErrorReport>().expect("report attached");
        assert_eq!(report.source, "application::error::AppError");
    }
}
