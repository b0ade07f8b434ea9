use std::collections::BTreeMap;

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use serde_json::json;

use crate::{models::Field, validators::RuleViolation};

pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// Field name to every message raised against it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// Records the violation under `field` and hands back the value on success.
    pub fn check<T>(&mut self, field: &str, result: Result<T, RuleViolation>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(violation) => {
                self.add(field, violation.to_string());
                None
            },
        }
    }

    /// Unwraps a body field. A mistyped value is recorded under `field`, as is a
    /// missing one when `required`.
    pub fn take<T>(&mut self, field: &str, value: Option<Field<T>>, required: bool) -> Option<T> {
        match value {
            Some(Field::Valid(value)) => Some(value),
            Some(Field::Invalid(message)) => {
                self.add(field, message);
                None
            },
            None if required => {
                self.add(field, "this field is required");
                None
            },
            None => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_result(self) -> AppResult<()> {
        if self.is_empty() { Ok(()) } else { Err(AppError::Validation(self)) }
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),
    #[error("not found")]
    NotFound,
    #[error("authentication credentials were not provided or are invalid")]
    Unauthenticated,
    #[error("you do not have permission to perform this action")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn field(field: &str, violation: RuleViolation) -> Self {
        Self::Validation(FieldErrors::single(field, violation.to_string()))
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => Self::Conflict(detail),
            _ => Self::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(FieldErrors::single(NON_FIELD_ERRORS, rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "unresolvable path");
        Self::NotFound
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(FieldErrors::single(NON_FIELD_ERRORS, rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, Json(errors)).into_response()
            },
            AppError::Conflict(detail) => {
                tracing::debug!(detail = %detail, "unique constraint rejected write");
                let message = "an object with these values already exists";
                let errors = FieldErrors::single(NON_FIELD_ERRORS, message);
                (StatusCode::BAD_REQUEST, Json(errors)).into_response()
            },
            AppError::NotFound => detail(StatusCode::NOT_FOUND, "not found"),
            AppError::Unauthenticated => detail(
                StatusCode::UNAUTHORIZED,
                "authentication credentials were not provided or are invalid",
            ),
            AppError::Forbidden => {
                detail(StatusCode::FORBIDDEN, "you do not have permission to perform this action")
            },
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                detail(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            },
        }
    }
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_field_error() {
        let mut errors = FieldErrors::new();
        assert_eq!(errors.check("score", Err::<i16, _>(RuleViolation::ScoreOutOfRange)), None);
        errors.add("text", "this field may not be blank");
        errors.add("score", "second");
        assert_eq!(errors.get("score").map(<[String]>::len), Some(2));
        assert_eq!(errors.get("text").map(<[String]>::len), Some(1));
        assert!(matches!(errors.into_result(), Err(AppError::Validation(_))));
    }

    #[test]
    fn take_reports_type_mismatch_and_missing_fields() {
        let mut errors = FieldErrors::new();
        assert_eq!(errors.take("score", Some(Field::Valid(7)), true), Some(7));
        let mistyped = Some(Field::Invalid("not a number".into()));
        assert_eq!(errors.take::<i64>("score", mistyped, true), None);
        assert_eq!(errors.take::<String>("text", None, true), None);
        assert_eq!(errors.take::<String>("bio", None, false), None);
        assert_eq!(errors.get("score"), Some(&["not a number".to_string()][..]));
        assert!(errors.get("text").is_some());
        assert!(errors.get("bio").is_none());
    }

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::NotFound, StatusCode::NOT_FOUND),
            (AppError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AppError::Forbidden, StatusCode::FORBIDDEN),
            (AppError::Conflict("user.email".into()), StatusCode::BAD_REQUEST),
            (AppError::field("year", RuleViolation::Blank), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
