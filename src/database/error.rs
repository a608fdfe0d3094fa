use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    ConnectionError { message: String },
    NotFound { entity: String, id: String },
    /// A unique constraint rejected the write (e.g. a provider transaction
    /// id already owned by another payment).
    UniqueViolation { constraint: String },
    QueryError { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::UniqueViolation {
            constraint: constraint.into(),
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError { .. })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().unwrap_or("unique").to_string(),
                }
            }
            sqlx::Error::Database(db) => DatabaseErrorKind::QueryError {
                message: db.message().to_string(),
            },
            _ => DatabaseErrorKind::Unknown {
                message: err.to_string(),
            },
        };
        Self { kind }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DatabaseErrorKind::ConnectionError { message } => {
                write!(f, "database connection error: {}", message)
            }
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => {
                write!(f, "unique constraint violated: {}", constraint)
            }
            DatabaseErrorKind::QueryError { message } => write!(f, "query failed: {}", message),
            DatabaseErrorKind::Unknown { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: entity.clone(),
                    id: id.clone(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let app: AppError = DatabaseError::not_found("Investment", "abc").into();
        assert_eq!(app.status_code(), 404);
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::ConnectionError {
            message: "reset".to_string(),
        });
        assert!(err.is_retryable());
        let app: AppError = err.into();
        assert_eq!(app.status_code(), 500);
        assert!(app.is_retryable());
    }
}
