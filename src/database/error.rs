use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DatabaseError {
    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("INSUFFICIENT_FLOAT: {float_name} cannot go below zero")]
    InsufficientFloat { float_name: String },

    #[error("database failure: {message}")]
    Query { message: String, retryable: bool },
}

impl DatabaseError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound {
                entity: "row".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => DatabaseError::Query {
                message: err.to_string(),
                retryable: true,
            },
            other => DatabaseError::Query {
                message: other.to_string(),
                retryable: false,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Query { retryable: true, .. })
    }
}
