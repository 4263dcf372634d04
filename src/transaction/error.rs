use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("{statement} failed: {message}")]
    Statement { statement: String, message: String },

    #[error("Transactional store unavailable: {0}")]
    Unavailable(String),
}

impl TransactionError {
    pub fn statement(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Statement {
            statement: statement.into(),
            message: message.into(),
        }
    }
}
