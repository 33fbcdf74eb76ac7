use thiserror::Error;

pub type Result<T> = std::result::Result<T, MilestoneError>;

#[derive(Debug, Error)]
pub enum MilestoneError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("The milestone you have provided is not valid: {0}")]
    InvalidMilestone(String),

    #[error("The milestone relationship type you have provided is not valid: {0}")]
    InvalidRelationshipType(String),

    #[error("The course key you have provided is not valid: {0}")]
    InvalidCourseKey(String),

    #[error("The content key you have provided is not valid: {0}")]
    InvalidContentKey(String),

    #[error("The user you have provided is not valid: {0}")]
    InvalidUser(String),

    #[error("Schema error: {0}")]
    Schema(String),
}

impl MilestoneError {
    /// True for errors caused by the caller's input rather than the store.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MilestoneError::InvalidMilestone(_)
                | MilestoneError::InvalidRelationshipType(_)
                | MilestoneError::InvalidCourseKey(_)
                | MilestoneError::InvalidContentKey(_)
                | MilestoneError::InvalidUser(_)
        )
    }
}
