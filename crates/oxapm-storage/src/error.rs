/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use oxapm_storage::error::StorageError;
///
/// let err = StorageError::InvalidValue {
///     column: "system",
///     value: "mainframe".to_string(),
/// };
/// assert!(err.to_string().contains("mainframe"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// JSON serialization or deserialization failure of a `*_json` column.
    #[error("Storage: JSON error in column '{column}': {source}")]
    Json {
        column: &'static str,
        source: serde_json::Error,
    },

    /// A text column held a value outside its enumerated domain.
    #[error("Storage: invalid value in column '{column}': {value}")]
    InvalidValue { column: &'static str, value: String },
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
