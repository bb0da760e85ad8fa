use thiserror::Error;

/// Failures surfaced to the client through the auth ack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Use 3-20 lowercase letters, numbers or underscores for the username.")]
    UsernameInvalid,
    #[error("Password must be at least 4 characters.")]
    PasswordTooShort,
    #[error("Password must be at most 80 characters.")]
    PasswordTooLong,
    #[error("Username already taken.")]
    UsernameTaken,
    /// Covers both unknown usernames and wrong passwords
    #[error("Invalid credentials.")]
    InvalidCredentials,
    #[error("Server error. Try again.")]
    Internal,
}

/// Durable write or read failure. Never fatal; state stays in memory.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare data directory: {0}")]
    DataDir(#[source] std::io::Error),
}
