// Error types for the scrape-diff-notify pipeline

use thiserror::Error;

/// Menu feed errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed request failed: {0}")]
    RequestFailed(String),

    #[error("Feed returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Feed document could not be decoded: {0}")]
    DecodeFailed(String),

    #[error("Feed reported an unsuccessful response")]
    Unsuccessful,
}

/// Database errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Outbound message channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Message request failed: {0}")]
    RequestFailed(String),

    #[error("Message rejected by channel (status {status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Validation errors for user-supplied preferences
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Minute of day out of range: {0}")]
    MinuteOutOfRange(u16),

    #[error("Window start {start} is after window end {end}")]
    InvertedWindow { start: u16, end: u16 },

    #[error("Weekday mask {0:#09b} uses bits outside Monday..Friday")]
    InvalidWeekdayMask(u8),

    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),
}

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No next execution time available for {schedule_type} schedule")]
    NoNextExecution { schedule_type: String },

    #[error("Window-open scheduler is not running")]
    SchedulerStopped,
}

/// Errors surfaced by the notifier service facade
#[derive(Error, Debug)]
pub enum NotifierError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Migrate(e) => DatabaseError::MigrationFailed(e.to_string()),
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::DecodeFailed(err.to_string())
        } else {
            FeedError::RequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::DecodeFailed(err.to_string())
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::RequestFailed(err.to_string())
    }
}
