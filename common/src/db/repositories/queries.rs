// SQL fragments shared by the PostgreSQL repositories

/// SQL query fragments for menu_entries table
pub mod menu_queries {
    pub const SELECT_ALL_COLUMNS: &str = "version, title, description, scraped_at, date_key";
}

/// SQL query fragments for notification_preferences table
pub mod preference_queries {
    pub const SELECT_ALL_COLUMNS: &str = r#"user_id, wants_notifications, window_start_minute,
        window_end_minute, weekday_mask, suppress_until"#;

    /// Rows that may receive automatic pushes today.
    ///
    /// Binds `$1` to today's weekday bit and `$2` to today's civil date.
    pub const ELIGIBLE_FILTER: &str = r#"wants_notifications
        AND (weekday_mask & $1) <> 0
        AND (suppress_until IS NULL OR suppress_until <> $2)"#;
}
