// Property-based tests for the window-open scheduler core

use chrono::{DateTime, NaiveDate, Utc};
use common::civil::CivilCalendar;
use common::db::{MemoryStore, PreferenceStore};
use common::models::NotificationPreference;
use common::scheduler::{ArmOutcome, WindowCursor};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn calendar() -> CivilCalendar {
    CivilCalendar::new(chrono_tz::Europe::Berlin)
}

fn monday_at(minute: u16) -> DateTime<Utc> {
    calendar().instant_at(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), minute)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Firing at every armed instant of a day notifies each listener exactly once
    #[test]
    fn property_each_window_opens_once_per_day(
        starts in prop::collection::vec(420u16..1200, 1..12),
    ) {
        runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            for (user_id, start) in starts.iter().enumerate() {
                let mut preference = NotificationPreference::default_for(user_id as i64);
                preference.window_start_minute = *start;
                preference.window_end_minute = *start;
                store.upsert_preference(&preference).await.unwrap();
            }

            let mut cursor = WindowCursor::new(store, calendar(), 2, monday_at(360));
            let mut notified: BTreeMap<i64, usize> = BTreeMap::new();
            let mut now = monday_at(360);

            loop {
                match cursor.arm(now).await {
                    ArmOutcome::Armed { fire_at, fallback: false, .. } => now = fire_at,
                    _ => break,
                }
                for user in cursor.fire(now).await.unwrap() {
                    *notified.entry(user).or_default() += 1;
                }
            }

            prop_assert_eq!(notified.len(), starts.len());
            prop_assert!(notified.values().all(|count| *count == 1));
            Ok(())
        })?;
    }
}
