// Menu freshness detection
//
// Compares a freshly scraped menu with the latest stored snapshot as a
// multiset of (title, description, date) triples. Identical dishes can be
// served in several slots on the same day, so counts matter.

use crate::models::{MenuEntry, MenuItem};

/// Returns true when `scraped` differs from `stored`.
///
/// Every scraped item must consume a distinct stored partner with the same
/// title, description and date, and no stored entry may be left over.
pub fn menu_has_changed(scraped: &[MenuItem], stored: &[MenuEntry]) -> bool {
    if scraped.len() != stored.len() {
        return true;
    }

    // Quadratic, but a day has a handful of dishes.
    let mut pool: Vec<&MenuEntry> = stored.iter().collect();
    for item in scraped {
        let partner = pool.iter().position(|entry| {
            entry.title == item.title
                && entry.description == item.description
                && entry.date_key == item.source_date
        });
        match partner {
            Some(index) => {
                pool.swap_remove(index);
            }
            None => return true,
        }
    }

    !pool.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn item(title: &str, description: &str) -> MenuItem {
        MenuItem {
            title: title.to_string(),
            description: description.to_string(),
            source_date: day(),
        }
    }

    fn entry(title: &str, description: &str) -> MenuEntry {
        MenuEntry::from_item(0, &item(title, description), Utc::now())
    }

    #[test]
    fn test_identical_menu_is_unchanged() {
        let scraped = vec![item("A", "1"), item("B", "2")];
        let stored = vec![entry("B", "2"), entry("A", "1")];
        assert!(!menu_has_changed(&scraped, &stored));
    }

    #[test]
    fn test_empty_menus_are_unchanged() {
        assert!(!menu_has_changed(&[], &[]));
    }

    #[test]
    fn test_nothing_stored_is_changed() {
        assert!(menu_has_changed(&[item("A", "1")], &[]));
    }

    #[test]
    fn test_duplicate_count_matters() {
        let stored = vec![entry("A", "1"), entry("A", "1"), entry("B", "2")];
        let scraped = vec![item("A", "1"), item("B", "2")];
        assert!(menu_has_changed(&scraped, &stored));
    }

    #[test]
    fn test_same_length_different_multiplicity() {
        let stored = vec![entry("A", "1"), entry("A", "1"), entry("B", "2")];
        let scraped = vec![item("A", "1"), item("B", "2"), item("B", "2")];
        assert!(menu_has_changed(&scraped, &stored));
    }

    #[test]
    fn test_description_change_is_detected() {
        let stored = vec![entry("A", "1"), entry("B", "2")];
        let scraped = vec![item("A", "1"), item("B", "3")];
        assert!(menu_has_changed(&scraped, &stored));
    }

    #[test]
    fn test_date_change_is_detected() {
        let stored = vec![entry("A", "1")];
        let mut moved = item("A", "1");
        moved.source_date = day().succ_opt().unwrap();
        assert!(menu_has_changed(&[moved], &stored));
    }
}
