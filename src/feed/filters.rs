//! Episode selection predicates.

use crate::config::FeedFilters;
use crate::model::Episode;
use chrono::Utc;
use regex::Regex;

/// Whether an episode passes every configured predicate.
///
/// Empty patterns accept everything. An unparsable pattern is logged and
/// skipped (configuration validation catches these up front, so this only
/// happens for records written by hand).
pub fn match_filters(episode: &Episode, filters: &FeedFilters) -> bool {
    if !matches_pattern(&filters.title, &episode.title, true) {
        return false;
    }
    if !matches_pattern(&filters.not_title, &episode.title, false) {
        return false;
    }
    if !matches_pattern(&filters.description, &episode.description, true) {
        return false;
    }
    if !matches_pattern(&filters.not_description, &episode.description, false) {
        return false;
    }

    if filters.min_duration > 0 && episode.duration < filters.min_duration {
        return false;
    }
    if filters.max_duration > 0 && episode.duration > filters.max_duration {
        return false;
    }

    let age_days = (Utc::now() - episode.pub_date).num_days();
    if filters.min_age > 0 && age_days < filters.min_age {
        return false;
    }
    if filters.max_age > 0 && age_days > filters.max_age {
        return false;
    }

    true
}

/// Evaluate one regex predicate; `want_match` flips it into a not-filter
fn matches_pattern(pattern: &str, text: &str, want_match: bool) -> bool {
    if pattern.is_empty() {
        return true;
    }

    match Regex::new(pattern) {
        Ok(regex) => regex.is_match(text) == want_match,
        Err(e) => {
            tracing::warn!(pattern, error = %e, "skipping unparsable filter pattern");
            true
        }
    }
}
