use regex::Regex;

use crate::model::Role;

pub const RESERVATION_PREFIX: &str = "R";
const FACILITY_FALLBACK_PREFIX: &str = "F";
const FACILITY_PREFIX_MAX_LETTERS: usize = 3;

/// Prefix for a role name from the fixed table; unknown roles get `U`.
pub fn prefix_for_role(role_name: &str) -> &'static str {
    Role::from_name(role_name).id_prefix()
}

/// `prefix-NNN` with NNN one past the highest suffix among `existing` ids that carry
/// this exact prefix. Starts at `prefix-001`.
pub fn next_id<'a, I>(prefix: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    // Prefixes are ASCII letters, but escape anyway so a stray `.` can't widen the match.
    let pattern = Regex::new(&format!(r"^{}-(\d+)$", regex::escape(prefix)))
        .unwrap_or_else(|_| unreachable!("escaped prefix is a valid pattern"));
    let max = existing
        .into_iter()
        .filter_map(|id| pattern.captures(id))
        .filter_map(|caps| caps[1].parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{prefix}-{:03}", max + 1)
}

/// Uppercase initials of the name's words (at most three), e.g. "Palma Hall" -> "PH".
pub fn facility_prefix(name: &str) -> String {
    let initials: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().find(|c| c.is_ascii_alphabetic()))
        .map(|c| c.to_ascii_uppercase())
        .take(FACILITY_PREFIX_MAX_LETTERS)
        .collect();
    if initials.is_empty() {
        FACILITY_FALLBACK_PREFIX.to_string()
    } else {
        initials
    }
}
