//! Enumeration of legislative sessions from a year range.

use crate::types::Session;

/// Sessions covering `min_year..max_year`.
///
/// One session starts at every year from `min_year` through
/// `max_year - 2`; `max_year` itself never starts or ends a session.
/// An inverted or too-narrow range yields nothing.
///
/// # Examples
/// ```
/// use leginfo_harvester::session::sessions;
///
/// let ids: Vec<String> = sessions(2017, 2021).iter().map(|s| s.id()).collect();
/// assert_eq!(ids, ["20172018", "20182019", "20192020"]);
/// assert!(sessions(2020, 2021).is_empty());
/// ```
#[must_use]
pub fn sessions(min_year: u32, max_year: u32) -> Vec<Session> {
    (min_year..max_year.saturating_sub(1))
        .map(Session::starting)
        .collect()
}
