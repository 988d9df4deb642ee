//! Core data types for the harvester.
//!
//! A [`Session`] partitions storage and parameterizes listing URLs, a
//! [`BillId`] names one stored document, and [`TaskOutcome`] records
//! where each bill task ended up.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::config::{is_valid_bill_id, listing_url, validate_session_id, BILL_ID_PARAM};
use crate::error::{FailureKind, HarvesterError, Result};

/// A two-year legislative session, e.g. `20192020`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Session {
    first_year: u32,
}

impl Session {
    /// Session starting in `first_year`.
    #[must_use]
    pub fn starting(first_year: u32) -> Self {
        Self { first_year }
    }

    #[must_use]
    pub fn first_year(&self) -> u32 {
        self.first_year
    }

    #[must_use]
    pub fn second_year(&self) -> u32 {
        self.first_year + 1
    }

    /// Identifier used in listing URLs and as the partition name.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}{}", self.first_year, self.second_year())
    }

    /// Listing page URL for this session under `base_url`.
    #[must_use]
    pub fn listing_url(&self, base_url: &str) -> String {
        listing_url(base_url, &self.id())
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.first_year, self.second_year())
    }
}

impl std::str::FromStr for Session {
    type Err = HarvesterError;

    fn from_str(s: &str) -> Result<Self> {
        validate_session_id(s)?;
        let first_year = s[..4]
            .parse()
            .map_err(|_| HarvesterError::InvalidSessionId(s.to_string()))?;
        Ok(Self::starting(first_year))
    }
}

impl Serialize for Session {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Canonical bill identifier, derived from the `bill_id=` query value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BillId(String);

impl BillId {
    /// Validate and wrap a raw identifier.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        is_valid_bill_id(raw).then(|| Self(raw.to_string()))
    }

    /// Derive the identifier from a listing href.
    ///
    /// Returns `None` for links without `bill_id=` and for values that
    /// are not usable as file names; both are non-candidates.
    ///
    /// # Examples
    /// ```
    /// use leginfo_harvester::types::BillId;
    ///
    /// let id = BillId::from_href("/faces/billNavClient.xhtml?bill_id=201920200AB1").unwrap();
    /// assert_eq!(id.as_str(), "201920200AB1");
    /// assert!(BillId::from_href("/faces/home.xhtml").is_none());
    /// ```
    #[must_use]
    pub fn from_href(href: &str) -> Option<Self> {
        let start = href.find(BILL_ID_PARAM)? + BILL_ID_PARAM.len();
        let rest = &href[start..];
        let end = rest.find(&['&', '#'][..]).unwrap_or(rest.len());
        Self::new(&rest[..end])
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A candidate bill link taken from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillReference {
    pub session: Session,
    pub bill_id: BillId,
    /// Absolute URL of the bill detail page.
    pub url: String,
}

/// Raw response of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Lifecycle of a single bill task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Fetching,
    Extracting,
    Storing,
    Done,
    Failed,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Next state on the success path, `None` once terminal.
    #[must_use]
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Queued => Some(Self::Fetching),
            Self::Fetching => Some(Self::Extracting),
            Self::Extracting => Some(Self::Storing),
            Self::Storing => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Storing => "storing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// How a bill's processing ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Fetched, extracted and written.
    Written,
    /// Already in the store before dispatch, or written by a concurrent task.
    AlreadyPresent,
    /// Reached `Failed` while in `state`.
    Failed {
        state: TaskState,
        kind: FailureKind,
        message: String,
    },
    /// Stopped by cancellation, either still `Queued` or while waiting to
    /// retry a fetch.
    Cancelled,
}

/// Outcome record produced at the boundary of every bill task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub reference: BillReference,
    pub disposition: Disposition,
}

impl TaskOutcome {
    pub fn failed(reference: BillReference, state: TaskState, error: &HarvesterError) -> Self {
        Self {
            reference,
            disposition: Disposition::Failed {
                state,
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }
}

/// A failed bill task, as listed in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub session: Session,
    pub bill_id: BillId,
    pub url: String,
    pub kind: FailureKind,
    pub state: TaskState,
    pub message: String,
}

/// A session that produced no tasks because its partition or listing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub session: Session,
    pub url: String,
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(session: Session, url: impl Into<String>, error: &HarvesterError) -> Self {
        Self {
            session,
            url: url.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Aggregate result of one harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestSummary {
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub sessions: usize,
    pub links_listed: usize,
    pub candidates: usize,
    pub written: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Sessions whose listing was never fetched because the run was cancelled.
    pub cancelled_sessions: Vec<Session>,
    pub failed: Vec<FailedTask>,
    pub session_failures: Vec<SessionFailure>,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl HarvestSummary {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration: Duration::ZERO,
            sessions: 0,
            links_listed: 0,
            candidates: 0,
            written: 0,
            skipped: 0,
            cancelled: 0,
            cancelled_sessions: Vec::new(),
            failed: Vec::new(),
            session_failures: Vec::new(),
        }
    }

    /// Fold one task outcome into the counters.
    pub fn record(&mut self, outcome: TaskOutcome) {
        match outcome.disposition {
            Disposition::Written => self.written += 1,
            Disposition::AlreadyPresent => self.skipped += 1,
            Disposition::Cancelled => self.cancelled += 1,
            Disposition::Failed {
                state,
                kind,
                message,
            } => self.failed.push(FailedTask {
                session: outcome.reference.session,
                bill_id: outcome.reference.bill_id,
                url: outcome.reference.url,
                kind,
                state,
                message,
            }),
        }
    }

    /// Sort failure lists so output does not depend on completion order.
    pub fn finalize(&mut self, duration: Duration) {
        self.duration = duration;
        self.failed
            .sort_by(|a, b| (a.session, &a.bill_id).cmp(&(b.session, &b.bill_id)));
        self.session_failures.sort_by_key(|f| f.session);
        self.cancelled_sessions.sort();
    }

    /// True when any bill task or session failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.session_failures.is_empty()
    }

    /// True when cancellation left bills or whole sessions unharvested.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.cancelled > 0 || !self.cancelled_sessions.is_empty()
    }

    /// Serialize as a YAML document.
    pub fn to_yaml(&self) -> Result<String> {
        let yaml = serde_yaml_ng::to_string(self)?;
        Ok(format!("---\n{yaml}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reference(id: &str) -> BillReference {
        BillReference {
            session: Session::starting(2019),
            bill_id: BillId::new(id).unwrap(),
            url: format!("https://leginfo.legislature.ca.gov/faces/billTextClient.xhtml?bill_id={id}"),
        }
    }

    #[test]
    fn test_session_id_and_display() {
        let session = Session::starting(1999);
        assert_eq!(session.id(), "19992000");
        assert_eq!(session.to_string(), "19992000");
        assert_eq!(session.second_year(), 2000);
    }

    #[test]
    fn test_session_from_str() {
        let session: Session = "20192020".parse().unwrap();
        assert_eq!(session, Session::starting(2019));
        assert!("20192022".parse::<Session>().is_err());
    }

    #[test]
    fn test_bill_id_from_href_stops_at_next_param() {
        let id = BillId::from_href("billNavClient.xhtml?bill_id=201920200AB1&version=2").unwrap();
        assert_eq!(id.as_str(), "201920200AB1");

        let id = BillId::from_href("billNavClient.xhtml?bill_id=201920200SB5#top").unwrap();
        assert_eq!(id.as_str(), "201920200SB5");
    }

    #[test]
    fn test_bill_id_from_href_rejects_unsafe_values() {
        assert!(BillId::from_href("x?bill_id=").is_none());
        assert!(BillId::from_href("x?bill_id=../../passwd").is_none());
        assert!(BillId::from_href("x?bill_id=a%2Fb").is_none());
    }

    #[test]
    fn test_same_query_value_yields_same_id() {
        let a = BillId::from_href("/faces/billNavClient.xhtml?bill_id=201920200AB1");
        let b = BillId::from_href("https://leginfo.legislature.ca.gov/faces/billTextClient.xhtml?bill_id=201920200AB1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Storing.is_terminal());
    }

    #[test]
    fn test_task_state_success_path() {
        let mut state = TaskState::Queued;
        let mut path = vec![state];
        while let Some(next) = state.successor() {
            path.push(next);
            state = next;
        }
        assert_eq!(
            path,
            vec![
                TaskState::Queued,
                TaskState::Fetching,
                TaskState::Extracting,
                TaskState::Storing,
                TaskState::Done,
            ]
        );
        assert_eq!(TaskState::Failed.successor(), None);
    }

    #[test]
    fn test_summary_records_and_sorts() {
        let mut summary = HarvestSummary::new(Utc::now());
        summary.record(TaskOutcome {
            reference: reference("SB2"),
            disposition: Disposition::Failed {
                state: TaskState::Extracting,
                kind: FailureKind::MarkerNotFound,
                message: "no marker".into(),
            },
        });
        summary.record(TaskOutcome {
            reference: reference("AB1"),
            disposition: Disposition::Failed {
                state: TaskState::Fetching,
                kind: FailureKind::PermanentFetchFailure,
                message: "404".into(),
            },
        });
        summary.record(TaskOutcome {
            reference: reference("AB3"),
            disposition: Disposition::Written,
        });
        summary.record(TaskOutcome {
            reference: reference("AB4"),
            disposition: Disposition::AlreadyPresent,
        });
        summary.finalize(Duration::from_secs(2));

        assert_eq!(summary.written, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.has_failures());
        let ids: Vec<&str> = summary.failed.iter().map(|f| f.bill_id.as_str()).collect();
        assert_eq!(ids, vec!["AB1", "SB2"]);
    }

    #[test]
    fn test_summary_interrupted_by_cancelled_session_alone() {
        let mut summary = HarvestSummary::new(Utc::now());
        summary.cancelled_sessions.push(Session::starting(2020));
        summary.cancelled_sessions.push(Session::starting(2019));
        summary.finalize(Duration::from_secs(1));

        assert!(summary.is_interrupted());
        assert!(!summary.has_failures());
        assert_eq!(
            summary.cancelled_sessions,
            vec![Session::starting(2019), Session::starting(2020)]
        );
    }

    #[test]
    fn test_summary_yaml() {
        let mut summary = HarvestSummary::new(Utc::now());
        summary.sessions = 1;
        summary.record(TaskOutcome::failed(
            reference("AB1"),
            TaskState::Fetching,
            &HarvesterError::PermanentFetch {
                url: "u".into(),
                status: Some(404),
                message: "Not Found".into(),
            },
        ));
        let yaml = summary.to_yaml().unwrap();
        assert!(!summary.is_interrupted());

        assert!(yaml.starts_with("---\n"));
        assert!(yaml.contains("session: '20192020'") || yaml.contains("session: \"20192020\""));
        assert!(yaml.contains("kind: permanent_fetch_failure"));
        assert!(yaml.contains("state: fetching"));
    }
}
