//! Harvest coordinator: sessions → listings → bill tasks → store.
//!
//! Sessions run concurrently. Listing fetches and bill tasks share one
//! semaphore, so `workers` bounds the requests in flight across the
//! whole run. Every bill task ends in a [`TaskOutcome`]; nothing a task
//! does can abort its siblings or the run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use indicatif::ProgressBar;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HarvestConfig;
use crate::content::extract_bill_text;
use crate::error::{HarvesterError, Result};
use crate::http::{fetch_bill_page, HttpFetcher, PageSource, Politeness};
use crate::listing::{list_bill_urls, select_bill_references};
use crate::session::sessions;
use crate::store::{DocumentStore, WriteOutcome};
use crate::types::{
    BillReference, Disposition, HarvestSummary, Session, SessionFailure, TaskOutcome, TaskState,
};

/// Drives a complete harvest over the configured year range.
pub struct Harvester<S> {
    source: Arc<S>,
    store: DocumentStore,
    config: HarvestConfig,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl Harvester<HttpFetcher> {
    /// Harvester over HTTP with the store rooted at `config.data_dir`.
    ///
    /// The fetcher's retry backoff watches [`Self::cancellation_token`].
    pub fn from_config(config: HarvestConfig) -> Result<Self> {
        config.validate()?;
        let store = DocumentStore::open(&config.data_dir)?;
        let cancel = CancellationToken::new();
        let fetcher = HttpFetcher::from_config(&config)?.with_cancellation(cancel.clone());
        Ok(Self::new(fetcher, store, config).with_cancellation(cancel))
    }
}

impl<S: PageSource + 'static> Harvester<S> {
    pub fn new(source: S, store: DocumentStore, config: HarvestConfig) -> Self {
        Self {
            source: Arc::new(source),
            store,
            config,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Use an externally owned token, e.g. one wired to process signals.
    ///
    /// This governs dispatch only; a source that waits on its own (such as
    /// [`HttpFetcher`] backoff) needs the same token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report running counts on `bar`.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Harvest every session and wait for all dispatched tasks.
    ///
    /// Cancelling the token stops dispatch; tasks that already hold a
    /// worker slot finish, queued ones are reported as cancelled.
    pub async fn run(&self) -> HarvestSummary {
        let started = Instant::now();
        let mut summary = HarvestSummary::new(Utc::now());

        let ctx = Arc::new(RunContext {
            source: Arc::clone(&self.source),
            store: self.store.clone(),
            base_url: self.config.base_url.clone(),
            politeness: Politeness {
                min: self.config.delay_min,
                max: self.config.delay_max,
            },
            permits: Semaphore::new(self.config.workers.max(1)),
            cancel: self.cancel.clone(),
            progress: self.progress.clone().map(Progress::new),
        });

        let all_sessions = sessions(self.config.min_year, self.config.max_year);
        summary.sessions = all_sessions.len();
        tracing::info!(
            sessions = all_sessions.len(),
            workers = self.config.workers,
            data_dir = %self.store.root().display(),
            "starting harvest"
        );

        let handles: Vec<(Session, JoinHandle<SessionReport>)> = all_sessions
            .into_iter()
            .map(|session| {
                let ctx = Arc::clone(&ctx);
                (session, tokio::spawn(harvest_session(ctx, session)))
            })
            .collect();

        for (session, handle) in handles {
            match handle.await {
                Ok(report) => report.fold_into(&mut summary),
                Err(e) => {
                    tracing::error!(session = %session, error = %e, "session task did not complete");
                    summary.session_failures.push(SessionFailure::new(
                        session,
                        session.listing_url(&self.config.base_url),
                        &HarvesterError::TaskJoin(e),
                    ));
                }
            }
        }

        summary.finalize(started.elapsed());
        tracing::info!(
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            session_failures = summary.session_failures.len(),
            cancelled = summary.cancelled,
            cancelled_sessions = summary.cancelled_sessions.len(),
            duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            "harvest finished"
        );
        summary
    }
}

/// Shared, read-only state of one run.
struct RunContext<S> {
    source: Arc<S>,
    store: DocumentStore,
    base_url: String,
    politeness: Politeness,
    permits: Semaphore,
    cancel: CancellationToken,
    progress: Option<Progress>,
}

impl<S: PageSource + 'static> RunContext<S> {
    /// Wait for a worker slot; `None` once the run is cancelled.
    async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = self.permits.acquire() => permit.ok(),
        }
    }

    fn observe(&self, outcome: &TaskOutcome) {
        if let Some(progress) = &self.progress {
            progress.observe(&outcome.disposition);
        }
    }

    /// Fetch, extract and store one bill, converting any error into an outcome.
    async fn run_bill_task(&self, reference: BillReference) -> TaskOutcome {
        let Some(_permit) = self.acquire().await else {
            return TaskOutcome {
                reference,
                disposition: Disposition::Cancelled,
            };
        };

        let mut task = BillTask::new(&reference);
        let disposition = match self.process(&mut task).await {
            Ok(WriteOutcome::Written(path)) => {
                task.advance(TaskState::Done);
                tracing::debug!(path = %path.display(), "document written");
                Disposition::Written
            }
            Ok(WriteOutcome::AlreadyPresent(_)) => {
                task.advance(TaskState::Done);
                Disposition::AlreadyPresent
            }
            Err(HarvesterError::Cancelled { .. }) => {
                tracing::debug!(
                    session = %reference.session,
                    bill_id = %reference.bill_id,
                    state = task.state.as_str(),
                    "bill task cancelled"
                );
                Disposition::Cancelled
            }
            Err(e) => {
                tracing::warn!(
                    session = %reference.session,
                    bill_id = %reference.bill_id,
                    url = %reference.url,
                    state = task.state.as_str(),
                    kind = %e.kind(),
                    error = %e,
                    "bill task failed"
                );
                Disposition::Failed {
                    state: task.state,
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };

        let outcome = TaskOutcome {
            reference,
            disposition,
        };
        self.observe(&outcome);
        outcome
    }

    async fn process(&self, task: &mut BillTask<'_>) -> Result<WriteOutcome> {
        let reference = task.reference;

        task.advance(TaskState::Fetching);
        let page = fetch_bill_page(
            self.source.as_ref(),
            &reference.url,
            self.politeness,
            &self.cancel,
        )
        .await?;

        task.advance(TaskState::Extracting);
        let text = extract_bill_text(&page.body, &page.url)?;

        task.advance(TaskState::Storing);
        self.store
            .write(reference.session, &reference.bill_id, &text)
            .await
    }
}

/// Per-task state machine; transitions are logged at debug level.
struct BillTask<'a> {
    reference: &'a BillReference,
    state: TaskState,
}

impl<'a> BillTask<'a> {
    fn new(reference: &'a BillReference) -> Self {
        Self {
            reference,
            state: TaskState::Queued,
        }
    }

    fn advance(&mut self, next: TaskState) {
        debug_assert_eq!(
            self.state.successor(),
            Some(next),
            "illegal task transition"
        );
        tracing::debug!(
            session = %self.reference.session,
            bill_id = %self.reference.bill_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "task state"
        );
        self.state = next;
    }
}

/// Everything one session contributes to the summary.
struct SessionReport {
    session: Session,
    links_listed: usize,
    candidates: usize,
    outcomes: Vec<TaskOutcome>,
    failure: Option<SessionFailure>,
    /// Cancelled before its listing was fetched.
    cancelled: bool,
}

impl SessionReport {
    fn empty(session: Session) -> Self {
        Self {
            session,
            links_listed: 0,
            candidates: 0,
            outcomes: Vec::new(),
            failure: None,
            cancelled: false,
        }
    }

    fn failed(failure: SessionFailure) -> Self {
        let session = failure.session;
        Self {
            failure: Some(failure),
            ..Self::empty(session)
        }
    }

    fn cancelled(session: Session) -> Self {
        Self {
            cancelled: true,
            ..Self::empty(session)
        }
    }

    fn fold_into(self, summary: &mut HarvestSummary) {
        summary.links_listed += self.links_listed;
        summary.candidates += self.candidates;
        summary.session_failures.extend(self.failure);
        if self.cancelled {
            summary.cancelled_sessions.push(self.session);
        }
        for outcome in self.outcomes {
            summary.record(outcome);
        }
    }
}

async fn harvest_session<S: PageSource + 'static>(
    ctx: Arc<RunContext<S>>,
    session: Session,
) -> SessionReport {
    let listing_url = session.listing_url(&ctx.base_url);

    if let Err(e) = ctx.store.ensure_partition(session).await {
        tracing::error!(session = %session, error = %e, "cannot create session partition");
        return SessionReport::failed(SessionFailure::new(session, listing_url, &e));
    }

    let links = {
        let Some(_permit) = ctx.acquire().await else {
            tracing::info!(session = %session, "cancelled before listing fetch");
            return SessionReport::cancelled(session);
        };
        match list_bill_urls(ctx.source.as_ref(), session, &listing_url).await {
            Ok(links) => links,
            Err(HarvesterError::Cancelled { .. }) => {
                tracing::info!(session = %session, "cancelled during listing fetch");
                return SessionReport::cancelled(session);
            }
            Err(e) => {
                tracing::error!(session = %session, url = %listing_url, error = %e, "listing fetch failed");
                return SessionReport::failed(SessionFailure::new(session, listing_url, &e));
            }
        }
    };

    let references = select_bill_references(session, &ctx.base_url, &links);
    tracing::info!(
        session = %session,
        links = links.len(),
        candidates = references.len(),
        "listing fetched"
    );

    let mut report = SessionReport {
        links_listed: links.len(),
        candidates: references.len(),
        ..SessionReport::empty(session)
    };

    let mut handles: Vec<(BillReference, JoinHandle<TaskOutcome>)> = Vec::new();
    for reference in references {
        if ctx.cancel.is_cancelled() {
            report.outcomes.push(TaskOutcome {
                reference,
                disposition: Disposition::Cancelled,
            });
            continue;
        }

        if ctx.store.exists(session, &reference.bill_id).await {
            tracing::debug!(session = %session, bill_id = %reference.bill_id, "already stored, skipping");
            let outcome = TaskOutcome {
                reference,
                disposition: Disposition::AlreadyPresent,
            };
            ctx.observe(&outcome);
            report.outcomes.push(outcome);
            continue;
        }

        let task_ctx = Arc::clone(&ctx);
        let task_reference = reference.clone();
        let handle = tokio::spawn(async move { task_ctx.run_bill_task(task_reference).await });
        handles.push((reference, handle));
    }

    for (reference, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(session = %session, bill_id = %reference.bill_id, error = %e, "bill task did not complete");
                TaskOutcome::failed(reference, TaskState::Queued, &HarvesterError::TaskJoin(e))
            }
        };
        report.outcomes.push(outcome);
    }

    tracing::info!(session = %session, tasks = report.outcomes.len(), "session finished");
    report
}

/// Running counters shown on the progress bar.
struct Progress {
    bar: ProgressBar,
    written: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

impl Progress {
    fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            written: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn observe(&self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Written => &self.written,
            Disposition::AlreadyPresent => &self.skipped,
            Disposition::Failed { .. } => &self.failed,
            Disposition::Cancelled => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bar.set_message(format!(
            "{} written, {} skipped, {} failed",
            self.written.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::types::{BillId, RawPage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const BASE: &str = "https://leginfo.test";

    #[derive(Clone)]
    enum Reply {
        Page(String),
        NotFound,
    }

    /// In-memory page source that records every URL it is asked for.
    #[derive(Default)]
    struct FakeSource {
        pages: HashMap<String, Reply>,
        calls: Mutex<Vec<String>>,
        latency: Duration,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        /// Cancel the token once the n-th fetch has completed.
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl FakeSource {
        fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        fn cancel_after(mut self, fetches: usize, cancel: CancellationToken) -> Self {
            self.cancel_after = Some((fetches, cancel));
            self
        }

        fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), Reply::Page(body.to_string()));
            self
        }

        fn not_found(mut self, url: &str) -> Self {
            self.pages.insert(url.to_string(), Reply::NotFound);
            self
        }

        fn calls_to(&self, fragment: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.contains(fragment))
                .count()
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<RawPage> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(url.to_string());
                calls.len()
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some((after, cancel)) = &self.cancel_after {
                if call == *after {
                    cancel.cancel();
                }
            }

            match self.pages.get(url) {
                Some(Reply::Page(body)) => Ok(RawPage {
                    url: url.to_string(),
                    status: 200,
                    body: body.clone(),
                }),
                Some(Reply::NotFound) | None => Err(HarvesterError::PermanentFetch {
                    url: url.to_string(),
                    status: Some(404),
                    message: "Not Found".into(),
                }),
            }
        }
    }

    fn bill_url(id: &str) -> String {
        format!("{BASE}/faces/billTextClient.xhtml?bill_id={id}")
    }

    fn bill_page(text: &str) -> String {
        format!("<html><body><div id=\"content_main\">AB #DOCUMENTBill Start {text}</div></body></html>")
    }

    fn listing(hrefs: &[&str]) -> String {
        let links: String = hrefs
            .iter()
            .map(|h| format!("<a href=\"{h}\">link</a>"))
            .collect();
        format!("<html><body>{links}</body></html>")
    }

    fn config(data_dir: &TempDir) -> HarvestConfig {
        HarvestConfig::default()
            .with_years(2019, 2021)
            .with_workers(4)
            .with_delay(Duration::ZERO, Duration::ZERO)
            .with_data_dir(data_dir.path())
            .with_base_url(BASE)
    }

    fn harvester(source: FakeSource, data_dir: &TempDir) -> Harvester<FakeSource> {
        let config = config(data_dir);
        let store = DocumentStore::open(&config.data_dir).unwrap();
        Harvester::new(source, store, config)
    }

    fn listing_url() -> String {
        Session::starting(2019).listing_url(BASE)
    }

    #[tokio::test]
    async fn test_irrelevant_link_is_discarded() {
        let tmp = tempdir().unwrap();
        let source = FakeSource::default()
            .page(
                &listing_url(),
                &listing(&[
                    "/faces/billTextClient.xhtml?bill_id=AB-1",
                    "/faces/billSearchClient.xhtml",
                ]),
            )
            .page(&bill_url("AB-1"), &bill_page("An act to amend."));

        let harvester = harvester(source, &tmp);
        let summary = harvester.run().await;

        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.links_listed, 2);
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.written, 1);
        assert!(!summary.has_failures());
        assert_eq!(harvester.source.calls_to("bill_id="), 1);
        assert_eq!(harvester.source.calls.lock().unwrap().len(), 2);

        let stored = std::fs::read_to_string(tmp.path().join("20192020").join("AB-1.txt")).unwrap();
        assert_eq!(stored, "An act to amend.");
    }

    #[tokio::test]
    async fn test_existing_document_is_not_fetched() {
        let tmp = tempdir().unwrap();
        let source = FakeSource::default()
            .page(
                &listing_url(),
                &listing(&[
                    "/faces/billTextClient.xhtml?bill_id=AB-1",
                    "/faces/billTextClient.xhtml?bill_id=AB-2",
                ]),
            )
            .page(&bill_url("AB-1"), &bill_page("one"))
            .page(&bill_url("AB-2"), &bill_page("two"));

        let harvester = harvester(source, &tmp);
        harvester
            .store()
            .write(Session::starting(2019), &BillId::new("AB-1").unwrap(), "stored earlier")
            .await
            .unwrap();

        let summary = harvester.run().await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.written, 1);
        assert_eq!(harvester.source.calls_to("bill_id=AB-1"), 0);
        assert_eq!(harvester.source.calls_to("bill_id=AB-2"), 1);
    }

    #[tokio::test]
    async fn test_second_run_writes_nothing() {
        let tmp = tempdir().unwrap();
        let source = FakeSource::default()
            .page(
                &listing_url(),
                &listing(&[
                    "/faces/billTextClient.xhtml?bill_id=AB-1",
                    "/faces/billTextClient.xhtml?bill_id=AB-2",
                ]),
            )
            .page(&bill_url("AB-1"), &bill_page("one"))
            .page(&bill_url("AB-2"), &bill_page("two"));

        let harvester = harvester(source, &tmp);
        let first = harvester.run().await;
        let second = harvester.run().await;

        assert_eq!(first.written, 2);
        assert_eq!(second.written, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(harvester.source.calls_to("bill_id="), 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let tmp = tempdir().unwrap();
        let source = FakeSource::default()
            .page(
                &listing_url(),
                &listing(&[
                    "/faces/billTextClient.xhtml?bill_id=AB-1",
                    "/faces/billTextClient.xhtml?bill_id=AB-2",
                    "/faces/billTextClient.xhtml?bill_id=AB-3",
                    "/faces/billTextClient.xhtml?bill_id=AB-4",
                ]),
            )
            .page(&bill_url("AB-1"), &bill_page("one"))
            .not_found(&bill_url("AB-2"))
            .page(&bill_url("AB-3"), "<html><body>withdrawn</body></html>")
            .page(&bill_url("AB-4"), &bill_page("four"));

        let summary = harvester(source, &tmp).run().await;

        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed.len(), 2);

        let ab2 = &summary.failed[0];
        assert_eq!(ab2.bill_id.as_str(), "AB-2");
        assert_eq!(ab2.kind, FailureKind::PermanentFetchFailure);
        assert_eq!(ab2.state, TaskState::Fetching);

        let ab3 = &summary.failed[1];
        assert_eq!(ab3.bill_id.as_str(), "AB-3");
        assert_eq!(ab3.kind, FailureKind::AnchorNotFound);
        assert_eq!(ab3.state, TaskState::Extracting);
        assert_eq!(ab3.url, bill_url("AB-3"));
    }

    #[tokio::test]
    async fn test_listing_failure_does_not_stop_other_sessions() {
        let tmp = tempdir().unwrap();
        let ok_listing = Session::starting(2020).listing_url(BASE);
        let source = FakeSource::default()
            .not_found(&listing_url())
            .page(&ok_listing, &listing(&["/faces/billTextClient.xhtml?bill_id=SB-9"]))
            .page(&bill_url("SB-9"), &bill_page("nine"));

        let harvester = Harvester::new(
            source,
            DocumentStore::open(tmp.path()).unwrap(),
            config(&tmp).with_years(2019, 2022),
        );
        let summary = harvester.run().await;

        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.session_failures.len(), 1);
        assert_eq!(summary.session_failures[0].session, Session::starting(2019));
        assert_eq!(summary.session_failures[0].kind, FailureKind::ListingFetchFailure);
        assert!(tmp.path().join("20202021").join("SB-9.txt").is_file());
    }

    #[tokio::test]
    async fn test_empty_listing_is_not_a_failure() {
        let tmp = tempdir().unwrap();
        let source = FakeSource::default().page(&listing_url(), "<html><body></body></html>");

        let summary = harvester(source, &tmp).run().await;

        assert_eq!(summary.candidates, 0);
        assert!(!summary.has_failures());
        assert!(tmp.path().join("20192020").is_dir());
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let tmp = tempdir().unwrap();
        let source = FakeSource::default()
            .page(&listing_url(), &listing(&["/faces/billTextClient.xhtml?bill_id=AB-1"]))
            .page(&bill_url("AB-1"), &bill_page("one"));

        let harvester = harvester(source, &tmp);
        harvester.cancellation_token().cancel();
        let summary = harvester.run().await;

        assert_eq!(summary.written, 0);
        assert!(!summary.has_failures());
        assert!(summary.is_interrupted());
        assert_eq!(summary.cancelled_sessions, vec![Session::starting(2019)]);
        assert!(harvester.source.calls.lock().unwrap().is_empty());
    }

    /// Listing with `per_session` bills for every session in `min..max`.
    fn multi_session_source(min_year: u32, max_year: u32, per_session: usize) -> FakeSource {
        let mut source = FakeSource::default();
        for session in sessions(min_year, max_year) {
            let ids: Vec<String> = (1..=per_session).map(|n| format!("{session}AB{n}")).collect();
            let hrefs: Vec<String> = ids
                .iter()
                .map(|id| format!("/faces/billTextClient.xhtml?bill_id={id}"))
                .collect();
            let href_refs: Vec<&str> = hrefs.iter().map(String::as_str).collect();
            source = source.page(&session.listing_url(BASE), &listing(&href_refs));
            for id in &ids {
                source = source.page(&bill_url(id), &bill_page(id));
            }
        }
        source
    }

    #[tokio::test]
    async fn test_workers_bound_requests_across_sessions() {
        let tmp = tempdir().unwrap();
        let source = multi_session_source(2010, 2016, 3).with_latency(Duration::from_millis(5));

        let harvester = Harvester::new(
            source,
            DocumentStore::open(tmp.path()).unwrap(),
            config(&tmp).with_years(2010, 2016).with_workers(3),
        );
        let summary = harvester.run().await;

        assert_eq!(summary.sessions, 5);
        assert_eq!(summary.written, 15);
        let peak = harvester.source.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight fetches was {peak}");
        assert!(peak > 1, "fetches never overlapped");
    }

    #[tokio::test]
    async fn test_cancel_mid_session_finishes_in_flight_task() {
        let tmp = tempdir().unwrap();
        let cancel = CancellationToken::new();
        // Fetch 1 is the listing, fetch 2 the first bill
        let source = multi_session_source(2019, 2021, 3).cancel_after(2, cancel.clone());

        let harvester = Harvester::new(
            source,
            DocumentStore::open(tmp.path()).unwrap(),
            config(&tmp).with_workers(1),
        )
        .with_cancellation(cancel);
        let summary = harvester.run().await;

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.cancelled, 2);
        assert!(summary.cancelled_sessions.is_empty());
        assert!(summary.is_interrupted());
        assert!(!summary.has_failures());
        assert_eq!(harvester.source.calls_to("bill_id="), 1);
        assert_eq!(
            std::fs::read_dir(tmp.path().join("20192020")).unwrap().count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_mid_run_reports_unlisted_sessions() {
        let tmp = tempdir().unwrap();
        let cancel = CancellationToken::new();
        let source = multi_session_source(2000, 2010, 2).cancel_after(2, cancel.clone());

        let harvester = Harvester::new(
            source,
            DocumentStore::open(tmp.path()).unwrap(),
            config(&tmp).with_years(2000, 2010).with_workers(3),
        )
        .with_cancellation(cancel);
        let summary = harvester.run().await;

        let listings_fetched = harvester.source.calls_to("session_year=");
        assert_eq!(summary.sessions, 9);
        assert!(!summary.cancelled_sessions.is_empty());
        assert_eq!(summary.cancelled_sessions.len() + listings_fetched, 9);
        assert!(summary.is_interrupted());
        assert!(!summary.has_failures());
        assert_eq!(summary.written, harvester.source.calls_to("bill_id="));
        assert_eq!(summary.written + summary.cancelled, summary.candidates);
    }

    #[tokio::test]
    async fn test_duplicate_links_fetch_once() {
        let tmp = tempdir().unwrap();
        let source = FakeSource::default()
            .page(
                &listing_url(),
                &listing(&[
                    "/faces/billTextClient.xhtml?bill_id=AB-1",
                    "/faces/billTextClient.xhtml?bill_id=AB-1",
                ]),
            )
            .page(&bill_url("AB-1"), &bill_page("one"));

        let harvester = harvester(source, &tmp);
        let summary = harvester.run().await;

        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.written, 1);
        assert_eq!(harvester.source.calls_to("bill_id=AB-1"), 1);
    }
}
