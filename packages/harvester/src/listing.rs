//! Session listing pages: link scraping and bill candidate selection.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::config::resolve_href;
use crate::error::{HarvesterError, Result};
use crate::http::PageSource;
use crate::types::{BillId, BillReference, Session};

#[allow(clippy::expect_used)] // Static selector that is guaranteed to be valid
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Every `href` on the page, in document order, unfiltered.
#[must_use]
pub fn extract_links(markup: &str) -> Vec<String> {
    let document = Html::parse_document(markup);
    document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Fetch a listing page and return all of its link targets.
///
/// An empty vector means the page was fetched and had no links; a
/// failed fetch is reported as `ListingFetch`. `Cancelled` passes
/// through unwrapped.
pub async fn list_bill_urls<S: PageSource + ?Sized>(
    source: &S,
    session: Session,
    listing_url: &str,
) -> Result<Vec<String>> {
    let page = source
        .fetch(listing_url)
        .await
        .map_err(|e| match e {
            HarvesterError::Cancelled { .. } => e,
            other => HarvesterError::ListingFetch {
                session: session.id(),
                source: Box::new(other),
            },
        })?;
    Ok(extract_links(&page.body))
}

/// Turn raw listing links into bill references.
///
/// Links without a usable `bill_id=` are dropped. Repeated ids keep
/// their first occurrence.
pub fn select_bill_references(
    session: Session,
    base_url: &str,
    links: &[String],
) -> Vec<BillReference> {
    let mut seen: HashSet<BillId> = HashSet::new();
    let mut references = Vec::new();

    for href in links {
        let Some(bill_id) = BillId::from_href(href) else {
            tracing::trace!(session = %session, href = %href, "not a bill link");
            continue;
        };
        if !seen.insert(bill_id.clone()) {
            continue;
        }
        match resolve_href(base_url, href) {
            Ok(url) => references.push(BillReference {
                session,
                bill_id,
                url,
            }),
            Err(e) => {
                tracing::debug!(session = %session, href = %href, error = %e, "dropping unresolvable bill link");
            }
        }
    }

    references
}
