//! Bill text extraction from bill detail pages.
//!
//! The text lives inside the `#content_main` region. The rendered text of
//! that region carries a `#DOCUMENTBill Start` marker right before the
//! bill body; everything after the marker is the document.

use std::sync::LazyLock;

use scraper::{Html, Selector};

use crate::error::{HarvesterError, Result};

/// Element id of the main document body.
pub const CONTENT_ANCHOR_ID: &str = "content_main";

/// Literal emitted by the source renderer before the bill text.
pub const BILL_START_MARKER: &str = "#DOCUMENTBill Start";

#[allow(clippy::expect_used)] // Static selector that is guaranteed to be valid
static CONTENT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#content_main").expect("valid selector"));

/// Extract the cleaned bill text from a bill detail page.
///
/// `url` is only used for error context.
///
/// # Errors
/// * `AnchorNotFound` if the page has no `#content_main` element
/// * `MarkerNotFound` if the region lacks the bill-start marker
///
/// # Examples
/// ```
/// use leginfo_harvester::content::extract_bill_text;
///
/// let html = r#"<div id="content_main">#DOCUMENTBill Start
///   An act to add Section 1 to the Civil Code.  </div>"#;
/// let text = extract_bill_text(html, "https://example.com").unwrap();
/// assert_eq!(text, "An act to add Section 1 to the Civil Code.");
/// ```
pub fn extract_bill_text(markup: &str, url: &str) -> Result<String> {
    let region = content_region_text(markup).ok_or_else(|| HarvesterError::AnchorNotFound {
        url: url.to_string(),
    })?;
    text_after_marker(&region)
        .map(str::to_string)
        .ok_or_else(|| HarvesterError::MarkerNotFound {
            url: url.to_string(),
        })
}

/// Text content of the first `#content_main` element, if any.
fn content_region_text(markup: &str) -> Option<String> {
    let document = Html::parse_document(markup);
    let region = document.select(&CONTENT_SELECTOR).next()?;
    Some(region.text().collect())
}

/// Trimmed text following the first marker occurrence.
fn text_after_marker(region: &str) -> Option<&str> {
    let (_, after) = region.split_once(BILL_START_MARKER)?;
    Some(after.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn page(body: &str) -> String {
        format!("<html><head><title>Bill</title></head><body><div id=\"nav\">Home</div>{body}</body></html>")
    }

    #[test]
    fn test_extracts_text_after_marker() {
        let html = page(
            "<div id=\"content_main\"><span>AB-1 Housing</span>#DOCUMENTBill Start\n\n  The people of the State of California do enact as follows:\n</div>",
        );
        let text = extract_bill_text(&html, "u").unwrap();
        assert_eq!(
            text,
            "The people of the State of California do enact as follows:"
        );
    }

    #[test]
    fn test_nested_markup_is_flattened_without_other_normalization() {
        let html = page(
            "<div id=\"content_main\">#DOCUMENTBill Start<p>SECTION 1.</p>  <p>Section  2 is   added.</p></div>",
        );
        let text = extract_bill_text(&html, "u").unwrap();
        assert_eq!(text, "SECTION 1.  Section  2 is   added.");
    }

    #[test]
    fn test_marker_split_across_elements_is_found() {
        let html = page("<div id=\"content_main\"><b>#DOCUMENT</b>Bill Start body</div>");
        assert_eq!(extract_bill_text(&html, "u").unwrap(), "body");
    }

    #[test]
    fn test_only_first_marker_is_stripped() {
        let html = page(
            "<div id=\"content_main\">#DOCUMENTBill Start text #DOCUMENTBill Start more</div>",
        );
        assert_eq!(
            extract_bill_text(&html, "u").unwrap(),
            "text #DOCUMENTBill Start more"
        );
    }

    #[test]
    fn test_missing_marker() {
        let html = page("<div id=\"content_main\">No bill text here</div>");
        let err = extract_bill_text(&html, "https://x/bill").unwrap_err();
        assert_eq!(err.kind(), FailureKind::MarkerNotFound);
        assert!(err.to_string().contains("https://x/bill"));
    }

    #[test]
    fn test_marker_outside_region_does_not_count() {
        let html = page("<div id=\"other\">#DOCUMENTBill Start text</div><div id=\"content_main\">empty</div>");
        let err = extract_bill_text(&html, "u").unwrap_err();
        assert_eq!(err.kind(), FailureKind::MarkerNotFound);
    }

    #[test]
    fn test_missing_anchor() {
        let html = page("<div id=\"content\">#DOCUMENTBill Start text</div>");
        let err = extract_bill_text(&html, "u").unwrap_err();
        assert_eq!(err.kind(), FailureKind::AnchorNotFound);
    }

    #[test]
    fn test_empty_text_after_marker_is_valid() {
        let html = page("<div id=\"content_main\">#DOCUMENTBill Start   </div>");
        assert_eq!(extract_bill_text(&html, "u").unwrap(), "");
    }
}
