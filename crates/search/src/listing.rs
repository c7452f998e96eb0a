use thiserror::Error;
use url::Url;

use crate::FetchError;

/// Title used when a card has no readable heading.
pub const UNKNOWN_TITLE: &str = "Unknown Product";

/// Price shown when a card has no price fragment.
pub const PRICE_PLACEHOLDER: &str = "Check Price";

/// One product card pulled from a results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductListing {
    pub title: String,
    pub price: String,
    /// Absolute product URL carrying the affiliate tag.
    pub link: Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    #[error("network error: {0}")]
    Network(#[from] FetchError),
    #[error("result extraction is disabled")]
    Disabled,
}

/// Result of one search.  `Success` with no listings means the page loaded
/// but carried no recognisable product cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success(Vec<ProductListing>),
    Failure(ExtractionFailure),
}

impl ExtractionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success(_))
    }

    /// Extracted listings; empty on failure.
    pub fn listings(&self) -> &[ProductListing] {
        match self {
            ExtractionOutcome::Success(listings) => listings,
            ExtractionOutcome::Failure(_) => &[],
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionOutcome::Success(listings) if listings.is_empty() => "empty",
            ExtractionOutcome::Success(_) => "listings",
            ExtractionOutcome::Failure(ExtractionFailure::Disabled) => "disabled",
            ExtractionOutcome::Failure(ExtractionFailure::Network(_)) => "network_error",
        }
    }
}
