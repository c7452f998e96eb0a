//! Search-and-extraction pipeline: build the marketplace search URL for a
//! free-text query, fetch the results page, and pull out the top listings.

mod category;
mod extract;
mod fetch;
mod listing;
mod parse;
mod query;

pub use category::{Category, UnknownCategory};
pub use extract::ResultExtractor;
pub use fetch::{FetchError, HttpFetcher, PageFetcher};
pub use listing::{
    ExtractionFailure, ExtractionOutcome, PRICE_PLACEHOLDER, ProductListing, UNKNOWN_TITLE,
};
pub use parse::{ListingError, ListingParser, ListingSelectors, SelectorError};
pub use query::{AffiliateTag, Query, QueryBuilder, QueryError, append_affiliate_tag};
