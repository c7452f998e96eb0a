use tracing::{debug, warn};

use dealfinder_config::ScraperConfig;

use crate::fetch::{HttpFetcher, PageFetcher};
use crate::listing::{ExtractionFailure, ExtractionOutcome};
use crate::parse::{ListingParser, ListingSelectors, SelectorError};
use crate::{Category, Query, QueryBuilder};

/// Fetches a results page and turns it into listings.
///
/// [`ResultExtractor::extract`] never fails: network problems become
/// [`ExtractionOutcome::Failure`], an unrecognisable page becomes an empty
/// [`ExtractionOutcome::Success`].
pub struct ResultExtractor<F = HttpFetcher> {
    fetcher: F,
    builder: QueryBuilder,
    parser: ListingParser,
}

impl<F: PageFetcher> ResultExtractor<F> {
    pub fn new(
        fetcher: F,
        builder: QueryBuilder,
        config: &ScraperConfig,
        currency_symbol: &str,
    ) -> Result<Self, SelectorError> {
        let selectors = ListingSelectors::compile(&config.selectors)?;
        let parser = ListingParser::new(
            selectors,
            builder.base_url().clone(),
            builder.affiliate_tag().clone(),
            currency_symbol,
            config.max_results,
        );
        Ok(Self {
            fetcher,
            builder,
            parser,
        })
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Single attempt; the fetcher's timeout bounds how long this can take.
    pub async fn extract(&self, query: &Query, category: Category) -> ExtractionOutcome {
        let url = self.builder.request_url(query, category);
        debug!(%url, "fetching results page");

        let body = match self.fetcher.fetch(&url).await {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, %category, "results page fetch failed");
                return ExtractionOutcome::Failure(ExtractionFailure::Network(err));
            }
        };

        let listings = self.parser.parse(&body);
        debug!(listings = listings.len(), %category, "extracted listings");
        ExtractionOutcome::Success(listings)
    }
}
