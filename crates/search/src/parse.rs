//! Tolerant extraction of product cards from a search-results page.
//!
//! Every field is read by its own small function returning an `Option`, and
//! missing values fall back to placeholders.  Only a card without a usable
//! link is dropped.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use dealfinder_config::{MAX_RESULTS_LIMIT, SelectorConfig};

use crate::listing::{PRICE_PLACEHOLDER, ProductListing, UNKNOWN_TITLE};
use crate::query::{AffiliateTag, append_affiliate_tag};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("no {field} selectors configured")]
    Empty { field: &'static str },
    #[error("invalid {field} selector {selector:?}: {reason}")]
    Invalid {
        field: &'static str,
        selector: String,
        reason: String,
    },
}

/// Why a single card was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    #[error("card has no product link")]
    MissingLink,
    #[error("card link {href:?} is unusable: {reason}")]
    InvalidLink { href: String, reason: String },
}

/// Compiled selector fallback lists.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    card: Vec<Selector>,
    title: Vec<Selector>,
    link: Vec<Selector>,
    price: Vec<Selector>,
}

impl ListingSelectors {
    pub fn compile(config: &SelectorConfig) -> Result<Self, SelectorError> {
        Ok(Self {
            card: compile_list("card", &config.card)?,
            title: compile_list("title", &config.title)?,
            link: compile_list("link", &config.link)?,
            price: compile_list("price", &config.price)?,
        })
    }

    /// Cards matched by the first card selector that matches anything.
    fn cards<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        self.card
            .iter()
            .map(|sel| doc.select(sel).collect::<Vec<_>>())
            .find(|cards| !cards.is_empty())
            .unwrap_or_default()
    }
}

fn compile_list(field: &'static str, raw: &[String]) -> Result<Vec<Selector>, SelectorError> {
    if raw.iter().all(|s| s.trim().is_empty()) {
        return Err(SelectorError::Empty { field });
    }
    raw.iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            Selector::parse(s).map_err(|err| SelectorError::Invalid {
                field,
                selector: s.clone(),
                reason: err.to_string(),
            })
        })
        .collect()
}

/// Turns a results page into at most `max_results` listings, never more
/// than [`MAX_RESULTS_LIMIT`].
#[derive(Debug, Clone)]
pub struct ListingParser {
    selectors: ListingSelectors,
    base_url: Url,
    tag: AffiliateTag,
    currency_symbol: String,
    max_results: usize,
}

impl ListingParser {
    pub fn new(
        selectors: ListingSelectors,
        base_url: Url,
        tag: AffiliateTag,
        currency_symbol: impl Into<String>,
        max_results: usize,
    ) -> Self {
        Self {
            selectors,
            base_url,
            tag,
            currency_symbol: currency_symbol.into(),
            max_results: max_results.clamp(1, MAX_RESULTS_LIMIT),
        }
    }

    /// Listings in document order.  Only the first `max_results` cards are
    /// considered; a broken card among them is skipped, not replaced.
    pub fn parse(&self, html: &str) -> Vec<ProductListing> {
        let doc = Html::parse_document(html);
        let cards = self.selectors.cards(&doc);
        if cards.is_empty() {
            warn!("results page has no recognisable product cards");
            return Vec::new();
        }

        let mut listings = Vec::with_capacity(self.max_results);
        for (index, card) in cards.into_iter().take(self.max_results).enumerate() {
            match self.listing_from_card(card) {
                Ok(listing) => listings.push(listing),
                Err(err) => debug!(index, %err, "skipping product card"),
            }
        }
        listings
    }

    fn listing_from_card(&self, card: ElementRef<'_>) -> Result<ProductListing, ListingError> {
        let link = extract_link(card, &self.selectors.link, &self.base_url)?;
        Ok(ProductListing {
            title: extract_title(card, &self.selectors.title)
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            price: extract_price(card, &self.selectors.price, &self.currency_symbol)
                .unwrap_or_else(|| PRICE_PLACEHOLDER.to_string()),
            link: append_affiliate_tag(&link, &self.tag),
        })
    }
}

fn extract_title(card: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    first_text(card, selectors)
}

fn extract_price(card: ElementRef<'_>, selectors: &[Selector], currency: &str) -> Option<String> {
    selectors
        .iter()
        .flat_map(|sel| card.select(sel))
        .find_map(|el| format_price(&element_text(el), currency))
}

fn extract_link(
    card: ElementRef<'_>,
    selectors: &[Selector],
    base: &Url,
) -> Result<Url, ListingError> {
    let href = selectors
        .iter()
        .flat_map(|sel| card.select(sel))
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .ok_or(ListingError::MissingLink)?;

    let invalid = |reason: String| ListingError::InvalidLink {
        href: href.to_string(),
        reason,
    };
    let url = base.join(href).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    Ok(url)
}

/// `"2,495."` → `"₹2,495"`.  Values already carrying the symbol are kept.
fn format_price(raw: &str, currency: &str) -> Option<String> {
    let value = raw.trim().trim_end_matches('.').trim_end();
    if value.is_empty() {
        return None;
    }
    if currency.is_empty() || value.starts_with(currency) {
        Some(value.to_string())
    } else {
        Some(format!("{currency}{value}"))
    }
}

fn first_text(card: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .flat_map(|sel| card.select(sel))
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(max_results: usize) -> ListingParser {
        ListingParser::new(
            ListingSelectors::compile(&SelectorConfig::default()).unwrap(),
            Url::parse("https://www.amazon.in/s").unwrap(),
            AffiliateTag::new("tag", "deals-21"),
            "₹",
            max_results,
        )
    }

    fn card(title: Option<&str>, href: Option<&str>, price: Option<&str>) -> String {
        let heading = match (title, href) {
            (Some(t), Some(h)) => format!(r#"<h2><a class="a-link-normal" href="{h}"><span>{t}</span></a></h2>"#),
            (Some(t), None) => format!("<h2><span>{t}</span></h2>"),
            (None, Some(h)) => format!(r#"<a class="a-link-normal" href="{h}"><img src="x.jpg"></a>"#),
            (None, None) => String::new(),
        };
        let price = price
            .map(|p| {
                format!(
                    r#"<span class="a-price"><span class="a-offscreen">₹{p}</span><span class="a-price-whole">{p}<span class="a-price-decimal">.</span></span></span>"#
                )
            })
            .unwrap_or_default();
        format!(
            r#"<div data-component-type="s-search-result" data-asin="X">{heading}<div class="a-row">{price}</div></div>"#
        )
    }

    fn page(cards: &[String]) -> String {
        format!(
            r#"<html><head><title>Amazon.in : shoes</title></head><body><div class="s-main-slot">{}</div></body></html>"#,
            cards.concat()
        )
    }

    #[test]
    fn three_cards_in_document_order() {
        let html = page(&[
            card(Some("Nike Revolution 6"), Some("/Nike-Revolution/dp/B0001?ref=sr_1_1"), Some("2,495")),
            card(Some("Adidas Duramo"), Some("/Adidas-Duramo/dp/B0002"), Some("3,199")),
            card(Some("Puma Softride"), Some("https://www.amazon.in/dp/B0003?th=1"), Some("1,899")),
        ]);

        let listings = parser(3).parse(&html);
        assert_eq!(listings.len(), 3);

        assert_eq!(listings[0].title, "Nike Revolution 6");
        assert_eq!(listings[0].price, "₹2,495");
        assert_eq!(
            listings[0].link.as_str(),
            "https://www.amazon.in/Nike-Revolution/dp/B0001?ref=sr_1_1&tag=deals-21"
        );

        assert_eq!(listings[1].title, "Adidas Duramo");
        assert_eq!(listings[1].price, "₹3,199");
        assert_eq!(listings[1].link.as_str(), "https://www.amazon.in/Adidas-Duramo/dp/B0002?tag=deals-21");

        assert_eq!(listings[2].title, "Puma Softride");
        assert_eq!(listings[2].price, "₹1,899");
        assert_eq!(listings[2].link.as_str(), "https://www.amazon.in/dp/B0003?th=1&tag=deals-21");
    }

    #[test]
    fn missing_price_only_affects_its_card() {
        let html = page(&[
            card(Some("First"), Some("/dp/B0001"), Some("100")),
            card(Some("Second"), Some("/dp/B0002"), None),
            card(Some("Third"), Some("/dp/B0003"), Some("300")),
        ]);

        let listings = parser(3).parse(&html);
        assert_eq!(listings.len(), 3);
        assert_eq!(listings[0].price, "₹100");
        assert_eq!(listings[1].price, PRICE_PLACEHOLDER);
        assert_eq!(listings[1].title, "Second");
        assert_eq!(listings[2].price, "₹300");
        assert_eq!(listings[2].title, "Third");
    }

    #[test]
    fn missing_title_uses_placeholder() {
        let html = page(&[card(None, Some("/dp/B0001"), Some("499"))]);
        let listings = parser(3).parse(&html);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].title, UNKNOWN_TITLE);
        assert_eq!(listings[0].price, "₹499");
        assert_eq!(listings[0].link.as_str(), "https://www.amazon.in/dp/B0001?tag=deals-21");
    }

    #[test]
    fn card_without_link_is_skipped_not_backfilled() {
        let html = page(&[
            card(Some("First"), Some("/dp/B0001"), Some("100")),
            card(Some("No link"), None, Some("200")),
            card(Some("Third"), Some("/dp/B0003"), Some("300")),
            card(Some("Fourth"), Some("/dp/B0004"), Some("400")),
        ]);

        let titles: Vec<_> = parser(3).parse(&html).into_iter().map(|l| l.title).collect();
        assert_eq!(titles, vec!["First", "Third"]);
    }

    #[test]
    fn javascript_links_are_rejected() {
        let html = page(&[
            card(Some("Bad"), Some("javascript:void(0)"), Some("100")),
            card(Some("Good"), Some("/dp/B0002"), Some("200")),
        ]);
        let titles: Vec<_> = parser(3).parse(&html).into_iter().map(|l| l.title).collect();
        assert_eq!(titles, vec!["Good"]);
    }

    #[test]
    fn only_first_cards_are_used() {
        let cards: Vec<String> = (1..=6)
            .map(|i| card(Some(&format!("Item {i}")), Some(&format!("/dp/B000{i}")), Some("10")))
            .collect();
        let listings = parser(3).parse(&page(&cards));
        assert_eq!(listings.len(), 3);
        assert_eq!(listings[2].title, "Item 3");
    }

    #[test]
    fn configured_limit_is_capped_at_three() {
        let cards: Vec<String> = (1..=6)
            .map(|i| card(Some(&format!("Item {i}")), Some(&format!("/dp/B000{i}")), Some("10")))
            .collect();
        let scraper = dealfinder_config::ScraperConfig {
            max_results: 5,
            ..Default::default()
        };
        let listings = parser(scraper.max_results).parse(&page(&cards));
        assert_eq!(listings.len(), 3);
        assert_eq!(listings[2].title, "Item 3");

        assert_eq!(parser(0).parse(&page(&cards)).len(), 1);
    }

    #[test]
    fn no_cards_yields_empty_list() {
        let html = page(&[r#"<div class="s-no-results">No results for xyz.</div>"#.to_string()]);
        assert!(parser(3).parse(&html).is_empty());
        assert!(parser(3).parse("").is_empty());
        assert!(parser(3).parse("<<<not html at all").is_empty());
    }

    #[test]
    fn tag_embedded_in_page_link_is_replaced() {
        let html = page(&[card(Some("Tagged"), Some("/dp/B0001?tag=other-21&amp;ref=x"), Some("10"))]);
        let listings = parser(3).parse(&html);
        let tags: Vec<_> = listings[0]
            .link
            .query_pairs()
            .filter(|(k, _)| k == "tag")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(tags, vec!["deals-21".to_string()]);
    }

    #[test]
    fn title_whitespace_is_collapsed() {
        let html = page(&[card(Some("  Big \n\t  Kettle  "), Some("/dp/B0001"), None)]);
        assert_eq!(parser(3).parse(&html)[0].title, "Big Kettle");
    }

    #[test]
    fn format_price_variants() {
        assert_eq!(format_price("2,495.", "₹").as_deref(), Some("₹2,495"));
        assert_eq!(format_price(" ₹799 ", "₹").as_deref(), Some("₹799"));
        assert_eq!(format_price("12", "").as_deref(), Some("12"));
        assert_eq!(format_price(" . ", "₹"), None);
    }

    #[test]
    fn invalid_selector_is_reported() {
        let config = SelectorConfig {
            price: vec!["span[[".to_string()],
            ..SelectorConfig::default()
        };
        let err = ListingSelectors::compile(&config).unwrap_err();
        assert!(matches!(err, SelectorError::Invalid { field: "price", .. }));
    }

    #[test]
    fn empty_selector_list_is_reported() {
        let config = SelectorConfig {
            card: vec![" ".to_string()],
            ..SelectorConfig::default()
        };
        assert_eq!(
            ListingSelectors::compile(&config).unwrap_err(),
            SelectorError::Empty { field: "card" }
        );
    }

    #[test]
    fn later_card_selector_used_when_first_misses() {
        let config = SelectorConfig {
            card: vec!["div.missing".to_string(), "li.result".to_string()],
            ..SelectorConfig::default()
        };
        let parser = ListingParser::new(
            ListingSelectors::compile(&config).unwrap(),
            Url::parse("https://shop.example/").unwrap(),
            AffiliateTag::new("tag", "t-1"),
            "$",
            3,
        );
        let html = r#"<ul><li class="result"><h2><a href="/dp/1">Lamp</a></h2><span class="a-price-whole">20</span></li></ul>"#;
        let listings = parser.parse(html);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].price, "$20");
        assert_eq!(listings[0].link.as_str(), "https://shop.example/dp/1?tag=t-1");
    }
}
