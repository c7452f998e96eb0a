use std::fmt;

use thiserror::Error;
use url::{Url, form_urlencoded};

use dealfinder_config::{CategoryCodes, MarketplaceConfig};

use crate::Category;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("search text is empty")]
    Empty,
}

/// Free-text search term, trimmed and guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query parameter that attributes purchases to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffiliateTag {
    param: String,
    value: String,
}

impl AffiliateTag {
    pub fn new(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            value: value.into(),
        }
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Return `url` carrying exactly one `tag` parameter.
///
/// Any parameter already using the tag's name (a page may embed its own) is
/// dropped first, so applying the same tag twice yields the same URL.  Every
/// other parameter is kept byte for byte.
pub fn append_affiliate_tag(url: &Url, tag: &AffiliateTag) -> Url {
    let encoded_tag = form_urlencoded::Serializer::new(String::new())
        .append_pair(tag.param(), tag.value())
        .finish();

    let mut segments: Vec<&str> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|segment| !segment.is_empty() && !names_param(segment, tag.param()))
        .collect();
    segments.push(&encoded_tag);

    let mut tagged = url.clone();
    tagged.set_query(Some(&segments.join("&")));
    tagged
}

/// Whether one raw `key=value` query segment has the (decoded) key `name`.
fn names_param(segment: &str, name: &str) -> bool {
    form_urlencoded::parse(segment.as_bytes())
        .next()
        .is_some_and(|(key, _)| key == name)
}

/// Builds marketplace search URLs.  Pure: the output depends only on the
/// inputs and the marketplace configuration captured at construction.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    search_endpoint: Url,
    query_param: String,
    category_param: String,
    category_codes: CategoryCodes,
    tag: AffiliateTag,
}

impl QueryBuilder {
    pub fn new(config: &MarketplaceConfig) -> Result<Self, url::ParseError> {
        let search_endpoint = Url::parse(&config.base_url)?.join(&config.search_path)?;
        Ok(Self {
            search_endpoint,
            query_param: config.query_param.clone(),
            category_param: config.category_param.clone(),
            category_codes: config.categories.clone(),
            tag: AffiliateTag::new(&config.tag_param, &config.affiliate_tag),
        })
    }

    /// Marketplace origin, used to resolve relative links on result pages.
    pub fn base_url(&self) -> &Url {
        &self.search_endpoint
    }

    pub fn affiliate_tag(&self) -> &AffiliateTag {
        &self.tag
    }

    /// Untagged search URL; this is what the extractor requests.
    pub fn request_url(&self, query: &Query, category: Category) -> Url {
        let mut url = self.search_endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(&self.query_param, query.as_str());
            if let Some(code) = category.code(&self.category_codes) {
                pairs.append_pair(&self.category_param, code);
            }
        }
        url
    }

    /// Tagged search URL.
    pub fn search_url(&self, query: &Query, category: Category) -> Url {
        append_affiliate_tag(&self.request_url(query, category), &self.tag)
    }

    /// Link offered when structured results are unavailable, and as the
    /// "see all results" link after a successful extraction.
    pub fn fallback_url(&self, query: &Query, category: Category) -> Url {
        self.search_url(query, category)
    }

    /// Tag a product link found on a results page.
    pub fn tag_link(&self, link: &Url) -> Url {
        append_affiliate_tag(link, &self.tag)
    }
}
