use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dealfinder_config::CategoryCodes;

/// Product vertical a user narrows their searches to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Unfiltered search.
    #[default]
    All,
    Fashion,
    Electronics,
    Books,
    Home,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category: {0:?}")]
pub struct UnknownCategory(pub String);

impl Category {
    /// Every category, in menu order.
    pub const ALL: [Category; 5] = [
        Category::Fashion,
        Category::Electronics,
        Category::Books,
        Category::Home,
        Category::All,
    ];

    /// Stable identifier used in callback data and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Fashion => "fashion",
            Category::Electronics => "electronics",
            Category::Books => "books",
            Category::Home => "home",
        }
    }

    pub fn button_label(self) -> &'static str {
        match self {
            Category::All => "🔍 Search Everything",
            Category::Fashion => "👕 Fashion",
            Category::Electronics => "📱 Tech",
            Category::Books => "📚 Books",
            Category::Home => "🏠 Home",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Category::All => "All Categories 🔍",
            Category::Fashion => "Fashion 👕",
            Category::Electronics => "Electronics 📱",
            Category::Books => "Books 📚",
            Category::Home => "Home 🏠",
        }
    }

    /// Marketplace category id, or `None` when the search is unfiltered.
    pub fn code(self, codes: &CategoryCodes) -> Option<&str> {
        let code = match self {
            Category::All => return None,
            Category::Fashion => &codes.fashion,
            Category::Electronics => &codes.electronics,
            Category::Books => &codes.books,
            Category::Home => &codes.home,
        };
        let code = code.trim();
        (!code.is_empty()).then_some(code)
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
