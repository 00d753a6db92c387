//! Data models for catalog search results.
//!
//! This module defines the records produced by the search stage:
//! - [`ArticleRecord`]: one article as returned by the catalog
//! - [`SearchResult`]: a whole result page, with its aggregation facets
//! - [`SearchQuery`]: the request body sent to the search endpoint
//!
//! The wire field names follow the catalog's JSON (`journal_link`, `agg_term`,
//! ...), so most structs deserialize straight from the response body.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Mode tag sent with every search request.
pub const ARTICLE_MODE: &str = "articles";

/// The request body for the catalog search endpoint.
///
/// # Fields
///
/// * `mode` - Always [`ARTICLE_MODE`]
/// * `q` - The query text; empty asks for the catalog's default set
/// * `size` - Page size, taken from configuration
/// * `from` - Offset, taken from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub mode: String,
    pub q: String,
    pub size: u32,
    pub from: u32,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>, size: u32, from: u32) -> Self {
        Self {
            mode: ARTICLE_MODE.to_string(),
            q: q.into(),
            size,
            from,
        }
    }
}

/// Treat an explicit `null` like a missing key.
///
/// The catalog sends `null` for empty strings and lists on some records;
/// `#[serde(default)]` alone only covers absent keys.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single article from a search result.
///
/// Records are immutable once parsed. Identity is the canonical `link`,
/// which is unique within a result set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleRecord {
    /// Article title (`name` on the wire).
    #[serde(rename = "name", deserialize_with = "null_as_default")]
    pub title: String,
    /// The abstract.
    #[serde(deserialize_with = "null_as_default")]
    pub annotation: String,
    /// Canonical catalog path, e.g. `/article/n/some-slug`.
    #[serde(deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(deserialize_with = "null_as_default")]
    pub authors: Vec<String>,
    pub year: Option<i32>,
    #[serde(deserialize_with = "null_as_default")]
    pub journal: String,
    #[serde(deserialize_with = "null_as_default")]
    pub journal_link: String,
    /// OCR text fragments supplied by the catalog.
    #[serde(deserialize_with = "null_as_default")]
    pub ocr: Vec<String>,
    /// Opaque catalog tags, kept exactly as delivered.
    pub catalogs: serde_json::Value,
}

/// Facet bucket keyed by a numeric id and a display name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedBucket {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub count: u64,
}

/// Facet bucket over a numeric range (years, reader age).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeBucket {
    #[serde(deserialize_with = "null_as_default")]
    pub from: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub to: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub count: u64,
}

/// Facet bucket for a subject category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryBucket {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub acronym: String,
    #[serde(deserialize_with = "null_as_default")]
    pub count: u64,
}

/// One page of search results.
///
/// Article order is the provider's relevance order and is never changed.
/// Facet buckets are kept in delivery order too.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResult {
    #[serde(deserialize_with = "null_as_default")]
    pub found: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub articles: Vec<ArticleRecord>,
    #[serde(deserialize_with = "null_as_default")]
    pub agg_term: Vec<NamedBucket>,
    #[serde(deserialize_with = "null_as_default")]
    pub agg_year: Vec<RangeBucket>,
    #[serde(deserialize_with = "null_as_default")]
    pub agg_journal: Vec<NamedBucket>,
    #[serde(deserialize_with = "null_as_default")]
    pub agg_age: Vec<RangeBucket>,
    #[serde(deserialize_with = "null_as_default")]
    pub agg_cat: Vec<CategoryBucket>,
}

/// Which aggregation a facet map comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Term,
    Year,
    Journal,
    Age,
    Category,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.found == 0 || self.articles.is_empty()
    }

    /// Look up an article by its canonical link.
    pub fn article(&self, link: &str) -> Option<&ArticleRecord> {
        self.articles.iter().find(|a| a.link == link)
    }

    /// Facet key to occurrence count for one aggregation.
    ///
    /// Keys are the bucket's display name, or the acronym for categories.
    /// Buckets sharing a key have their counts added.
    pub fn facet_counts(&self, facet: Facet) -> BTreeMap<String, u64> {
        let pairs: Vec<(&str, u64)> = match facet {
            Facet::Term => self.agg_term.iter().map(|b| (b.name.as_str(), b.count)).collect(),
            Facet::Year => self.agg_year.iter().map(|b| (b.name.as_str(), b.count)).collect(),
            Facet::Journal => self
                .agg_journal
                .iter()
                .map(|b| (b.name.as_str(), b.count))
                .collect(),
            Facet::Age => self.agg_age.iter().map(|b| (b.name.as_str(), b.count)).collect(),
            Facet::Category => self
                .agg_cat
                .iter()
                .map(|b| (b.acronym.as_str(), b.count))
                .collect(),
        };

        let mut counts = BTreeMap::new();
        for (key, count) in pairs {
            *counts.entry(key.to_string()).or_insert(0) += count;
        }
        counts
    }
}
