//! JSON digest output.
//!
//! Completed articles are written as one pretty-printed JSON document:
//!
//! ```text
//! {
//!   "generated_at": "2025-05-06T12:00:00Z",
//!   "query": "теория графов",
//!   "articles": [ { "title": ..., "link": ..., "summary": ... } ]
//! }
//! ```
//!
//! Only articles that reached `Done` are included.

use crate::error::{Error, Result};
use crate::pipeline::{ArticleState, Stage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// One summarized article.
#[derive(Debug, Serialize)]
pub struct ArticleDigest<'a> {
    pub title: &'a str,
    pub link: &'a str,
    pub authors: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub journal: &'a str,
    pub document_path: Option<&'a Path>,
    pub summary: &'a str,
}

impl<'a> ArticleDigest<'a> {
    /// `None` unless the article finished with a summary.
    pub fn from_state(state: &'a ArticleState) -> Option<Self> {
        if state.stage != Stage::Done {
            return None;
        }
        let summary = state.summary.as_deref()?;
        Some(Self {
            title: &state.record.title,
            link: &state.record.link,
            authors: &state.record.authors,
            year: state.record.year,
            journal: &state.record.journal,
            document_path: state.document_path.as_deref(),
            summary,
        })
    }
}

#[derive(Debug, Serialize)]
struct DigestFile<'a> {
    generated_at: DateTime<Utc>,
    query: &'a str,
    articles: Vec<ArticleDigest<'a>>,
}

/// Write the digests of all `Done` states in `states` to `path`.
///
/// Creates the parent directory if needed. Returns the number of articles
/// written.
#[instrument(level = "info", skip(states), fields(path = %path.display(), states = states.len()))]
pub async fn write_digests(states: &[ArticleState], query: &str, path: &Path) -> Result<usize> {
    let articles: Vec<_> = states.iter().filter_map(ArticleDigest::from_state).collect();
    let count = articles.len();
    let file = DigestFile {
        generated_at: Utc::now(),
        query,
        articles,
    };
    let json = serde_json::to_string_pretty(&file).map_err(|e| Error::storage(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let parent: PathBuf = parent.to_path_buf();
        if let Err(e) = fs::create_dir_all(&parent).await {
            error!(dir = %parent.display(), error = %e, "Failed to create output dir");
            return Err(Error::storage(parent, e));
        }
    }

    fs::write(path, json)
        .await
        .map_err(|e| Error::storage(path, e))?;
    info!(articles = count, "Wrote JSON digest");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StageError};
    use crate::models::ArticleRecord;
    use crate::pipeline::Step;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn done(link: &str, summary: &str) -> ArticleState {
        let mut state = ArticleState::new(Arc::new(ArticleRecord {
            title: "Графы и сети".to_string(),
            link: link.to_string(),
            authors: vec!["Иванов И. И.".to_string()],
            year: Some(2019),
            journal: "Вестник".to_string(),
            ..ArticleRecord::default()
        }));
        state.stage = Stage::Done;
        state.document_path = Some(PathBuf::from("/tmp/a.pdf"));
        state.text = Some(Arc::from("text"));
        state.summary = Some(summary.to_string());
        state
    }

    fn failed(link: &str) -> ArticleState {
        let mut state = ArticleState::new(Arc::new(ArticleRecord {
            link: link.to_string(),
            ..ArticleRecord::default()
        }));
        state.stage = Stage::Failed {
            step: Step::Fetch,
            kind: ErrorKind::Network,
        };
        state.error = Some(StageError {
            kind: ErrorKind::Network,
            message: "404".to_string(),
        });
        state
    }

    #[tokio::test]
    async fn test_writes_only_done_articles() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("digest.json");
        let states = vec![done("/article/n/a", "Кратко."), failed("/article/n/b")];

        let written = write_digests(&states, "графы", &path).await.unwrap();
        assert_eq!(written, 1);

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["query"], "графы");
        let articles = value["articles"].as_array().unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0]["link"], "/article/n/a");
        assert_eq!(articles[0]["summary"], "Кратко.");
        assert_eq!(articles[0]["year"], 2019);
        assert!(raw.contains('\n'));
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let err = write_digests(&[], "", &blocker.join("digest.json"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
