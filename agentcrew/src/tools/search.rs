//! Cached web search.
//!
//! Results are simulated; a cache hit returns the stored payload without
//! regenerating it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Capability, ToolDef, ToolError, Toolkit, str_arg, string_schema};
use crate::cache::ResultCache;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub snippet: String,
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub items: Vec<SearchItem>,
}

impl SearchResults {
    /// Deterministic placeholder results for `query`.
    pub fn simulated(query: &str) -> Self {
        let q = query.replace(' ', "+");
        let snippets = [
            format!("This is a detailed information about {query} with relevant facts and figures."),
            format!("Additional information about {query} including recent developments and analysis."),
            format!("Comprehensive guide to {query} with step-by-step instructions and explanations."),
        ];
        let items = snippets
            .into_iter()
            .enumerate()
            .map(|(i, snippet)| SearchItem {
                title: format!("Example Result {} for {query}", i + 1),
                snippet,
                link: format!("https://example.com/{}?q={q}", i + 1),
            })
            .collect();
        Self { items }
    }

    pub fn render(&self, query: &str) -> String {
        if self.items.is_empty() {
            return format!("No results found for: {query}");
        }
        let mut out = format!("Search results for '{query}':\n\n");
        for (i, item) in self.items.iter().enumerate() {
            out.push_str(&format!(
                "Result {}:\nTitle: {}\nSummary: {}\nURL: {}\n\n",
                i + 1,
                item.title,
                item.snippet,
                item.link
            ));
        }
        out
    }
}

pub struct SearchToolkit {
    cache: ResultCache,
}

impl SearchToolkit {
    pub fn new(cache: ResultCache) -> Self {
        Self { cache }
    }

    pub fn search(&self, query: &str) -> Result<String, ToolError> {
        if query.trim().is_empty() {
            return Err(ToolError::Validation("search query is empty".into()));
        }
        if let Some(cached) = self.cache.get::<SearchResults>(query) {
            tracing::debug!(query, "Using cached search results");
            return Ok(cached.render(query));
        }

        tracing::info!(query, "Performing web search");
        let results = SearchResults::simulated(query);
        if let Err(e) = self.cache.put(query, &results) {
            tracing::warn!(error = %e, "Failed to cache search results");
        }
        Ok(results.render(query))
    }
}

#[async_trait]
impl Toolkit for SearchToolkit {
    fn capability(&self) -> Capability {
        Capability::Search
    }

    fn defs(&self) -> Vec<ToolDef> {
        vec![ToolDef::new(
            "web_search",
            "Search the web for information about a topic. Results are cached for a day.",
            string_schema(&["query"], &[("query", "What to search for")]),
        )]
    }

    async fn call(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        match name {
            "web_search" => self.search(str_arg(input, "query")?),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_toolkit() -> (tempfile::TempDir, SearchToolkit) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::open(dir.path().join("cache")).unwrap();
        (dir, SearchToolkit::new(cache))
    }

    #[test]
    fn miss_populates_cache() {
        let (_dir, kit) = make_toolkit();
        let out = kit.search("rust async").unwrap();
        assert!(out.starts_with("Search results for 'rust async':"));
        assert!(out.contains("Title: Example Result 1 for rust async"));
        assert!(out.contains("URL: https://example.com/3?q=rust+async"));
        assert!(kit.cache.entry_path("rust async").exists());
    }

    #[test]
    fn hit_returns_stored_payload() {
        let (_dir, kit) = make_toolkit();
        let stored = SearchResults {
            items: vec![SearchItem {
                title: "Cached".into(),
                snippet: "from disk".into(),
                link: "https://cached.example".into(),
            }],
        };
        kit.cache.put("topic", &stored).unwrap();
        let out = kit.search("topic").unwrap();
        assert!(out.contains("Title: Cached"), "got {out}");
        assert!(!out.contains("Example Result"));
    }

    #[test]
    fn empty_query_is_rejected() {
        let (_dir, kit) = make_toolkit();
        assert!(matches!(kit.search("  "), Err(ToolError::Validation(_))));
    }

    #[test]
    fn empty_results_render_as_no_results() {
        assert_eq!(SearchResults::default().render("x"), "No results found for: x");
    }
}
