//! Web search and page extraction tools

use crate::error::Result;
use crate::services::SearchBackend;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const SNIPPET_MAX_CHARS: usize = 200;
const DEFAULT_NUM_RESULTS: i64 = 5;

fn default_num_results() -> i64 {
    DEFAULT_NUM_RESULTS
}

#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default = "default_num_results")]
    pub num_results: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReadArgs {
    pub url: String,
}

pub fn search_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "web_search",
            "description": "Search the web for current information on any topic. Always follow up by selecting 2-3 promising URLs and invoking web_read to extract content (fallback to fetch if needed). Then synthesize a direct, helpful answer. Do NOT output raw tool results or a bare list of links; integrate findings into your response and include inline citations to the used URLs.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query. Be specific and use relevant keywords to find the most relevant sources for further analysis."
                    },
                    "num_results": {
                        "type": "number",
                        "description": "Number of search results to return (default: 5, max: 10). Consider requesting more results if you plan to analyze multiple sources with web_read.",
                        "default": 5,
                        "minimum": 1,
                        "maximum": 10
                    }
                },
                "required": ["query"]
            }
        }
    })
}

pub fn read_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "web_read",
            "description": "Extract and analyze detailed content from specific web pages, particularly effective for in-depth content like blog posts, articles, documentation, and detailed web pages. Best used for content-rich pages, not homepages or search result pages. If this tool fails to read a URL, retry with the fetch tool as a fallback option.",
            "parameters": {
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The specific URL to analyze and extract content from (e.g., https://example.com/blog/detailed-article)"
                    }
                },
                "required": ["url"]
            }
        }
    })
}

/// Search the web, truncating snippets for the model
///
/// Errors from the search collaborator propagate; the caller converts
/// them into a structured tool-result payload.
pub async fn execute_search(search: &dyn SearchBackend, args: SearchArgs) -> Result<Value> {
    let limit = args.num_results.clamp(1, 10) as usize;
    debug!("web_search: '{}' (limit {})", args.query, limit);

    let results = search.search(&args.query).await?;
    let items: Vec<Value> = results
        .into_iter()
        .take(limit)
        .map(|result| {
            let snippet: String = result.snippet.chars().take(SNIPPET_MAX_CHARS).collect();
            json!({
                "title": result.title,
                "url": result.url,
                "snippet": format!("{}...", snippet),
            })
        })
        .collect();

    Ok(json!({ "result": items }))
}

/// Read a page through the extraction sidecar
///
/// Failures are swallowed here; the model receives `null` and must treat
/// it as "no content".
pub async fn execute_read(search: &dyn SearchBackend, args: ReadArgs) -> Value {
    debug!("web_read: {}", args.url);

    match search.read(&args.url).await {
        Ok(content) => Value::String(content),
        Err(e) => {
            warn!("web_read failed for {}: {}", args.url, e);
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HermesError;
    use crate::services::search::MockSearchBackend;
    use crate::services::SearchResult;

    fn result(title: &str, snippet: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            snippet: snippet.to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_slices_and_truncates() {
        let mut search = MockSearchBackend::new();
        search.expect_search().returning(|_| {
            Ok(vec![
                result("a", &"x".repeat(300)),
                result("b", "short"),
                result("c", "dropped"),
            ])
        });

        let args = SearchArgs {
            query: "seoul weather".to_string(),
            num_results: 2,
        };
        let value = execute_search(&search, args).await.unwrap();

        let items = value["result"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        let snippet = items[0]["snippet"].as_str().unwrap();
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS + 3);
        assert!(snippet.ends_with("..."));
        assert_eq!(items[1]["snippet"], "short...");
    }

    #[tokio::test]
    async fn test_search_clamps_num_results() {
        let mut search = MockSearchBackend::new();
        search
            .expect_search()
            .returning(|_| Ok((0..20).map(|i| result(&i.to_string(), "s")).collect()));

        let args = SearchArgs {
            query: "q".to_string(),
            num_results: 99,
        };
        let value = execute_search(&search, args).await.unwrap();
        assert_eq!(value["result"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_search_propagates_provider_error() {
        let mut search = MockSearchBackend::new();
        search
            .expect_search()
            .returning(|_| Err(HermesError::SearchApi("Search API error: 502".to_string())));

        let args = SearchArgs {
            query: "q".to_string(),
            num_results: 5,
        };
        assert!(execute_search(&search, args).await.is_err());
    }

    #[tokio::test]
    async fn test_read_swallows_failure() {
        let mut search = MockSearchBackend::new();
        search
            .expect_read()
            .returning(|_| Err(HermesError::SearchApi("boom".to_string())));

        let args = ReadArgs {
            url: "https://example.com".to_string(),
        };
        assert_eq!(execute_read(&search, args).await, Value::Null);
    }

    #[tokio::test]
    async fn test_read_returns_content() {
        let mut search = MockSearchBackend::new();
        search
            .expect_read()
            .returning(|_| Ok("extracted text".to_string()));

        let args = ReadArgs {
            url: "https://example.com".to_string(),
        };
        assert_eq!(
            execute_read(&search, args).await,
            Value::String("extracted text".to_string())
        );
    }
}
