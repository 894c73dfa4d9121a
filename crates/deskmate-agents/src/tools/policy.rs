use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use deskmate_common::Result;
use deskmate_db::{PolicySnippet, WorkplaceStore};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::{Tool, ToolContext, ToolOutput, optional_str};

const MAX_RESULTS: usize = 5;

/// Words that carry no signal for handbook lookups, English and Malay.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "can", "do", "does", "for", "how", "i", "in", "is", "many", "me",
    "my", "of", "on", "the", "to", "what", "when", "with", "apa", "berapa", "boleh", "dan",
    "saya", "untuk", "yang",
];

pub struct SearchPolicy {
    store: Arc<Mutex<WorkplaceStore>>,
}

impl SearchPolicy {
    pub fn new(store: Arc<Mutex<WorkplaceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchPolicy {
    fn name(&self) -> &'static str {
        "search_policy"
    }

    fn description(&self) -> &'static str {
        "Search the company handbook. Call for questions about rules, benefits, MC limits, \
         working hours or any other policy."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query in English or Malay" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, _context: &ToolContext, args: Value) -> Result<ToolOutput> {
        let Some(query) = optional_str(&args, "query") else {
            return Ok(ToolOutput::error("Please provide a search query"));
        };
        let terms = terms(query);
        if terms.is_empty() {
            return Ok(ToolOutput::error("Please provide a more specific search query"));
        }

        let snippets = self.store.lock().await.policy_snippets()?;
        let results: Vec<Value> = rank(&snippets, &terms)
            .into_iter()
            .map(|(snippet, score)| {
                json!({
                    "title": snippet.title,
                    "content": snippet.content,
                    "similarity": (score * 1000.0).round() / 10.0,
                })
            })
            .collect();

        if results.is_empty() {
            return Ok(ToolOutput::success(json!({
                "info": "No policy in the handbook matched that query."
            })));
        }
        Ok(ToolOutput::success(json!({
            "count": results.len(),
            "results": results,
        })))
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Share of query terms found in each snippet, title hits counted twice.
fn rank<'a>(snippets: &'a [PolicySnippet], query: &HashSet<String>) -> Vec<(&'a PolicySnippet, f64)> {
    let mut scored: Vec<(&PolicySnippet, f64)> = snippets
        .iter()
        .filter_map(|snippet| {
            let title = terms(&snippet.title);
            let body = terms(&snippet.content);
            let hits: usize = query
                .iter()
                .map(|t| usize::from(body.contains(t)) + 2 * usize::from(title.contains(t)))
                .sum();
            (hits > 0).then(|| (snippet, (hits as f64 / (3 * query.len()) as f64).min(1.0)))
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.id.cmp(&b.0.id)));
    scored.truncate(MAX_RESULTS);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, seeded_workplace};

    #[tokio::test]
    async fn finds_medical_leave_policy_first() {
        let out = SearchPolicy::new(seeded_workplace())
            .execute(&context("u-1"), json!({"query": "How many days of medical leave?"}))
            .await
            .unwrap();
        assert_eq!(out.payload["success"], true);
        assert_eq!(out.payload["results"][0]["title"], "Medical leave");
        assert!(out.payload["count"].as_u64().unwrap() <= MAX_RESULTS as u64);
    }

    #[tokio::test]
    async fn no_match_is_still_success() {
        let out = SearchPolicy::new(seeded_workplace())
            .execute(&context("u-1"), json!({"query": "submarine"}))
            .await
            .unwrap();
        assert_eq!(out.payload["success"], true);
        assert!(out.payload["info"].is_string());
    }

    #[tokio::test]
    async fn empty_query_fails() {
        let out = SearchPolicy::new(seeded_workplace())
            .execute(&context("u-1"), json!({"query": "   "}))
            .await
            .unwrap();
        assert!(out.is_error);
    }

    #[test]
    fn stop_words_are_ignored() {
        let t = terms("What is the MC policy untuk saya?");
        assert!(t.contains("mc"));
        assert!(t.contains("policy"));
        assert!(!t.contains("the"));
        assert!(!t.contains("saya"));
    }
}
