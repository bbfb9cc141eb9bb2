//! In-memory index backend.
//!
//! Shares filter semantics with the HTTP backend by evaluating the same
//! `Filter` AST against the serialized document. Used by tests and
//! single-process deployments.

use crate::{IndexError, MessageDoc, SearchIndex, SearchQuery, SearchResults, SortOrder};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default, Clone)]
pub struct MemoryIndex {
    docs: Arc<Mutex<HashMap<String, MessageDoc>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().expect("index lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn text_matches(doc: &MessageDoc, text: &str) -> bool {
    if text.trim().is_empty() {
        return true;
    }
    let haystack = format!(
        "{} {} {} {} {} {} {}",
        doc.subject, doc.from, doc.to, doc.body_text, doc.attachment_content, doc.id, doc.sha256
    )
    .to_lowercase();
    text.split_whitespace().all(|term| haystack.contains(&term.to_lowercase()))
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, docs: Vec<MessageDoc>) -> Result<(), IndexError> {
        let mut guard = self.docs.lock().expect("index lock");
        for doc in docs {
            guard.insert(doc.id.clone(), doc);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MessageDoc>, IndexError> {
        Ok(self.docs.lock().expect("index lock").get(id).cloned())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, IndexError> {
        let docs: Vec<MessageDoc> =
            self.docs.lock().expect("index lock").values().cloned().collect();

        let mut hits: Vec<MessageDoc> = Vec::new();
        for doc in docs {
            if !text_matches(&doc, &query.text) {
                continue;
            }
            if let Some(filter) = &query.filter {
                let value = serde_json::to_value(&doc)?;
                if !filter.matches(&value) {
                    continue;
                }
            }
            hits.push(doc);
        }

        match query.sort {
            SortOrder::NewestFirst => hits.sort_by(|a, b| b.date_timestamp.cmp(&a.date_timestamp)),
            SortOrder::OldestFirst => hits.sort_by(|a, b| a.date_timestamp.cmp(&b.date_timestamp)),
        }

        let estimated_total = hits.len() as u64;
        let hits: Vec<MessageDoc> =
            hits.into_iter().skip(query.offset).take(query.limit.max(1)).collect();
        Ok(SearchResults { hits, estimated_total })
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        self.docs.lock().expect("index lock").remove(id);
        Ok(())
    }
}
