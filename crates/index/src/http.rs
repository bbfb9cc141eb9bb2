//! HTTP index backend.
//!
//! Speaks the inverted-index service's REST dialect: one index uid, document
//! upsert by POST, search with a filter expression and sort directives.

use crate::{
    IndexError, MessageDoc, SearchIndex, SearchQuery, SearchResults, SortOrder,
    FILTERABLE_ATTRIBUTES, SEARCHABLE_ATTRIBUTES, SORTABLE_ATTRIBUTES,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct HttpSearchIndex {
    client: reqwest::Client,
    host: String,
    uid: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    limit: usize,
    offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    sort: Vec<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<MessageDoc>,
    #[serde(default, rename = "estimatedTotalHits")]
    estimated_total_hits: u64,
}

#[derive(Serialize)]
struct IndexSettings {
    #[serde(rename = "filterableAttributes")]
    filterable_attributes: Vec<&'static str>,
    #[serde(rename = "searchableAttributes")]
    searchable_attributes: Vec<&'static str>,
    #[serde(rename = "sortableAttributes")]
    sortable_attributes: Vec<&'static str>,
}

impl HttpSearchIndex {
    pub fn new(
        host: String,
        uid: String,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, host, uid, api_key })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/indexes/{}/{}", self.host.trim_end_matches('/'), self.uid, suffix)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(k) if !k.is_empty() => req.bearer_auth(k),
            _ => req,
        }
    }

    /// Push filterable/searchable/sortable attribute settings. Run once at
    /// startup; the service applies them asynchronously.
    pub async fn ensure_settings(&self) -> Result<(), IndexError> {
        let settings = IndexSettings {
            filterable_attributes: FILTERABLE_ATTRIBUTES.to_vec(),
            searchable_attributes: SEARCHABLE_ATTRIBUTES.to_vec(),
            sortable_attributes: SORTABLE_ATTRIBUTES.to_vec(),
        };
        let url = format!("{}/indexes/{}/settings", self.host.trim_end_matches('/'), self.uid);
        let resp = self.auth(self.client.patch(url).json(&settings)).send().await?;
        if !resp.status().is_success() {
            return Err(IndexError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, docs: Vec<MessageDoc>) -> Result<(), IndexError> {
        let resp = self
            .auth(self.client.post(self.url("documents")).json(&docs))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IndexError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MessageDoc>, IndexError> {
        let resp = self
            .auth(self.client.get(self.url(&format!("documents/{id}"))))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(IndexError::Status(resp.status().as_u16()));
        }
        Ok(Some(resp.json::<MessageDoc>().await?))
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, IndexError> {
        let sort = match query.sort {
            SortOrder::NewestFirst => vec!["date_timestamp:desc".to_string()],
            SortOrder::OldestFirst => vec!["date_timestamp:asc".to_string()],
        };
        let body = SearchRequest {
            q: &query.text,
            limit: query.limit,
            offset: query.offset,
            filter: query.filter.as_ref().map(|f| f.to_expr()),
            sort,
        };
        let resp = self
            .auth(self.client.post(self.url("search")).json(&body))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IndexError::Status(resp.status().as_u16()));
        }
        let parsed: SearchResponse = resp.json().await?;
        Ok(SearchResults { hits: parsed.hits, estimated_total: parsed.estimated_total_hits })
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        let resp = self
            .auth(self.client.delete(self.url(&format!("documents/{id}"))))
            .send()
            .await?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(IndexError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Filter;

    #[tokio::test]
    async fn search_sends_filter_expression_and_parses_hits() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/indexes/emails/search")
                    .body_contains("org_id = 7");
                then.status(200).json_body(serde_json::json!({
                    "hits": [{"id": "m1", "org_id": [7], "subject": "Hello"}],
                    "estimatedTotalHits": 1
                }));
            })
            .await;

        let index = HttpSearchIndex::new(
            server.base_url(),
            "emails".into(),
            Some("masterKey".into()),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        let query = SearchQuery::new("Hello").with_filter(Filter::eq("org_id", 7));
        let res = index.search(&query).await.unwrap();
        mock.assert_async().await;
        assert_eq!(res.estimated_total, 1);
        assert_eq!(res.hits[0].id, "m1");
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/indexes/emails/documents/gone");
                then.status(404);
            })
            .await;

        let index = HttpSearchIndex::new(
            server.base_url(),
            "emails".into(),
            None,
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        assert!(index.get("gone").await.unwrap().is_none());
    }
}
