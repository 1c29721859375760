//! Paginated JSON table API

use std::time::Duration;

use courier_core::http;
use courier_core::{Event, PagedSource, SourceError};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

use super::file::unparsed;

/// Response of `GET {url}?offset=&limit=`.
#[derive(Debug, Deserialize)]
struct TablePage {
    total: u64,
    #[serde(default)]
    rows: Vec<Value>,
}

/// Table served page by page over HTTP. Position is the row offset.
#[derive(Debug, Clone)]
pub struct HttpTableSource {
    url: Url,
    location: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpTableSource {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let url =
            Url::parse(url).map_err(|e| SourceError::Config(format!("bad table url {url:?}: {e}")))?;
        Ok(Self {
            location: url.as_str().to_string(),
            url,
            token,
            timeout,
        })
    }

    fn page_url(&self, offset: u64, limit: usize) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        url
    }

    fn get_page(&self, offset: u64, limit: usize) -> Result<TablePage, SourceError> {
        let url = self.page_url(offset, limit);
        let response = http::get(url.as_str(), self.token.as_deref(), self.timeout)?;
        parse_page(&response.body)
    }
}

fn parse_page(body: &str) -> Result<TablePage, SourceError> {
    serde_json::from_str(body).map_err(|e| SourceError::Format(format!("table page: {e}")))
}

fn row_to_event(row: Value) -> Event {
    match row {
        Value::Object(map) => map,
        other => unparsed(other.to_string()),
    }
}

impl PagedSource for HttpTableSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn total_len(&mut self) -> Result<u64, SourceError> {
        Ok(self.get_page(0, 1)?.total)
    }

    fn fetch(&mut self, position: u64, len: usize) -> Result<Vec<Event>, SourceError> {
        let page = self.get_page(position, len)?;
        if page.rows.len() > len {
            log::warn!(
                "{}: asked for {len} rows at {position}, got {}",
                self.location,
                page.rows.len()
            );
        }
        Ok(page.rows.into_iter().take(len).map(row_to_event).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: &str) -> HttpTableSource {
        HttpTableSource::new(url, None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn page_url_appends_query() {
        let s = source("https://data.example.com/tables/orders?format=json");
        assert_eq!(
            s.page_url(300, 100).as_str(),
            "https://data.example.com/tables/orders?format=json&offset=300&limit=100"
        );
        assert_eq!(s.location(), "https://data.example.com/tables/orders?format=json");
    }

    #[test]
    fn invalid_url_is_config_error() {
        assert!(matches!(
            HttpTableSource::new("not a url", None, Duration::from_secs(1)),
            Err(SourceError::Config(_))
        ));
    }

    #[test]
    fn parses_page() {
        let page = parse_page(r#"{"total": 42, "rows": [{"a": 1}, 7]}"#).unwrap();
        assert_eq!(page.total, 42);
        let events: Vec<Event> = page.rows.into_iter().map(row_to_event).collect();
        assert_eq!(events[0]["a"], 1);
        assert_eq!(events[1][courier_core::UNPARSED_FIELD], "7");
    }

    #[test]
    fn page_without_total_is_format_error() {
        assert!(matches!(
            parse_page(r#"{"rows": []}"#),
            Err(SourceError::Format(_))
        ));
    }
}
