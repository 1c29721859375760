//! Input connectors

mod file;
mod http;

pub use file::NdjsonFileSource;
pub use http::HttpTableSource;

use std::path::PathBuf;

use courier_core::{Config, PagedSource, SourceError};
use serde::Deserialize;

/// `[source]` section: which input to read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSettings {
    /// A single file (`path`) or every file matching `pattern`
    File {
        path: Option<PathBuf>,
        pattern: Option<String>,
    },
    Http {
        url: String,
        #[serde(default)]
        token: Option<String>,
    },
}

impl SourceSettings {
    /// One source per location, ready for a [`BlobReader`](courier_core::BlobReader).
    pub fn open(&self, config: &Config) -> Result<Vec<Box<dyn PagedSource>>, SourceError> {
        match self {
            Self::File {
                path: Some(path),
                pattern: None,
            } => Ok(vec![Box::new(NdjsonFileSource::new(path))]),
            Self::File {
                path: None,
                pattern: Some(pattern),
            } => Ok(NdjsonFileSource::discover(pattern)?
                .into_iter()
                .map(|s| Box::new(s) as Box<dyn PagedSource>)
                .collect()),
            Self::File { .. } => Err(SourceError::Config(
                "file source needs exactly one of `path` or `pattern`".into(),
            )),
            Self::Http { url, token } => Ok(vec![Box::new(HttpTableSource::new(
                url,
                token.clone(),
                config.http_timeout(),
            )?)]),
        }
    }
}
