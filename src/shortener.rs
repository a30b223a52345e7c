use std::sync::Arc;

use crate::{
    ShortenRequest, ShortenResponse,
    code::{CODE_LEN, CodeSource, RandomCodes},
    db::{Db, DbError},
    model::{self, Store, UrlRecord},
};

/// Code lengths tried in order when generating, and how many draws each gets.
const GENERATED_LENGTHS: [usize; 3] = [CODE_LEN, CODE_LEN + 1, CODE_LEN + 2];
const DRAWS_PER_LENGTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ShortenError {
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Code already exists")]
    CodeAlreadyExists,
    #[error("URL not found")]
    NotFound,
    #[error("no free short code after {0} draws")]
    CodeSpaceExhausted(usize),
    #[error("persistence failure: {0}")]
    Persistence(#[from] Box<DbError>),
}

/// Scheme and host the short URLs are built from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
}

impl Origin {
    pub fn new(scheme: &str, host: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
        }
    }

    /// Fully qualified short URL for `code`; the code is percent-encoded as one path segment.
    pub fn short_url(&self, code: &str) -> String {
        match url::Url::parse(&format!("{}://{}/", self.scheme, self.host)) {
            Ok(mut base) => {
                if let Ok(mut segments) = base.path_segments_mut() {
                    segments.clear().push(code);
                }
                base.to_string()
            }
            Err(e) => {
                tracing::debug!("unparseable origin {}://{}: {e}", self.scheme, self.host);
                format!("{}://{}/{}", self.scheme, self.host, url_escape::encode_component(code))
            }
        }
    }
}

#[derive(Clone)]
pub struct Shortener {
    db: Db,
    codes: Arc<dyn CodeSource>,
}

impl std::fmt::Debug for Shortener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shortener").field("db", &self.db).finish_non_exhaustive()
    }
}

impl Shortener {
    pub fn new(db: Db) -> Self {
        Self::with_codes(db, Arc::new(RandomCodes))
    }

    pub fn with_codes(db: Db, codes: Arc<dyn CodeSource>) -> Self {
        Self { db, codes }
    }

    /// The full mapping, unfiltered.
    pub async fn list_all(&self) -> Result<Store, ShortenError> {
        Ok(self.db.urls.list().await?)
    }

    pub async fn shorten(&self, request: &ShortenRequest, origin: &Origin) -> Result<ShortenResponse, ShortenError> {
        let url = request.url.as_deref().unwrap_or_default();
        if !model::is_valid_url(url) {
            return Err(ShortenError::InvalidUrl);
        }

        let record = UrlRecord::new(url);
        let code = match request.custom_code.as_deref().filter(|c| !c.is_empty()) {
            Some(custom) => {
                if !self.db.urls.insert(custom, &record).await? {
                    tracing::debug!("custom code {custom} already taken");
                    return Err(ShortenError::CodeAlreadyExists);
                }
                custom.to_string()
            }
            None => self.insert_generated(&record).await?,
        };

        tracing::info!("created {code} -> {record}");
        Ok(ShortenResponse {
            short_url: origin.short_url(&code),
            code,
        })
    }

    async fn insert_generated(&self, record: &UrlRecord) -> Result<String, ShortenError> {
        let codes = &self.codes;
        let picked = self
            .db
            .urls
            .insert_with(record, |store| {
                GENERATED_LENGTHS
                    .iter()
                    .flat_map(|len| std::iter::repeat_n(*len, DRAWS_PER_LENGTH))
                    .map(|len| codes.draw(len))
                    .find(|code| !store.contains_key(code))
            })
            .await?;

        picked.ok_or_else(|| {
            let draws = GENERATED_LENGTHS.len() * DRAWS_PER_LENGTH;
            tracing::error!("gave up generating a code after {draws} draws");
            ShortenError::CodeSpaceExhausted(draws)
        })
    }

    pub async fn delete_code(&self, code: &str) -> Result<(), ShortenError> {
        if self.db.urls.delete(code).await? {
            tracing::info!("deleted {code}");
            Ok(())
        } else {
            Err(ShortenError::NotFound)
        }
    }

    /// Counts a visit to `code` and returns where it points.
    pub async fn resolve(&self, code: &str) -> Result<String, ShortenError> {
        match self.db.urls.incr(code).await? {
            Some(record) => {
                tracing::debug!("resolved {code} -> {} ({} clicks)", record.url, record.clicks);
                Ok(record.url)
            }
            None => Err(ShortenError::NotFound),
        }
    }
}
