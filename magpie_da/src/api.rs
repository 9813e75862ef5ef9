//! Paginated deviantart api client.
//!
//! The access credential is an immutable [`Session`] value passed into each
//! call; refreshing produces a new value instead of mutating shared state.
//! Rate limiting is handled inside [`DaApi::get_json`] with an adaptive
//! backoff, so callers only ever see terminal errors.

use chrono::Utc;
use futures::Future;
use log::{info, warn};
use magpie_core::config::DeviantArtConfig;
use reqwest::header::RETRY_AFTER;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::{
    fs::{File, OpenOptions},
    path::Path,
    time::Duration,
};
use tokio::{sync::Mutex, time::sleep};

use crate::models::{Deviation, DeviationMetadata, FeedItem, Reactor};

pub const API_BASE_URL: &str = "https://www.deviantart.com/api/v1/oauth2";
pub const TOKEN_URL: &str = "https://www.deviantart.com/oauth2/token";

/// The metadata endpoint rejects requests with more ids than this.
pub const METADATA_BATCH_LIMIT: usize = 10;
pub const GALLERY_PAGE_LIMIT: i64 = 24;

const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const COURTESY_DELAY: Duration = Duration::from_secs(1);

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum ApiError {
    #[snafu(display("rate limited by the api"))]
    RateLimited { retry_after: Option<Duration> },

    #[snafu(display("api returned status {status}: {body}"))]
    Remote { status: u16, body: String },

    #[snafu(display("network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("cannot decode api response: {source}"))]
    Decode { source: reqwest::Error },

    #[snafu(display("credentials: {message}"))]
    Credentials { message: String },
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Sleep schedule for consecutive 429 responses: starts at one second,
/// doubles per hit, shrinks by a quarter after a success, never below the
/// floor.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delay: BACKOFF_FLOOR,
        }
    }
}

impl Backoff {
    /// Returns the sleep to take now and doubles the next one.
    pub fn on_rate_limited(&mut self) -> Duration {
        let delay = self.delay;
        self.delay *= 2;
        delay
    }

    pub fn on_success(&mut self) {
        self.delay = self.delay.mul_f64(0.75).max(BACKOFF_FLOOR);
    }

    pub fn current(&self) -> Duration {
        self.delay
    }
}

/// OAuth token value. `expires_at` is a unix timestamp with the safety
/// margin already subtracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.expires_at
    }

    pub fn load(path: &Path) -> Option<Session> {
        let file = File::open(path).ok()?;
        serde_json::from_reader(file).ok()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(p) = path.parent() {
            std::fs::create_dir_all(p)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// One page of a listing. `next_offset` is server-supplied and must be used
/// as-is: pages shrink under concurrent deletion, so `offset + len` skips
/// items.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default, alias = "items")]
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_offset: Option<i64>,
    #[serde(default)]
    pub cursor: Option<String>,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            results: vec![],
            has_more: false,
            next_offset: None,
            cursor: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    metadata: Vec<DeviationMetadata>,
}

pub struct DaApi {
    http: reqwest::Client,
    base_url: String,
    token_url: String,
    backoff: Mutex<Backoff>,
}

impl DaApi {
    pub fn new(proxy: Option<reqwest::Proxy>) -> ApiResult<Self> {
        let mut builder = reqwest::ClientBuilder::new();
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }
        Ok(Self {
            http: builder.build().context(Network)?,
            base_url: API_BASE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            backoff: Mutex::new(Backoff::default()),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        loop {
            let resp = match self.http.get(&url).query(query).send().await {
                Ok(r) => classify(r).await,
                Err(e) => Err(ApiError::Network { source: e }),
            };
            match resp {
                Ok(r) => {
                    self.backoff.lock().await.on_success();
                    let value = r.json().await.context(Decode)?;
                    sleep(COURTESY_DELAY).await;
                    return Ok(value);
                }
                Err(ApiError::RateLimited { retry_after }) => {
                    self.wait_rate_limit(retry_after).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_form_json<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> ApiResult<T> {
        loop {
            let resp = match self.http.post(url).form(form).send().await {
                Ok(r) => classify(r).await,
                Err(e) => Err(ApiError::Network { source: e }),
            };
            match resp {
                Ok(r) => {
                    self.backoff.lock().await.on_success();
                    return r.json().await.context(Decode);
                }
                Err(ApiError::RateLimited { retry_after }) => {
                    self.wait_rate_limit(retry_after).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_rate_limit(&self, retry_after: Option<Duration>) {
        let delay = self.backoff.lock().await.on_rate_limited();
        // The api sends no reliable Retry-After, but honor it when present.
        let delay = retry_after.unwrap_or(delay);
        warn!("rate limited, retrying in {}s", delay.as_secs());
        sleep(delay).await;
    }

    pub async fn gallery(
        &self,
        session: &Session,
        folder: &str,
        offset: i64,
        limit: i64,
    ) -> ApiResult<Page<Deviation>> {
        self.get_json(
            &format!("/gallery/{folder}"),
            &[
                ("access_token", session.access_token.clone()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
                ("mature_content", "true".to_string()),
            ],
        )
        .await
    }

    /// Fetches metadata for all ids, chunked to the endpoint's batch limit.
    pub async fn metadata(
        &self,
        session: &Session,
        ids: &[String],
    ) -> ApiResult<Vec<DeviationMetadata>> {
        let mut all = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(METADATA_BATCH_LIMIT) {
            let mut query: Vec<(&str, String)> = vec![
                ("access_token", session.access_token.clone()),
                ("mature_content", "true".to_string()),
            ];
            for id in chunk {
                query.push(("deviationids[]", id.clone()));
            }
            let resp: MetadataResponse = self.get_json("/deviation/metadata", &query).await?;
            all.extend(resp.metadata);
        }
        Ok(all)
    }

    pub async fn whofaved(
        &self,
        session: &Session,
        deviationid: &str,
        offset: i64,
    ) -> ApiResult<Page<Reactor>> {
        self.get_json(
            "/deviation/whofaved",
            &[
                ("access_token", session.access_token.clone()),
                ("deviationid", deviationid.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    pub async fn feed(&self, session: &Session, cursor: Option<&str>) -> ApiResult<Page<FeedItem>> {
        let mut query = vec![("access_token", session.access_token.clone())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        self.get_json("/feed/home", &query).await
    }

    pub async fn feed_stack(
        &self,
        session: &Session,
        stackid: &str,
        offset: i64,
    ) -> ApiResult<Page<FeedItem>> {
        self.get_json(
            &format!("/feed/home/{stackid}"),
            &[
                ("access_token", session.access_token.clone()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    /// Token validity probe.
    pub async fn placebo(&self, session: &Session) -> ApiResult<()> {
        let _: serde_json::Value = self
            .get_json(
                "/placebo",
                &[("access_token", session.access_token.clone())],
            )
            .await?;
        Ok(())
    }

    pub async fn refresh_session(
        &self,
        credentials: &DeviantArtConfig,
        refresh_token: &str,
    ) -> ApiResult<Session> {
        let resp: TokenResponse = self
            .post_form_json(
                &self.token_url,
                &[
                    ("client_id", credentials.client_id.clone()),
                    ("client_secret", credentials.client_secret.clone()),
                    ("grant_type", "refresh_token".to_string()),
                    ("refresh_token", refresh_token.to_string()),
                ],
            )
            .await?;
        Ok(Session {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            // Renew a minute early rather than race the expiry.
            expires_at: Utc::now().timestamp() + resp.expires_in - 60,
        })
    }

    /// Returns a usable session: the saved one if the api still accepts it,
    /// otherwise a freshly refreshed one.
    pub async fn ensure_valid_token(
        &self,
        credentials: &DeviantArtConfig,
        saved: Option<Session>,
    ) -> ApiResult<Session> {
        if credentials.client_id.is_empty() || credentials.client_secret.is_empty() {
            return Err(ApiError::Credentials {
                message: "deviantart.client_id and client_secret must be configured".to_string(),
            });
        }

        let mut refresh_token = credentials.refresh_token.clone();
        if let Some(session) = saved {
            if !session.is_expired() {
                match self.placebo(&session).await {
                    Ok(()) => return Ok(session),
                    Err(ApiError::Remote { status: 401, .. }) => {
                        info!("saved access token rejected by the api, refreshing");
                    }
                    Err(e) => return Err(e),
                }
            }
            if !session.refresh_token.is_empty() {
                refresh_token = session.refresh_token;
            }
        }
        if refresh_token.is_empty() {
            return Err(ApiError::Credentials {
                message: "no refresh token available, set deviantart.refresh_token".to_string(),
            });
        }

        let session = self.refresh_session(credentials, &refresh_token).await?;
        self.placebo(&session).await?;
        Ok(session)
    }
}

async fn classify(resp: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = resp.status();
    if status.as_u16() == 429 {
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ApiError::RateLimited { retry_after });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!("api returned status {status}: {body}");
        return Err(ApiError::Remote {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Drains an offset-paginated listing, following the server-supplied
/// `next_offset`. Stops on the `want` count if given, an empty page, or
/// `has_more = false`.
pub async fn collect_offset_pages<T, F, Fut>(
    start_offset: i64,
    want: Option<usize>,
    mut fetch: F,
) -> ApiResult<Vec<T>>
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    let mut items = vec![];
    let mut offset = start_offset;
    loop {
        let page = fetch(offset).await?;
        let was_empty = page.results.is_empty();
        let has_more = page.has_more;
        let next_offset = page.next_offset;
        items.extend(page.results);

        if let Some(want) = want {
            if items.len() >= want {
                break;
            }
        }
        if was_empty || !has_more {
            break;
        }
        offset = match next_offset {
            Some(o) => o,
            None => break,
        };
    }
    Ok(items)
}
