//! Council agenda-item API: CSRF session bootstrap and paged search.
//!
//! The API wants a session cookie set plus the `XSRF-TOKEN` cookie value echoed
//! back in a header. The session is an explicit value so concurrent runs never
//! share cookies.

use chrono::NaiveDate;
use civicetl_shared::{AgendaItemRecord, CivicError, CouncilConfig, HttpConfig, Result};
use futures::{StreamExt, TryStreamExt, stream};
use reqwest::Client;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use crate::http::{build_client, send_with_retry};

const CSRF_PATH: &str = "/council/api/csrf.json";
const AGENDA_ITEMS_PATH: &str = "/council/api/multiple/agenda-items.json";
const XSRF_COOKIE: &str = "xsrf-token";
const XSRF_HEADER: &str = "X-XSRF-TOKEN";

/// The council API rejects obvious non-browser clients.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/102.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Cookies and token obtained from the CSRF endpoint, replayed on every search.
#[derive(Debug, Clone)]
pub struct CouncilSession {
    cookie_header: String,
    xsrf_token: String,
}

impl CouncilSession {
    /// Build a session from raw `Set-Cookie` header values.
    pub fn from_set_cookies<S: AsRef<str>>(set_cookies: &[S]) -> Result<Self> {
        if set_cookies.is_empty() {
            return Err(CivicError::AuthenticationFailure(
                "CSRF response did not include cookies".into(),
            ));
        }

        let pairs: Vec<(&str, &str)> = set_cookies
            .iter()
            .filter_map(|raw| {
                let pair = raw.as_ref().split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                Some((name.trim(), value.trim()))
            })
            .collect();

        let xsrf_token = pairs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(XSRF_COOKIE))
            .map(|(_, value)| value.to_string())
            .ok_or_else(|| {
                CivicError::AuthenticationFailure("no XSRF-TOKEN cookie present".into())
            })?;
        if xsrf_token.is_empty() {
            return Err(CivicError::AuthenticationFailure(
                "XSRF-TOKEN cookie has no value".into(),
            ));
        }

        let cookie_header = pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        Ok(Self {
            cookie_header,
            xsrf_token,
        })
    }

    pub fn xsrf_token(&self) -> &str {
        &self.xsrf_token
    }

    pub fn cookie_header(&self) -> &str {
        &self.cookie_header
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgendaFilter {
    include_title: &'static str,
    include_summary: &'static str,
    include_recommendations: &'static str,
    include_decisions: &'static str,
    meeting_from_date: String,
    meeting_to_date: String,
}

impl AgendaFilter {
    fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            include_title: "True",
            include_summary: "True",
            include_recommendations: "True",
            include_decisions: "True",
            meeting_from_date: midnight_utc(from),
            meeting_to_date: midnight_utc(to),
        }
    }
}

/// ISO-8601 timestamp for midnight UTC on `date`.
fn midnight_utc(date: NaiveDate) -> String {
    format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"))
}

/// One page of agenda-item search results.
#[derive(Debug, Deserialize)]
struct AgendaPage {
    #[serde(rename = "TotalPages")]
    total_pages: u32,
    #[serde(rename = "Records", default)]
    records: Vec<AgendaItemRecord>,
}

// ---------------------------------------------------------------------------
// CouncilClient
// ---------------------------------------------------------------------------

/// Client for the council agenda-item search API.
pub struct CouncilClient {
    client: Client,
    base_url: Url,
    page_size: u32,
    max_concurrent_pages: usize,
    http: HttpConfig,
}

impl CouncilClient {
    pub fn new(config: &CouncilConfig, http: &HttpConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            CivicError::config(format!("invalid council URL '{}': {e}", config.base_url))
        })?;
        Ok(Self {
            client: build_client(http)?,
            base_url,
            page_size: config.page_size,
            max_concurrent_pages: config.max_concurrent_pages.max(1),
            http: http.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| CivicError::config(format!("invalid council endpoint {path}: {e}")))
    }

    /// Bootstrap a session from the CSRF endpoint.
    #[instrument(skip_all)]
    pub async fn open_session(&self) -> Result<CouncilSession> {
        let url = self.endpoint(CSRF_PATH)?;
        let response = send_with_retry(&self.http, || {
            self.client
                .get(url.clone())
                .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
        })
        .await
        .map_err(|e| CivicError::RequestFailure(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CivicError::RequestFailure(format!(
                "CSRF bootstrap failed with HTTP {status}"
            )));
        }

        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();

        debug!(cookies = set_cookies.len(), "CSRF cookies received");
        CouncilSession::from_set_cookies(&set_cookies)
    }

    /// Fetch every agenda item with a meeting between `from` and `to`,
    /// opening a fresh session first.
    pub async fn fetch_agenda_items(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AgendaItemRecord>> {
        let session = self.open_session().await?;
        self.fetch_agenda_items_with(&session, from, to).await
    }

    /// Fetch every agenda item in range using an existing session.
    ///
    /// Page 0 is fetched first because it declares the page count; the rest
    /// are fetched concurrently, at most `max_concurrent_pages` at a time. Records keep their order within a page, but
    /// callers must not assume any ordering across pages.
    #[instrument(skip_all, fields(from = %from, to = %to))]
    pub async fn fetch_agenda_items_with(
        &self,
        session: &CouncilSession,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AgendaItemRecord>> {
        if from > to {
            return Err(CivicError::validation(format!(
                "meeting range starts after it ends ({from} > {to})"
            )));
        }
        let filter = AgendaFilter::new(from, to);

        let first = self.fetch_page(session, &filter, 0).await?;
        let total_pages = first.total_pages;
        let mut records = first.records;

        let remaining: Vec<AgendaPage> = stream::iter(1..total_pages)
            .map(|page| self.fetch_page(session, &filter, page))
            .buffer_unordered(self.max_concurrent_pages)
            .try_collect()
            .await?;
        for page in remaining {
            records.extend(page.records);
        }

        info!(total_pages, records = records.len(), "agenda items fetched");
        Ok(records)
    }

    async fn fetch_page(
        &self,
        session: &CouncilSession,
        filter: &AgendaFilter,
        page: u32,
    ) -> Result<AgendaPage> {
        let mut url = self.endpoint(AGENDA_ITEMS_PATH)?;
        url.query_pairs_mut()
            .append_pair("pageNumber", &page.to_string())
            .append_pair("pageSize", &self.page_size.to_string())
            .append_pair("sortOrder", "meetingDate");

        let response = send_with_retry(&self.http, || {
            self.client
                .post(url.clone())
                .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
                .header(COOKIE, session.cookie_header())
                .header(XSRF_HEADER, session.xsrf_token())
                .json(filter)
        })
        .await
        .map_err(|e| CivicError::RequestFailure(format!("agenda page {page}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CivicError::RequestFailure(format!(
                "agenda page {page} failed with HTTP {status}"
            )));
        }

        let body: AgendaPage = response
            .json()
            .await
            .map_err(|e| CivicError::RequestFailure(format!("agenda page {page}: invalid JSON: {e}")))?;

        if page < body.total_pages && body.records.is_empty() {
            return Err(CivicError::EmptyPage {
                page,
                total_pages: body.total_pages,
            });
        }

        debug!(page, records = body.records.len(), "agenda page fetched");
        Ok(body)
    }
}
