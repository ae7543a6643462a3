//! API client for the hosted data service.
//!
//! The service exposes PostgREST-style tables under `/rest/v1` and password
//! sign-in under `/auth/v1`. Every request carries the project API key; data
//! requests also carry the user's bearer token when signed in.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{header, Client, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::auth::SessionData;
use crate::models::lesson::Lesson;
use crate::models::progress::{CoinsRow, UserQuestRow};
use crate::models::scheme::SchemeRow;
use crate::models::{LessonDetail, ProfileScore, ProfileStats, Scheme, UserProgress};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Rural connections are slow; 30s still fails fast enough to show cached data.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Header carrying the project API key
const API_KEY_HEADER: &str = "apikey";

#[derive(Debug, Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// API client for the hosted data service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API URL: {}", base_url))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Sign in with email and password and return session data
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<SessionData> {
        self.token_grant("password", &PasswordGrant { email, password }, email)
            .await
            .context("Failed to sign in")
    }

    /// Exchange a refresh token for a new session
    pub async fn refresh_session(&self, refresh_token: &str, email: &str) -> Result<SessionData> {
        self.token_grant("refresh_token", &RefreshGrant { refresh_token }, email)
            .await
            .context("Failed to renew session")
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: &impl Serialize,
        email: &str,
    ) -> Result<SessionData> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ApiError::from)?;

        let response = Self::check_response(response).await?;
        let auth: AuthResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        Ok(SessionData {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            user_id: auth.user.id,
            email: auth.user.email.unwrap_or_else(|| email.to_string()),
            created_at: Utc::now(),
            expires_in_secs: auth.expires_in,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    fn table_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.endpoint(&format!("rest/v1/{}", table))?;
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(API_KEY_HEADER, header::HeaderValue::from_str(&self.api_key)?);
        let bearer = self.token.as_deref().unwrap_or(&self.api_key);
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", bearer))?,
        );
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Check response status, returning None for rate limits (to trigger retry)
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    async fn check_response(response: Response) -> Result<Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Send a request, backing off and retrying while rate limited
    async fn send(&self, url: &Url, build: impl Fn(&Url) -> RequestBuilder) -> Result<Response> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build(url)
                .headers(self.auth_headers()?)
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send request to {}", url.path()))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(path = url.path(), retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    /// Select rows from a table
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut params = vec![("select", columns.to_string())];
        params.extend(filters.iter().cloned());
        let url = self.table_url(table, &params)?;

        let response = self.send(&url, |url| self.client.get(url.clone())).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse rows from {}", table))
    }

    /// Exact number of rows matching `filters`, without transferring them
    async fn count(&self, table: &str, filters: &[(&str, String)]) -> Result<u64> {
        let url = self.table_url(table, filters)?;
        let response = self
            .send(&url, |url| {
                self.client
                    .head(url.clone())
                    .header("Prefer", "count=exact")
            })
            .await?;

        let range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::InvalidResponse(format!("No row count for {}", table)))?;
        parse_content_range(range)
            .ok_or_else(|| ApiError::InvalidResponse(format!("Bad row count for {}: {}", table, range)).into())
    }

    // ===== Dashboard =====

    pub async fn fetch_user_progress(&self, user_id: &str) -> Result<UserProgress> {
        let user_filter = ("user_id", format!("eq.{}", user_id));

        let coins: Vec<CoinsRow> = self
            .select("profiles", "coins", &[("id", format!("eq.{}", user_id))])
            .await?;
        let total_lessons = self.count("lessons", &[]).await?;
        let completed_lessons = self.count("user_lessons", &[user_filter.clone()]).await?;

        // A failing quest lookup should not hide the rest of the dashboard
        let active_quest = match self
            .select::<UserQuestRow>(
                "user_quests",
                "status,quest:quests(id,title,description)",
                &[user_filter],
            )
            .await
        {
            Ok(rows) => rows.into_iter().find_map(|row| row.quest),
            Err(e) => {
                warn!(error = %e, "Failed to fetch active quest");
                None
            }
        };

        Ok(UserProgress {
            total_lessons,
            completed_lessons,
            user_coins: coins.first().and_then(|row| row.coins).unwrap_or(0),
            active_quest,
        })
    }

    // ===== Lessons =====

    pub async fn fetch_lesson_detail(
        &self,
        lesson_id: i64,
        lang: &str,
        user_id: Option<&str>,
    ) -> Result<LessonDetail> {
        let rows: Vec<Map<String, Value>> = self
            .select("lessons", "*", &[("id", format!("eq.{}", lesson_id))])
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| ApiError::NotFound(format!("lesson {}", lesson_id)))?;
        let lesson = Lesson::from_row(row, lang)?;

        let is_completed = match user_id {
            Some(user_id) => {
                let done = self
                    .count(
                        "user_lessons",
                        &[
                            ("user_id", format!("eq.{}", user_id)),
                            ("lesson_id", format!("eq.{}", lesson_id)),
                        ],
                    )
                    .await?;
                done > 0
            }
            None => false,
        };

        debug!(lesson_id, lang, is_completed, "Fetched lesson detail");
        Ok(LessonDetail {
            lesson,
            is_completed,
        })
    }

    // ===== Schemes =====

    pub async fn fetch_schemes(&self, lang: &str) -> Result<Vec<Scheme>> {
        let rows: Vec<SchemeRow> = self
            .select(
                "gov_schemes",
                "id,icon,color,title_en,title_hi,desc_en,desc_hi",
                &[],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.localize(lang)).collect())
    }

    // ===== Profile =====

    pub async fn fetch_profile_score(&self, user_id: &str) -> Result<Option<ProfileScore>> {
        let rows: Vec<Map<String, Value>> = self
            .select("profiles", "*", &[("id", format!("eq.{}", user_id))])
            .await?;
        let Some(profile) = rows.into_iter().next() else {
            return Ok(None);
        };

        let user_filter = ("user_id", format!("eq.{}", user_id));
        let total_lessons = self.count("lessons", &[]).await?;
        let completed_lessons = self.count("user_lessons", &[user_filter.clone()]).await?;

        let crop_filter = match profile.get("selected_crop").and_then(Value::as_str) {
            Some(crop) => ("or", format!("(target_crop.is.null,target_crop.eq.{})", crop)),
            None => ("target_crop", "is.null".to_string()),
        };
        let total_quests = self.count("quests", &[crop_filter]).await?;
        let completed_quests = self.count("user_quests", &[user_filter]).await?;

        let stats = ProfileStats {
            completed_lessons,
            total_lessons,
            completed_quests,
            total_quests,
        };
        Ok(Some(ProfileScore::new(profile, stats)))
    }
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/42`
fn parse_content_range(range: &str) -> Option<u64> {
    range.rsplit_once('/')?.1.trim().parse().ok()
}

// ============================================================================
// Tests
// ============================================================================
