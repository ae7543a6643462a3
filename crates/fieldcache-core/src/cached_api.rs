//! Cached API that wraps `ApiClient` with the query cache.
//!
//! Each method opens a `CachedQuery` under a structured key, with the
//! matching `ApiClient` call as its fetcher. This is the one place where
//! screen data keys are defined.

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};

use crate::api::ApiClient;
use crate::cache::{CachedQuery, QueryCache, QueryKey};
use crate::models::{LessonDetail, ProfileScore, Scheme, UserProgress};

/// Cache keys for each kind of screen data.
pub mod keys {
    use super::QueryKey;

    pub fn progress(user_id: Option<&str>) -> QueryKey {
        QueryKey::new("dashboard_progress").with("user", user_id.unwrap_or(""))
    }

    pub fn tip_of_the_day(lang: &str) -> QueryKey {
        QueryKey::new("dashboard_tip_of_day").with("lang", lang)
    }

    pub fn lesson_detail(lesson_id: i64, lang: &str, user_id: Option<&str>) -> QueryKey {
        QueryKey::new("lesson_detail")
            .with("id", lesson_id)
            .with("lang", lang)
            .with("user", user_id.unwrap_or(""))
    }

    pub fn schemes(lang: &str) -> QueryKey {
        QueryKey::new("gov_schemes").with("lang", lang)
    }

    pub fn profile(user_id: Option<&str>) -> QueryKey {
        QueryKey::new("profile_score").with("user", user_id.unwrap_or(""))
    }
}

/// Data access for screens, always through the cache.
#[derive(Clone)]
pub struct CachedApi {
    api: ApiClient,
    cache: QueryCache,
    user_id: Option<String>,
}

impl CachedApi {
    pub fn new(api: ApiClient, cache: QueryCache, user_id: Option<String>) -> Self {
        Self {
            api,
            cache,
            user_id,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Dashboard progress. Signed-out users see an empty summary.
    pub async fn progress(&self) -> CachedQuery<UserProgress> {
        let api = self.api.clone();
        let user_id = self.user_id.clone();
        self.cache
            .query(keys::progress(self.user_id.as_deref()), move || {
                let api = api.clone();
                let user_id = user_id.clone();
                async move {
                    match user_id {
                        Some(user_id) => api.fetch_user_progress(&user_id).await,
                        None => Ok(UserProgress::default()),
                    }
                }
            })
            .await
    }

    pub async fn tip_of_the_day(&self, lang: &str) -> CachedQuery<String> {
        let lang_owned = lang.to_string();
        self.cache
            .query(keys::tip_of_the_day(lang), move || {
                let tip = tip_of_the_day(&lang_owned).to_string();
                async move { anyhow::Ok(tip) }
            })
            .await
    }

    pub async fn lesson_detail(&self, lesson_id: i64, lang: &str) -> CachedQuery<LessonDetail> {
        self.cache
            .query(
                keys::lesson_detail(lesson_id, lang, self.user_id.as_deref()),
                self.lesson_fetcher(lesson_id, lang),
            )
            .await
    }

    /// Point an open lesson query at another lesson or language.
    pub async fn switch_lesson(
        &self,
        query: &CachedQuery<LessonDetail>,
        lesson_id: i64,
        lang: &str,
    ) {
        query
            .set_key(
                keys::lesson_detail(lesson_id, lang, self.user_id.as_deref()),
                self.lesson_fetcher(lesson_id, lang),
            )
            .await
    }

    fn lesson_fetcher(
        &self,
        lesson_id: i64,
        lang: &str,
    ) -> impl Fn() -> BoxFuture<'static, Result<LessonDetail>> + Send + Sync + 'static {
        let api = self.api.clone();
        let user_id = self.user_id.clone();
        let lang = lang.to_string();
        move || {
            let api = api.clone();
            let user_id = user_id.clone();
            let lang = lang.clone();
            async move {
                api.fetch_lesson_detail(lesson_id, &lang, user_id.as_deref())
                    .await
            }
            .boxed()
        }
    }

    pub async fn schemes(&self, lang: &str) -> CachedQuery<Vec<Scheme>> {
        let api = self.api.clone();
        let lang_owned = lang.to_string();
        self.cache
            .query(keys::schemes(lang), move || {
                let api = api.clone();
                let lang = lang_owned.clone();
                async move { api.fetch_schemes(&lang).await }
            })
            .await
    }

    /// Profile and sustainability score; `None` when signed out or the
    /// profile row does not exist yet.
    pub async fn profile(&self) -> CachedQuery<Option<ProfileScore>> {
        let api = self.api.clone();
        let user_id = self.user_id.clone();
        self.cache
            .query(keys::profile(self.user_id.as_deref()), move || {
                let api = api.clone();
                let user_id = user_id.clone();
                async move {
                    match user_id {
                        Some(user_id) => api.fetch_profile_score(&user_id).await,
                        None => Ok(None),
                    }
                }
            })
            .await
    }
}

/// Daily farming tip. Served locally until the service has a tips table.
pub fn tip_of_the_day(lang: &str) -> &'static str {
    match lang {
        "hi" => "अपनी उपज बेचने से पहले मंडी भाव ज़रूर देखें, ताकि सबसे अच्छा दाम मिले!",
        _ => "Remember to check the market prices before selling your produce for the best value!",
    }
}
