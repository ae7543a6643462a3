//! Command handlers.
//!
//! Data commands print the saved value right away, wait for revalidation to
//! settle, then print the result again if it changed.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use fieldcache_core::config::{ENV_EMAIL, ENV_PASSWORD};
use fieldcache_core::models::Scheme;
use fieldcache_core::{CachedApi, CachedQuery, Config, QueryCache, QueryState, Session};

use crate::render;

/// Print a query before and after revalidation.
async fn show<T>(query: &CachedQuery<T>, format: impl Fn(&T) -> String) -> Result<()>
where
    T: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    let before = query.snapshot();
    print_state(&before, &format);

    query.settled().await;
    let after = query.snapshot();
    if after.data != before.data {
        println!();
        print_state(&after, &format);
    } else {
        println!("{}", render::status_line(&after));
    }

    if after.data.is_none() {
        if let Some(error) = after.last_error {
            bail!("Nothing saved for {} and fetch failed: {}", after.key, error.message);
        }
    }
    Ok(())
}

fn print_state<T>(state: &QueryState<T>, format: &impl Fn(&T) -> String) {
    println!("{}", render::status_line(state));
    match &state.data {
        Some(data) => println!("{}", format(data)),
        None if state.loading => {}
        None => println!("(nothing saved yet)"),
    }
}

pub async fn progress(api: &CachedApi) -> Result<()> {
    show(&api.progress().await, render::progress).await
}

pub async fn tip(api: &CachedApi, lang: &str) -> Result<()> {
    show(&api.tip_of_the_day(lang).await, |tip: &String| tip.clone()).await
}

pub async fn lesson(api: &CachedApi, id: i64, lang: &str, then_lang: Option<&str>) -> Result<()> {
    let query = api.lesson_detail(id, lang).await;
    show(&query, render::lesson).await?;

    if let Some(next) = then_lang {
        println!();
        api.switch_lesson(&query, id, next).await;
        show(&query, render::lesson).await?;
    }
    Ok(())
}

pub async fn schemes(api: &CachedApi, lang: &str) -> Result<()> {
    show(&api.schemes(lang).await, |s: &Vec<Scheme>| render::schemes(s)).await
}

pub async fn profile(api: &CachedApi) -> Result<()> {
    show(&api.profile().await, render::profile).await
}

pub async fn ages(cache: &QueryCache) -> Result<()> {
    let ages = cache.cache_ages().await?;
    if ages.is_empty() {
        println!("Nothing saved yet");
        return Ok(());
    }
    let width = ages.keys().map(|k| k.len()).max().unwrap_or(0);
    for (key, age) in ages {
        println!("{:width$}  {}", key, age, width = width);
    }
    Ok(())
}

pub async fn login(config: &mut Config, session: &mut Session, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt(&format!("Email (or set {}): ", ENV_EMAIL))?,
    };
    if email.is_empty() {
        bail!("An email address is required to sign in");
    }

    let password = match std::env::var(ENV_PASSWORD).ok().filter(|p| !p.is_empty()) {
        Some(password) => password,
        None => rpassword::prompt_password(format!("Password for {}: ", email))
            .context("Failed to read password")?,
    };

    let (url, key) = config.api_settings()?;
    let api = fieldcache_core::ApiClient::new(url, key)?;
    let data = api.authenticate(&email, &password).await?;
    info!(user_id = %data.user_id, "Signed in");

    session.update(data);
    session.save()?;

    config.last_email = Some(email.clone());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Signed in as {}", email);
    Ok(())
}

/// Sign out and drop the saved data of the signed-in user.
pub async fn logout(session: &mut Session, cache: &QueryCache) -> Result<()> {
    session.clear()?;
    let removed = cache.clear().await?;
    println!("Signed out, removed {} saved entries", removed);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
