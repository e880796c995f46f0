//! Achievement definitions and per-user awards.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::path::Path;

use arxiu_core::achievements::{activity, AchievementEvaluator, AchievementRule};
use arxiu_core::models::Achievement;
use arxiu_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Options of `achievement add`.
pub struct AchievementOptions {
    pub code: String,
    pub name: String,
    pub rule: std::path::PathBuf,
    pub repeatable: bool,
    pub disabled: bool,
    pub from: Option<String>,
    pub until: Option<String>,
}

fn parse_day(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}' (expected YYYY-MM-DD)", s))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    match time {
        Some(t) => Ok(t.and_utc()),
        None => bail!("Invalid date '{}'", s),
    }
}

fn read_rule(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule: {}", path.display()))?;
    let rule: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON: {}", path.display()))?;
    AchievementRule::parse(&rule)?;
    Ok(rule)
}

pub async fn run_add(config: &Config, opts: AchievementOptions) -> Result<()> {
    let rule = read_rule(&opts.rule)?;
    let event_start = opts.from.as_deref().map(|s| parse_day(s, false)).transpose()?;
    let event_end = opts.until.as_deref().map(|s| parse_day(s, true)).transpose()?;
    if let (Some(s), Some(e)) = (event_start, event_end) {
        if e < s {
            bail!("--until must not be before --from");
        }
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let id = store
        .insert_achievement(&Achievement {
            id: 0,
            code: opts.code.clone(),
            name: opts.name,
            rule,
            repeatable: opts.repeatable,
            enabled: !opts.disabled,
            event_start,
            event_end,
        })
        .await?;
    pool.close().await;
    println!("achievement {} created: {}", id, opts.code);
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let all = store.list_achievements().await?;
    pool.close().await;

    if all.is_empty() {
        println!("No achievements.");
        return Ok(());
    }
    println!(
        "{:>5}  {:<24} {:<16} {:<8} {}",
        "ID", "CODE", "RULE", "STATE", "NAME"
    );
    for a in &all {
        let rule = AchievementRule::parse(&a.rule)
            .map(|r| r.type_name())
            .unwrap_or("invalid");
        println!(
            "{:>5}  {:<24} {:<16} {:<8} {}",
            a.id,
            a.code,
            rule,
            if a.enabled { "enabled" } else { "disabled" },
            a.name
        );
    }
    Ok(())
}

pub async fn run_user(config: &Config, user_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let activities = store.list_activities(user_id).await?;
    let awards = store.list_user_achievements(user_id).await?;
    let names: HashMap<i64, String> = store
        .list_achievements()
        .await?
        .into_iter()
        .map(|a| (a.id, a.code))
        .collect();
    pool.close().await;

    let points: i64 = activities.iter().map(|a| a.points).sum();
    println!("user {}", user_id);
    println!("  activities: {}", activities.len());
    println!("  points: {}", points);
    println!("  achievements: {}", awards.len());
    for aw in &awards {
        println!(
            "    {}  {}",
            aw.awarded_at.format("%Y-%m-%d %H:%M"),
            names
                .get(&aw.achievement_id)
                .map(String::as_str)
                .unwrap_or("(removed)")
        );
    }
    Ok(())
}

/// Evaluate candidates for a hypothetical activity without persisting
/// anything.
pub async fn run_evaluate(config: &Config, user_id: i64, rule_code: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let evaluator = AchievementEvaluator::new();
    let trigger = activity(user_id, rule_code, "", "", 0, 0, "");
    let results = evaluator.evaluate(&store, &trigger, true).await?;
    pool.close().await;

    if results.is_empty() {
        println!("No candidate achievements for '{}'.", rule_code);
        return Ok(());
    }
    for r in &results {
        println!(
            "{:<24} {:<16} {}",
            r.code,
            r.rule_type,
            if r.passed { "pass" } else { "-" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_day_bounds() {
        let start = parse_day("2024-03-01", false).unwrap();
        let end = parse_day("2024-03-01", true).unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-03-01T23:59:59+00:00");
        assert!(parse_day("01/03/2024", false).is_err());
    }
}
