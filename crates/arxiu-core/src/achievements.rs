//! Achievement rules and their evaluation against the activity log.
//!
//! An [`Achievement`] stores its rule as JSON; [`AchievementRule`] is the
//! typed form. After every activity append, [`AchievementEvaluator::evaluate`]
//! pulls the candidate definitions for the activity's rule code (plus the
//! global ones without a rule-code filter), checks each rule against the
//! user's filtered history, and awards the matches.
//!
//! The candidate cache is read-mostly: lookups take the read lock, the
//! first load and [`invalidate`](AchievementEvaluator::invalidate) take the
//! write lock.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::{Achievement, UserAchievement, UserActivity};
use crate::store::Store;

/// Activity status counted as approved by `ratio_approved`.
pub const STATUS_APPROVED: &str = "validat";

/// Restricts which activities a rule looks at. Empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityFilter {
    pub rule_codes: Vec<String>,
    pub actions: Vec<String>,
    pub object_type: Option<String>,
    pub status: Option<String>,
}

impl ActivityFilter {
    pub fn matches(&self, a: &UserActivity) -> bool {
        (self.rule_codes.is_empty() || self.rule_codes.contains(&a.rule_code))
            && (self.actions.is_empty() || self.actions.contains(&a.action))
            && self.object_type.as_ref().map_or(true, |t| *t == a.object_type)
            && self.status.as_ref().map_or(true, |s| *s == a.status)
    }
}

/// Sliding window of a `burst_count` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BurstWindow {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "48h")]
    TwoDays,
    #[serde(rename = "7d")]
    Week,
}

impl BurstWindow {
    pub fn duration(&self) -> Duration {
        match self {
            BurstWindow::Day => Duration::hours(24),
            BurstWindow::TwoDays => Duration::hours(48),
            BurstWindow::Week => Duration::days(7),
        }
    }
}

/// Typed achievement rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AchievementRule {
    Count {
        threshold: i64,
        #[serde(default)]
        filter: ActivityFilter,
    },
    SumPoints {
        threshold: i64,
        #[serde(default)]
        filter: ActivityFilter,
    },
    BurstCount {
        threshold: i64,
        window: BurstWindow,
        #[serde(default)]
        filter: ActivityFilter,
    },
    StreakDays {
        min_days: i64,
        #[serde(default)]
        filter: ActivityFilter,
    },
    CountDistinct {
        threshold: i64,
        #[serde(default)]
        filter: ActivityFilter,
    },
    RatioApproved {
        min_ratio: f64,
        #[serde(default)]
        min_total: Option<i64>,
        #[serde(default)]
        filter: ActivityFilter,
    },
}

impl AchievementRule {
    pub fn parse(rule: &serde_json::Value) -> Result<AchievementRule> {
        serde_json::from_value(rule.clone()).context("invalid achievement rule")
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AchievementRule::Count { .. } => "count",
            AchievementRule::SumPoints { .. } => "sum_points",
            AchievementRule::BurstCount { .. } => "burst_count",
            AchievementRule::StreakDays { .. } => "streak_days",
            AchievementRule::CountDistinct { .. } => "count_distinct",
            AchievementRule::RatioApproved { .. } => "ratio_approved",
        }
    }

    pub fn filter(&self) -> &ActivityFilter {
        match self {
            AchievementRule::Count { filter, .. }
            | AchievementRule::SumPoints { filter, .. }
            | AchievementRule::BurstCount { filter, .. }
            | AchievementRule::StreakDays { filter, .. }
            | AchievementRule::CountDistinct { filter, .. }
            | AchievementRule::RatioApproved { filter, .. } => filter,
        }
    }

    /// Check the rule against a user's history at time `now`.
    pub fn check(&self, history: &[UserActivity], now: DateTime<Utc>) -> bool {
        let filter = self.filter();
        let acts: Vec<&UserActivity> = history.iter().filter(|a| filter.matches(a)).collect();
        match self {
            AchievementRule::Count { threshold, .. } => acts.len() as i64 >= *threshold,
            AchievementRule::SumPoints { threshold, .. } => {
                acts.iter().map(|a| a.points).sum::<i64>() >= *threshold
            }
            AchievementRule::BurstCount {
                threshold, window, ..
            } => {
                let from = now - window.duration();
                let n = acts
                    .iter()
                    .filter(|a| a.created_at > from && a.created_at <= now)
                    .count();
                n as i64 >= *threshold
            }
            AchievementRule::StreakDays { min_days, .. } => {
                longest_streak(acts.iter().map(|a| a.created_at.date_naive())) >= *min_days
            }
            AchievementRule::CountDistinct { threshold, .. } => {
                let distinct: HashSet<(&str, i64)> = acts
                    .iter()
                    .map(|a| (a.object_type.as_str(), a.object_id))
                    .collect();
                distinct.len() as i64 >= *threshold
            }
            AchievementRule::RatioApproved {
                min_ratio,
                min_total,
                ..
            } => {
                let total = acts.len() as i64;
                if total == 0 || total < min_total.unwrap_or(0) {
                    return false;
                }
                let approved = acts.iter().filter(|a| a.status == STATUS_APPROVED).count();
                approved as f64 / total as f64 >= *min_ratio
            }
        }
    }
}

/// Longest run of consecutive calendar days.
pub fn longest_streak(days: impl IntoIterator<Item = NaiveDate>) -> i64 {
    let days: BTreeSet<NaiveDate> = days.into_iter().collect();
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for d in days {
        run = match prev {
            Some(p) if p.succ_opt() == Some(d) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(d);
    }
    best
}

fn in_window(a: &Achievement, at: DateTime<Utc>) -> bool {
    a.event_start.map_or(true, |s| at >= s) && a.event_end.map_or(true, |e| at <= e)
}

#[derive(Default)]
struct CandidateCache {
    loaded: bool,
    by_rule: HashMap<String, Vec<Achievement>>,
    globals: Vec<Achievement>,
}

/// Result of evaluating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub achievement_id: i64,
    pub code: String,
    pub rule_type: String,
    pub passed: bool,
    /// True when the award was persisted (never in dry-run mode).
    pub awarded: bool,
}

/// Evaluates achievements with a shared candidate cache.
#[derive(Default)]
pub struct AchievementEvaluator {
    cache: RwLock<CandidateCache>,
}

impl AchievementEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cache; the next evaluation reloads definitions.
    pub fn invalidate(&self) {
        *self.cache.write().unwrap() = CandidateCache::default();
        debug!("achievement cache invalidated");
    }

    fn cached(&self, rule_code: &str) -> Option<Vec<Achievement>> {
        let cache = self.cache.read().unwrap();
        if !cache.loaded {
            return None;
        }
        let mut out = cache.by_rule.get(rule_code).cloned().unwrap_or_default();
        out.extend(cache.globals.iter().cloned());
        Some(out)
    }

    /// Enabled definitions relevant to `rule_code`.
    pub async fn candidates(&self, store: &dyn Store, rule_code: &str) -> Result<Vec<Achievement>> {
        if let Some(found) = self.cached(rule_code) {
            return Ok(found);
        }
        let all = store.list_achievements().await?;
        let mut fresh = CandidateCache {
            loaded: true,
            ..Default::default()
        };
        for a in all.into_iter().filter(|a| a.enabled) {
            let rule = match AchievementRule::parse(&a.rule) {
                Ok(r) => r,
                Err(e) => {
                    warn!(code = %a.code, error = %e, "skipping achievement with invalid rule");
                    continue;
                }
            };
            let codes = &rule.filter().rule_codes;
            if codes.is_empty() {
                fresh.globals.push(a);
            } else {
                for c in codes {
                    fresh.by_rule.entry(c.clone()).or_default().push(a.clone());
                }
            }
        }
        {
            let mut cache = self.cache.write().unwrap();
            if !cache.loaded {
                *cache = fresh;
            }
        }
        Ok(self.cached(rule_code).unwrap_or_default())
    }

    /// Evaluate every candidate for `trigger`. With `dry_run`, nothing is
    /// persisted.
    pub async fn evaluate(
        &self,
        store: &dyn Store,
        trigger: &UserActivity,
        dry_run: bool,
    ) -> Result<Vec<Evaluation>> {
        let candidates = self.candidates(store, &trigger.rule_code).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let history = store.list_activities(trigger.user_id).await?;
        let mut out = Vec::new();
        for a in candidates {
            if !in_window(&a, trigger.created_at) {
                continue;
            }
            if !a.repeatable && store.has_user_achievement(trigger.user_id, a.id).await? {
                continue;
            }
            let rule = AchievementRule::parse(&a.rule)?;
            let passed = rule.check(&history, trigger.created_at);
            let mut awarded = false;
            if passed && !dry_run {
                let metadata = json!({
                    "rule_type": rule.type_name(),
                    "achievement_code": a.code,
                    "evaluated_at": Utc::now().to_rfc3339(),
                    "trigger": {
                        "rule_code": trigger.rule_code,
                        "action": trigger.action,
                        "object_type": trigger.object_type,
                        "object_id": trigger.object_id,
                    },
                });
                store
                    .award_achievement(&UserAchievement {
                        id: 0,
                        user_id: trigger.user_id,
                        achievement_id: a.id,
                        awarded_at: Utc::now(),
                        metadata,
                    })
                    .await?;
                awarded = true;
                info!(user = trigger.user_id, code = %a.code, "achievement awarded");
            }
            out.push(Evaluation {
                achievement_id: a.id,
                code: a.code.clone(),
                rule_type: rule.type_name().to_string(),
                passed,
                awarded,
            });
        }
        Ok(out)
    }
}

/// Append `activity` and, with an evaluator, run achievement evaluation.
///
/// Evaluation failures are logged; the appended activity id is returned.
pub async fn record_activity(
    store: &dyn Store,
    evaluator: Option<&AchievementEvaluator>,
    activity: &UserActivity,
) -> Result<i64> {
    let id = store.append_activity(activity).await?;
    if let Some(ev) = evaluator {
        if let Err(e) = ev.evaluate(store, activity, false).await {
            warn!(user = activity.user_id, error = %e, "achievement evaluation failed");
        }
    }
    Ok(id)
}

/// Build an activity stamped now.
pub fn activity(
    user_id: i64,
    rule_code: &str,
    action: &str,
    object_type: &str,
    object_id: i64,
    points: i64,
    status: &str,
) -> UserActivity {
    UserActivity {
        id: 0,
        user_id,
        rule_code: rule_code.to_string(),
        action: action.to_string(),
        object_type: object_type.to_string(),
        object_id,
        points,
        status: status.to_string(),
        created_at: Utc::now(),
        details: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn act(rule_code: &str, object_id: i64, status: &str, when: DateTime<Utc>) -> UserActivity {
        let mut a = activity(1, rule_code, "crear", "registre", object_id, 2, status);
        a.created_at = when;
        a
    }

    fn definition(code: &str, rule: serde_json::Value, repeatable: bool) -> Achievement {
        Achievement {
            id: 0,
            code: code.into(),
            name: code.into(),
            rule,
            repeatable,
            enabled: true,
            event_start: None,
            event_end: None,
        }
    }

    #[test]
    fn test_rule_json_shapes() {
        let rule = AchievementRule::parse(&json!({
            "type": "burst_count",
            "threshold": 3,
            "window": "48h",
            "filter": {"rule_codes": ["transcripcio.creada"]}
        }))
        .unwrap();
        assert_eq!(rule.type_name(), "burst_count");
        assert_eq!(rule.filter().rule_codes, vec!["transcripcio.creada"]);
        assert!(AchievementRule::parse(&json!({"type": "nope"})).is_err());
    }

    #[test]
    fn test_rule_checks() {
        let now = at(10, 12);
        let history = vec![
            act("transcripcio.creada", 1, "validat", at(7, 9)),
            act("transcripcio.creada", 1, "validat", at(8, 9)),
            act("transcripcio.creada", 2, "rebutjat", at(9, 23)),
            act("transcripcio.creada", 3, "validat", at(10, 11)),
            act("altres", 4, "validat", at(10, 11)),
        ];
        let f = ActivityFilter {
            rule_codes: vec!["transcripcio.creada".into()],
            ..Default::default()
        };
        let check = |r: AchievementRule| r.check(&history, now);

        assert!(check(AchievementRule::Count { threshold: 4, filter: f.clone() }));
        assert!(!check(AchievementRule::Count { threshold: 5, filter: f.clone() }));
        assert!(check(AchievementRule::SumPoints { threshold: 8, filter: f.clone() }));
        assert!(check(AchievementRule::BurstCount {
            threshold: 2,
            window: BurstWindow::Day,
            filter: f.clone()
        }));
        assert!(!check(AchievementRule::BurstCount {
            threshold: 3,
            window: BurstWindow::Day,
            filter: f.clone()
        }));
        assert!(check(AchievementRule::StreakDays { min_days: 4, filter: f.clone() }));
        assert!(check(AchievementRule::CountDistinct { threshold: 3, filter: f.clone() }));
        assert!(!check(AchievementRule::CountDistinct { threshold: 4, filter: f.clone() }));
        assert!(check(AchievementRule::RatioApproved {
            min_ratio: 0.75,
            min_total: Some(4),
            filter: f.clone()
        }));
        assert!(!check(AchievementRule::RatioApproved {
            min_ratio: 0.75,
            min_total: Some(5),
            filter: f
        }));
    }

    #[test]
    fn test_longest_streak() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        assert_eq!(longest_streak([d(1), d(2), d(4), d(5), d(6), d(5)]), 3);
        assert_eq!(longest_streak(Vec::<NaiveDate>::new()), 0);
    }

    #[tokio::test]
    async fn test_non_repeatable_awarded_once_and_dry_run() {
        let store = InMemoryStore::new();
        store
            .insert_achievement(&definition(
                "primer",
                json!({"type": "count", "threshold": 1, "filter": {"rule_codes": ["transcripcio.creada"]}}),
                false,
            ))
            .await
            .unwrap();
        store
            .insert_achievement(&definition(
                "global",
                json!({"type": "count", "threshold": 100}),
                false,
            ))
            .await
            .unwrap();
        let ev = AchievementEvaluator::new();

        let a = act("transcripcio.creada", 1, "validat", Utc::now());
        store.append_activity(&a).await.unwrap();
        let dry = ev.evaluate(&store, &a, true).await.unwrap();
        assert_eq!(dry.len(), 2);
        assert!(dry.iter().any(|e| e.code == "primer" && e.passed && !e.awarded));
        assert!(store.list_user_achievements(1).await.unwrap().is_empty());

        record_activity(&store, Some(&ev), &a).await.unwrap();
        record_activity(&store, Some(&ev), &a).await.unwrap();
        let awards = store.list_user_achievements(1).await.unwrap();
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].metadata["rule_type"], "count");
        assert_eq!(awards[0].metadata["achievement_code"], "primer");
    }

    #[tokio::test]
    async fn test_invalidate_reloads_definitions() {
        let store = InMemoryStore::new();
        let ev = AchievementEvaluator::new();
        assert!(ev.candidates(&store, "x").await.unwrap().is_empty());
        store
            .insert_achievement(&definition("nou", json!({"type": "count", "threshold": 1}), true))
            .await
            .unwrap();
        assert!(ev.candidates(&store, "x").await.unwrap().is_empty());
        ev.invalidate();
        assert_eq!(ev.candidates(&store, "x").await.unwrap().len(), 1);
    }
}
