use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Check-in streak length at which the bonus starts.
pub const STREAK_BONUS_MIN_DAYS: u32 = 3;
pub const STREAK_BONUS_PER_DAY: i64 = 2;
pub const STREAK_BONUS_CAP: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    DailyCheckIn,
    TaskCompleted,
    AssessmentCompleted,
    SessionAttended,
    ContentRead,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EarningRule {
    pub activity: ActivityKind,
    pub points: i64,
    /// Maximum number of rewarded activities per UTC day.
    pub daily_cap: u32,
}

fn rule(activity: ActivityKind, points: i64, daily_cap: u32) -> EarningRule {
    EarningRule {
        activity,
        points,
        daily_cap,
    }
}

pub fn default_earning_rules() -> Vec<EarningRule> {
    vec![
        rule(ActivityKind::DailyCheckIn, 5, 1),
        rule(ActivityKind::TaskCompleted, 10, 5),
        rule(ActivityKind::AssessmentCompleted, 20, 2),
        rule(ActivityKind::SessionAttended, 25, 2),
        rule(ActivityKind::ContentRead, 3, 10),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerReason {
    Earned { activity: ActivityKind },
    StreakBonus { days: u32 },
    Redeemed { reward: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub delta: i64,
    pub reason: LedgerReason,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BadgeCriterion {
    Streak { days: u32 },
    TotalPoints { points: i64 },
    ActivityCount { activity: ActivityKind, count: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Badge {
    pub code: String,
    pub name: String,
    pub criterion: BadgeCriterion,
}

pub fn default_badges() -> Vec<Badge> {
    let badge = |code: &str, name: &str, criterion| Badge {
        code: code.to_string(),
        name: name.to_string(),
        criterion,
    };
    let times = |activity, count| BadgeCriterion::ActivityCount { activity, count };
    vec![
        badge("first_step", "First step", times(ActivityKind::DailyCheckIn, 1)),
        badge("week_streak", "Seven days strong", BadgeCriterion::Streak { days: 7 }),
        badge("month_streak", "Thirty days strong", BadgeCriterion::Streak { days: 30 }),
        badge("centurion", "100 points", BadgeCriterion::TotalPoints { points: 100 }),
        badge("self_aware", "Five assessments", times(ActivityKind::AssessmentCompleted, 5)),
    ]
}

/// What an `earn` call recorded.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EarnOutcome {
    pub entries: Vec<LedgerEntry>,
    pub balance: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PointsLedger {
    entries: Vec<LedgerEntry>,
}

impl PointsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    fn push(
        &mut self,
        user_id: Uuid,
        delta: i64,
        reason: LedgerReason,
        at: DateTime<Utc>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            user_id,
            delta,
            reason,
            at,
        };
        self.entries.push(entry.clone());
        entry
    }

    fn user_entries(&self, user_id: Uuid) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().filter(move |e| e.user_id == user_id)
    }

    fn activity_entries(
        &self,
        user_id: Uuid,
        activity: ActivityKind,
    ) -> impl Iterator<Item = &LedgerEntry> {
        self.user_entries(user_id)
            .filter(move |e| e.reason == LedgerReason::Earned { activity })
    }

    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.user_entries(user_id).map(|e| e.delta).sum()
    }

    pub fn activity_count(&self, user_id: Uuid, activity: ActivityKind) -> u32 {
        self.activity_entries(user_id, activity).count() as u32
    }

    /// Record an activity. Returns `None` when the daily cap is already used
    /// up; nothing is written in that case.
    pub fn earn(
        &mut self,
        user_id: Uuid,
        activity: ActivityKind,
        rules: &[EarningRule],
        at: DateTime<Utc>,
    ) -> CoreResult<Option<EarnOutcome>> {
        let rule = rules
            .iter()
            .find(|r| r.activity == activity)
            .ok_or_else(|| CoreError::not_found(format!("earning rule for {activity:?}")))?;

        let day = at.date_naive();
        let used_today = self
            .activity_entries(user_id, activity)
            .filter(|e| e.at.date_naive() == day)
            .count() as u32;
        if used_today >= rule.daily_cap {
            tracing::debug!(user_id = %user_id, activity = ?activity, "daily cap reached");
            return Ok(None);
        }

        let earned = LedgerReason::Earned { activity };
        let mut entries = vec![self.push(user_id, rule.points, earned, at)];

        if activity == ActivityKind::DailyCheckIn {
            let streak = self.streak(user_id, day);
            if streak >= STREAK_BONUS_MIN_DAYS {
                let bonus = (STREAK_BONUS_PER_DAY * i64::from(streak)).min(STREAK_BONUS_CAP);
                let reason = LedgerReason::StreakBonus { days: streak };
                entries.push(self.push(user_id, bonus, reason, at));
            }
        }

        let balance = self.balance(user_id);
        tracing::info!(
            user_id = %user_id,
            activity = ?activity,
            points = entries.iter().map(|e| e.delta).sum::<i64>(),
            balance,
            "points earned"
        );
        Ok(Some(EarnOutcome { entries, balance }))
    }

    pub fn redeem(
        &mut self,
        user_id: Uuid,
        cost: i64,
        reward: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<LedgerEntry> {
        if cost <= 0 {
            return Err(CoreError::validation("cost", "cost must be positive"));
        }
        let balance = self.balance(user_id);
        if balance < cost {
            return Err(CoreError::conflict(format!(
                "insufficient_points: balance {balance} is below cost {cost}"
            )));
        }
        let entry = self.push(
            user_id,
            -cost,
            LedgerReason::Redeemed {
                reward: reward.to_string(),
            },
            at,
        );
        tracing::info!(user_id = %user_id, cost, reward, "points redeemed");
        Ok(entry)
    }

    /// Consecutive check-in days ending today, or yesterday when today has
    /// no check-in yet.
    pub fn streak(&self, user_id: Uuid, today: NaiveDate) -> u32 {
        let days: BTreeSet<NaiveDate> = self
            .activity_entries(user_id, ActivityKind::DailyCheckIn)
            .map(|e| e.at.date_naive())
            .collect();

        let mut cursor = if days.contains(&today) {
            today
        } else {
            today - Duration::days(1)
        };
        let mut streak = 0;
        while days.contains(&cursor) {
            streak += 1;
            cursor -= Duration::days(1);
        }
        streak
    }
}

pub fn evaluate_badges(
    ledger: &PointsLedger,
    user_id: Uuid,
    badges: &[Badge],
    today: NaiveDate,
) -> Vec<String> {
    let streak = ledger.streak(user_id, today);
    let earned_total: i64 = ledger
        .user_entries(user_id)
        .filter(|e| e.delta > 0)
        .map(|e| e.delta)
        .sum();

    badges
        .iter()
        .filter(|b| match &b.criterion {
            BadgeCriterion::Streak { days } => streak >= *days,
            BadgeCriterion::TotalPoints { points } => earned_total >= *points,
            BadgeCriterion::ActivityCount { activity, count } => {
                ledger.activity_count(user_id, *activity) >= *count
            }
        })
        .map(|b| b.code.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn day(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, n, 9, 0, 0).unwrap()
    }

    #[test]
    fn earning_respects_daily_cap() {
        let mut ledger = PointsLedger::new();
        let user = Uuid::now_v7();
        let rules = default_earning_rules();

        let first = ledger.earn(user, ActivityKind::DailyCheckIn, &rules, day(1)).unwrap();
        assert_eq!(first.unwrap().balance, 5);
        let second = ledger.earn(user, ActivityKind::DailyCheckIn, &rules, day(1)).unwrap();
        assert!(second.is_none());
        assert_eq!(ledger.balance(user), 5);

        let mut task = |at| {
            ledger
                .earn(user, ActivityKind::TaskCompleted, &rules, at)
                .unwrap()
                .is_some()
        };
        for _ in 0..5 {
            assert!(task(day(1)));
        }
        assert!(!task(day(1)));
        assert!(task(day(2)));
    }

    #[test]
    fn missing_rule_is_not_found() {
        let mut ledger = PointsLedger::new();
        let err = ledger
            .earn(Uuid::now_v7(), ActivityKind::ContentRead, &[], day(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn streak_bonus_starts_on_third_day() {
        let mut ledger = PointsLedger::new();
        let user = Uuid::now_v7();
        let rules = default_earning_rules();

        ledger.earn(user, ActivityKind::DailyCheckIn, &rules, day(1)).unwrap();
        ledger.earn(user, ActivityKind::DailyCheckIn, &rules, day(2)).unwrap();
        let third = ledger
            .earn(user, ActivityKind::DailyCheckIn, &rules, day(3))
            .unwrap()
            .unwrap();
        assert_eq!(third.entries.len(), 2);
        assert_eq!(third.entries[1].delta, 6);
        assert_eq!(third.entries[1].reason, LedgerReason::StreakBonus { days: 3 });
        assert_eq!(ledger.balance(user), 5 + 5 + 5 + 6);
    }

    #[test]
    fn streak_bonus_is_capped() {
        let mut ledger = PointsLedger::new();
        let user = Uuid::now_v7();
        let rules = default_earning_rules();
        let mut last = None;
        for n in 1..=12 {
            last = ledger.earn(user, ActivityKind::DailyCheckIn, &rules, day(n)).unwrap();
        }
        let last = last.unwrap();
        assert_eq!(last.entries[1].delta, STREAK_BONUS_CAP);
    }

    #[test]
    fn streak_counts_from_yesterday_and_breaks_on_gaps() {
        let mut ledger = PointsLedger::new();
        let user = Uuid::now_v7();
        let rules = default_earning_rules();
        for n in [1, 3, 4, 5] {
            ledger.earn(user, ActivityKind::DailyCheckIn, &rules, day(n)).unwrap();
        }
        assert_eq!(ledger.streak(user, day(5).date_naive()), 3);
        assert_eq!(ledger.streak(user, day(6).date_naive()), 3);
        assert_eq!(ledger.streak(user, day(7).date_naive()), 0);
        assert_eq!(ledger.streak(Uuid::now_v7(), day(5).date_naive()), 0);
    }

    #[test]
    fn redeem_checks_balance_and_cost() {
        let mut ledger = PointsLedger::new();
        let user = Uuid::now_v7();
        let rules = default_earning_rules();
        ledger.earn(user, ActivityKind::SessionAttended, &rules, day(1)).unwrap();

        assert!(matches!(
            ledger.redeem(user, 0, "sticker", day(1)),
            Err(CoreError::Validation { .. })
        ));
        match ledger.redeem(user, 30, "voucher", day(1)) {
            Err(CoreError::Conflict { message }) => {
                assert!(message.starts_with("insufficient_points"))
            }
            other => panic!("unexpected: {other:?}"),
        }
        let entry = ledger.redeem(user, 20, "sticker", day(1)).unwrap();
        assert_eq!(entry.delta, -20);
        assert_eq!(ledger.balance(user), 5);
    }

    #[test]
    fn badges_use_lifetime_earnings_not_balance() {
        let mut ledger = PointsLedger::new();
        let user = Uuid::now_v7();
        let rules = default_earning_rules();
        for n in 1..=7 {
            ledger.earn(user, ActivityKind::DailyCheckIn, &rules, day(n)).unwrap();
            ledger.earn(user, ActivityKind::SessionAttended, &rules, day(n)).unwrap();
        }
        let balance = ledger.balance(user);
        ledger.redeem(user, balance, "retreat", day(7)).unwrap();

        let earned = evaluate_badges(&ledger, user, &default_badges(), day(7).date_naive());
        assert_eq!(earned, vec!["first_step", "week_streak", "centurion"]);
    }
}
