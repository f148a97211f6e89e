use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use strata_core::{RetentionPolicy, StorageClass, StoredObject};

/// What a sweep should do with one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LifecycleAction {
    Keep,
    Transition { target: StorageClass },
    Delete,
}

impl Display for LifecycleAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LifecycleAction::Keep => write!(f, "keep"),
            LifecycleAction::Transition { target } => write!(f, "transition to {}", target),
            LifecycleAction::Delete => write!(f, "delete"),
        }
    }
}

/// Decide the action for `object` under `policy` at `now`.
///
/// Deletion takes precedence when both the retention and the transition
/// thresholds have been reached. Objects without a matching rule, and
/// objects whose creation time lies in the future, are kept.
pub fn plan(object: &StoredObject, policy: &RetentionPolicy, now: DateTime<Utc>) -> LifecycleAction {
    let Some(rule) = policy.rule_for(object.content_type) else {
        return LifecycleAction::Keep;
    };

    let age_days = object.age_days(now);
    if age_days < 0 {
        return LifecycleAction::Keep;
    }

    if let Some(retention_days) = rule.retention_days {
        if age_days >= i64::from(retention_days) {
            return LifecycleAction::Delete;
        }
    }

    if let Some(transition) = rule.transition {
        if age_days >= i64::from(transition.after_days)
            && object.storage_class != transition.target_storage_class
        {
            return LifecycleAction::Transition {
                target: transition.target_storage_class,
            };
        }
    }

    LifecycleAction::Keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use strata_core::{ContentType, RetentionRule, Transition};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn object(content_type: ContentType, age: Duration, class: StorageClass) -> StoredObject {
        StoredObject {
            object_key: format!("{}/c/abc.mp4", content_type.key_prefix()),
            content_type,
            creator_id: "c".to_string(),
            storage_class: class,
            created_at: now() - age,
            last_transition_at: None,
            size: 10,
            mime_type: "video/mp4".to_string(),
        }
    }

    fn policy() -> RetentionPolicy {
        RetentionPolicy::from_rules([
            RetentionRule {
                content_type: ContentType::Post,
                storage_class: StorageClass::Standard,
                retention_days: None,
                transition: Some(Transition {
                    after_days: 30,
                    target_storage_class: StorageClass::Archive,
                }),
            },
            RetentionRule {
                content_type: ContentType::Livestream,
                storage_class: StorageClass::Standard,
                retention_days: Some(180),
                transition: Some(Transition {
                    after_days: 30,
                    target_storage_class: StorageClass::Archive,
                }),
            },
            RetentionRule {
                content_type: ContentType::Story,
                storage_class: StorageClass::Standard,
                retention_days: Some(7),
                transition: None,
            },
        ])
        .unwrap()
    }

    #[test]
    fn story_expires_after_seven_days() {
        let policy = policy();
        let old = object(ContentType::Story, Duration::days(8), StorageClass::Standard);
        let young = object(ContentType::Story, Duration::days(6), StorageClass::Standard);
        assert_eq!(plan(&old, &policy, now()), LifecycleAction::Delete);
        assert_eq!(plan(&young, &policy, now()), LifecycleAction::Keep);
    }

    #[test]
    fn threshold_is_inclusive_on_whole_days() {
        let policy = policy();
        let exactly = object(ContentType::Story, Duration::days(7), StorageClass::Standard);
        let almost = object(
            ContentType::Story,
            Duration::days(7) - Duration::seconds(1),
            StorageClass::Standard,
        );
        assert_eq!(plan(&exactly, &policy, now()), LifecycleAction::Delete);
        assert_eq!(plan(&almost, &policy, now()), LifecycleAction::Keep);
    }

    #[test]
    fn livestream_transitions_then_expires() {
        let policy = policy();
        let at_40 = object(ContentType::Livestream, Duration::days(40), StorageClass::Standard);
        assert_eq!(
            plan(&at_40, &policy, now()),
            LifecycleAction::Transition {
                target: StorageClass::Archive
            }
        );

        let archived = object(ContentType::Livestream, Duration::days(40), StorageClass::Archive);
        assert_eq!(plan(&archived, &policy, now()), LifecycleAction::Keep);

        // Never transitioned but already past retention: deletion wins
        let at_200 = object(ContentType::Livestream, Duration::days(200), StorageClass::Standard);
        assert_eq!(plan(&at_200, &policy, now()), LifecycleAction::Delete);
    }

    #[test]
    fn permanent_posts_are_only_transitioned() {
        let policy = policy();
        let ancient = object(ContentType::Post, Duration::days(4000), StorageClass::Archive);
        assert_eq!(plan(&ancient, &policy, now()), LifecycleAction::Keep);
    }

    #[test]
    fn missing_rule_and_future_objects_are_kept() {
        let empty = RetentionPolicy::default();
        let old = object(ContentType::Story, Duration::days(90), StorageClass::Standard);
        assert_eq!(plan(&old, &empty, now()), LifecycleAction::Keep);

        let future = object(ContentType::Story, Duration::days(-3), StorageClass::Standard);
        assert_eq!(plan(&future, &policy(), now()), LifecycleAction::Keep);
    }
}
