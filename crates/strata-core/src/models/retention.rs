//! Retention policy: one optional rule per content type.
//!
//! The policy document is JSON, either a bare array of rules or an object with
//! a `rules` array. Each rule looks like
//! `{"content_type": "story", "storage_class": "STANDARD", "retention_days": 7,
//!   "transition": {"days": 30, "storage_class": "ARCHIVE"}}`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::content::{ContentType, StorageClass};
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "days", alias = "after_days")]
    pub after_days: u32,
    #[serde(rename = "storage_class", alias = "target_storage_class")]
    pub target_storage_class: StorageClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionRule {
    pub content_type: ContentType,
    /// Storage class objects of this type are uploaded with.
    #[serde(default)]
    pub storage_class: StorageClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

impl RetentionRule {
    /// `retention: permanent` in product terms.
    pub fn is_permanent(&self) -> bool {
        self.retention_days.is_none()
    }

    fn validate(&self) -> Result<(), IngestError> {
        if let Some(transition) = self.transition {
            if transition.target_storage_class == self.storage_class {
                return Err(IngestError::InvalidRule(format!(
                    "{} transition target {} equals its initial storage class",
                    self.content_type, transition.target_storage_class
                )));
            }
            if let Some(days) = self.retention_days {
                if transition.after_days >= days {
                    tracing::warn!(
                        content_type = %self.content_type,
                        transition_days = transition.after_days,
                        retention_days = days,
                        "Transition never applies because retention expires first"
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyDocument {
    Rules(Vec<RetentionRule>),
    Wrapped { rules: Vec<RetentionRule> },
}

/// Static retention configuration, loaded once and read-only afterwards.
///
/// Holds one slot per content type so lookups are exhaustive at compile time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    post: Option<RetentionRule>,
    livestream: Option<RetentionRule>,
    story: Option<RetentionRule>,
}

impl RetentionPolicy {
    pub fn from_rules(rules: impl IntoIterator<Item = RetentionRule>) -> Result<Self, IngestError> {
        let mut policy = Self::default();
        for rule in rules {
            rule.validate()?;
            let content_type = rule.content_type;
            let slot = policy.slot_mut(content_type);
            if slot.is_some() {
                return Err(IngestError::RuleConflict { content_type });
            }
            *slot = Some(rule);
        }
        Ok(policy)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, IngestError> {
        let document: PolicyDocument = serde_json::from_str(raw)
            .map_err(|e| IngestError::InvalidRule(format!("malformed retention policy: {}", e)))?;
        let rules = match document {
            PolicyDocument::Rules(rules) => rules,
            PolicyDocument::Wrapped { rules } => rules,
        };
        Self::from_rules(rules)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!(
                "Failed to read retention policy {}: {}",
                path.display(),
                e
            ))
        })?;
        let policy = Self::from_json_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            rules = policy.rules().count(),
            "Retention policy loaded"
        );
        Ok(policy)
    }

    pub fn rule_for(&self, content_type: ContentType) -> Option<&RetentionRule> {
        match content_type {
            ContentType::Post => self.post.as_ref(),
            ContentType::Livestream => self.livestream.as_ref(),
            ContentType::Story => self.story.as_ref(),
        }
    }

    /// Initial storage class for newly uploaded objects of `content_type`.
    pub fn initial_storage_class(&self, content_type: ContentType) -> StorageClass {
        self.rule_for(content_type)
            .map(|rule| rule.storage_class)
            .unwrap_or_default()
    }

    pub fn rules(&self) -> impl Iterator<Item = &RetentionRule> {
        ContentType::ALL
            .into_iter()
            .filter_map(move |content_type| self.rule_for(content_type))
    }

    fn slot_mut(&mut self, content_type: ContentType) -> &mut Option<RetentionRule> {
        match content_type {
            ContentType::Post => &mut self.post,
            ContentType::Livestream => &mut self.livestream,
            ContentType::Story => &mut self.story,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POLICY: &str = r#"{
        "rules": [
            {"content_type": "post", "storage_class": "STANDARD",
             "transition": {"days": 30, "storage_class": "ARCHIVE"}},
            {"content_type": "livestream", "storage_class": "STANDARD",
             "retention_days": 180,
             "transition": {"days": 30, "storage_class": "ARCHIVE"}},
            {"content_type": "story", "storage_class": "STANDARD", "retention_days": 7}
        ]
    }"#;

    #[test]
    fn parses_wrapped_document() {
        let policy = RetentionPolicy::from_json_str(POLICY).unwrap();
        let live = policy.rule_for(ContentType::Livestream).unwrap();
        assert_eq!(live.retention_days, Some(180));
        assert_eq!(
            live.transition,
            Some(Transition {
                after_days: 30,
                target_storage_class: StorageClass::Archive
            })
        );
        assert!(policy.rule_for(ContentType::Post).unwrap().is_permanent());
        assert_eq!(policy.rules().count(), 3);
    }

    #[test]
    fn parses_bare_array_and_leaves_missing_types_empty() {
        let policy = RetentionPolicy::from_json_str(
            r#"[{"content_type": "story", "retention_days": 7}]"#,
        )
        .unwrap();
        assert!(policy.rule_for(ContentType::Post).is_none());
        assert_eq!(
            policy.initial_storage_class(ContentType::Story),
            StorageClass::Standard
        );
    }

    #[test]
    fn duplicate_content_type_is_a_conflict() {
        let err = RetentionPolicy::from_json_str(
            r#"[{"content_type": "story", "retention_days": 7},
                {"content_type": "story", "retention_days": 9}]"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            IngestError::RuleConflict {
                content_type: ContentType::Story
            }
        ));
    }

    #[test]
    fn transition_to_same_class_is_rejected() {
        let err = RetentionPolicy::from_json_str(
            r#"[{"content_type": "post", "storage_class": "ARCHIVE",
                 "transition": {"days": 1, "storage_class": "ARCHIVE"}}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::InvalidRule(_)));
    }

    #[test]
    fn malformed_document_is_invalid() {
        let err = RetentionPolicy::from_json_str(r#"{"rules": "nope"}"#).unwrap_err();
        assert_eq!(err.error_code(), "invalid_rule");
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(POLICY.as_bytes()).unwrap();
        let policy = RetentionPolicy::load(file.path()).unwrap();
        assert_eq!(
            policy.rule_for(ContentType::Story).unwrap().retention_days,
            Some(7)
        );

        let missing = RetentionPolicy::load("/nonexistent/retention.json").unwrap_err();
        assert!(matches!(missing, IngestError::Config(_)));
    }
}
