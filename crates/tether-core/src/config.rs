use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{self, kinds};
use crate::error::Result;

/// Engine configuration.
///
/// Every field has a default so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_relays: Vec<String>,
    pub indexer_relays: Vec<String>,
    pub profile_relays: Vec<String>,
    pub batch_window_ms: u64,
    pub completion_timeout_ms: u64,
    pub max_relays_per_author: usize,
    pub max_filters_per_query: usize,
    pub reaction_limit: usize,
    pub comment_limit: usize,
    /// Query authors' own relays instead of the default set.
    pub outbox_enabled: bool,
    /// Optional NIP-89 client tag appended to outgoing records.
    pub client_tag: Option<Vec<String>>,
    pub cascade: CascadePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let to_vec = |relays: &[&str]| relays.iter().map(|r| r.to_string()).collect();
        Self {
            default_relays: to_vec(constants::DEFAULT_RELAYS),
            indexer_relays: to_vec(constants::INDEXER_RELAYS),
            profile_relays: to_vec(constants::PROFILE_RELAYS),
            batch_window_ms: constants::BATCH_WINDOW_MS,
            completion_timeout_ms: constants::COMPLETION_TIMEOUT_MS,
            max_relays_per_author: constants::MAX_RELAYS_PER_AUTHOR,
            max_filters_per_query: constants::MAX_FILTERS_PER_QUERY,
            reaction_limit: constants::REACTION_LIMIT,
            comment_limit: constants::COMMENT_LIMIT,
            outbox_enabled: true,
            client_tag: None,
            cascade: CascadePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

/// Follow-up fetches a cascade may schedule for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    Deletions,
    Reactions,
    Comments,
    /// Records and profiles referenced from tags or content.
    Quotes,
    /// Other bookmarks of the same URL and reactions to the URL itself.
    BookmarkUrl,
}

/// Cascade behavior for one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeRule {
    /// Wait for the author's relay list and profile before running `steps`.
    pub gate_author: bool,
    pub steps: BTreeSet<CascadeStep>,
    /// Steps skipped for records newer than the engine session.
    pub historical_only: BTreeSet<CascadeStep>,
    /// Tag name whose coordinates are resolved (`a` for lists, `A` for comment roots).
    pub address_tag: Option<String>,
}

impl CascadeRule {
    fn gated(steps: &[CascadeStep], historical_only: &[CascadeStep]) -> Self {
        Self {
            gate_author: true,
            steps: steps.iter().copied().collect(),
            historical_only: historical_only.iter().copied().collect(),
            address_tag: None,
        }
    }

    fn with_address_tag(mut self, tag: &str) -> Self {
        self.address_tag = Some(tag.to_string());
        self
    }

    /// Whether `step` applies to a record that is (or is not) live.
    pub fn runs(&self, step: CascadeStep, is_live: bool) -> bool {
        self.steps.contains(&step) && !(is_live && self.historical_only.contains(&step))
    }
}

/// Per-kind table of cascade rules.
///
/// Kinds without an entry are stored but never cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CascadePolicy {
    rules: BTreeMap<u16, CascadeRule>,
}

impl CascadePolicy {
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn rule(&self, kind: u16) -> Option<&CascadeRule> {
        self.rules.get(&kind)
    }

    pub fn set_rule(&mut self, kind: u16, rule: CascadeRule) {
        self.rules.insert(kind, rule);
    }
}

impl Default for CascadePolicy {
    fn default() -> Self {
        use CascadeStep::*;

        let mut policy = Self::empty();
        let post = CascadeRule::gated(&[Deletions, Reactions, Quotes], &[Deletions]);
        for kind in [kinds::TEXT_NOTE, kinds::CHANNEL_MESSAGE, kinds::LONG_FORM] {
            policy.set_rule(kind, post.clone());
        }

        let reaction = CascadeRule::gated(&[Deletions], &[Deletions]);
        policy.set_rule(kinds::REACTION, reaction.clone());
        policy.set_rule(kinds::WEB_REACTION, reaction);

        policy.set_rule(
            kinds::COMMENT,
            CascadeRule::gated(&[Deletions, Reactions, Quotes], &[Deletions, Reactions])
                .with_address_tag("A"),
        );

        policy.set_rule(
            kinds::WEB_BOOKMARK,
            CascadeRule::gated(
                &[Deletions, Reactions, Comments, Quotes, BookmarkUrl],
                &[Deletions, Reactions, Comments],
            ),
        );

        for kind in [kinds::PIN_LIST, kinds::BOOKMARK_LIST, kinds::EMOJI_LIST] {
            policy.set_rule(kind, CascadeRule::default().with_address_tag("a"));
        }

        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_policy_matches_bookmark_cascade() {
        let policy = CascadePolicy::default();
        let rule = policy.rule(kinds::WEB_BOOKMARK).unwrap();
        assert!(rule.gate_author);
        assert!(rule.runs(CascadeStep::Comments, false));
        assert!(!rule.runs(CascadeStep::Comments, true));
        assert!(rule.runs(CascadeStep::Quotes, true));
        assert!(policy.rule(kinds::METADATA).is_none());
    }

    #[test]
    fn test_emoji_list_resolves_a_tags_without_gate() {
        let policy = CascadePolicy::default();
        let rule = policy.rule(kinds::EMOJI_LIST).unwrap();
        assert!(!rule.gate_author);
        assert_eq!(rule.address_tag.as_deref(), Some("a"));
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"batch_window_ms": 250, "default_relays": ["wss://a.example"]}}"#)
            .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.batch_window(), Duration::from_millis(250));
        assert_eq!(config.default_relays, vec!["wss://a.example".to_string()]);
        assert_eq!(config.max_relays_per_author, 5);
        assert_eq!(config.cascade, CascadePolicy::default());
    }

    #[test]
    fn test_policy_round_trips_through_json() {
        let policy = CascadePolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let back: CascadePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(EngineConfig::from_file(file.path()).is_err());
    }
}
