//! Platform-conditional configuration.
//!
//! A [`PlatformRule`] pairs a predicate (a set of tags that must all be
//! active) with an effect on the compiler policy. Rules are evaluated in
//! declaration order against the fixed [`PlatformTags`] of a run; every
//! matching rule contributes, non-matching rules are skipped.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The set of tags active for one build run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformTags {
    tags: BTreeSet<String>,
}

impl PlatformTags {
    /// Tags describing the host operating system.
    pub fn host() -> Self {
        let mut tags = PlatformTags::default();
        if cfg!(unix) {
            tags.insert("posix");
        }
        if cfg!(target_os = "linux") {
            tags.insert("linux");
        }
        if cfg!(target_os = "macos") {
            tags.insert("macos");
            tags.insert("darwin");
        }
        if cfg!(target_os = "windows") {
            tags.insert("windows");
        }
        tags
    }

    /// Build a tag set from explicit names.
    pub fn from_tags<S: Into<String>>(tags: impl IntoIterator<Item = S>) -> Self {
        PlatformTags {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a tag.
    pub fn insert(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    /// Add a tag, builder style.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.insert(tag);
        self
    }

    /// Check whether a tag is active.
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Iterate over active tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|s| s.as_str())
    }
}

impl fmt::Display for PlatformTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.iter().collect();
        write!(f, "{{{}}}", tags.join(", "))
    }
}

/// What a matching rule does to the compiler policy.
///
/// `flags` and `macros` are appended; `debug` and `optimize` override the
/// current mode when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleEffect {
    pub flags: Vec<String>,
    pub macros: Vec<String>,
    pub debug: Option<bool>,
    pub optimize: Option<bool>,
}

impl RuleEffect {
    /// An effect that appends flags.
    pub fn flags<S: Into<String>>(flags: impl IntoIterator<Item = S>) -> Self {
        RuleEffect {
            flags: flags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// An effect that appends macros.
    pub fn macros<S: Into<String>>(macros: impl IntoIterator<Item = S>) -> Self {
        RuleEffect {
            macros: macros.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// A predicate/effect pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRule {
    /// Tags that must all be active; empty matches every platform.
    #[serde(default)]
    pub when: BTreeSet<String>,

    #[serde(flatten)]
    pub effect: RuleEffect,
}

impl PlatformRule {
    /// Create a rule from its predicate tags and effect.
    pub fn new<S: Into<String>>(when: impl IntoIterator<Item = S>, effect: RuleEffect) -> Self {
        PlatformRule {
            when: when.into_iter().map(Into::into).collect(),
            effect,
        }
    }

    /// Whether this rule applies under the given tags.
    pub fn matches(&self, tags: &PlatformTags) -> bool {
        self.when.iter().all(|t| tags.contains(t))
    }
}

/// Compiler mode after rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub debug: bool,
    pub optimize: bool,
}

impl Mode {
    /// Mode for a release or debug build before any rule overrides.
    pub fn for_release(release: bool) -> Self {
        Mode {
            debug: !release,
            optimize: release,
        }
    }
}

/// The result of evaluating a [`RuleSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedPolicy {
    pub flags: Vec<String>,
    pub macros: Vec<String>,
    pub mode: Mode,
    /// Indices of the rules that matched, in evaluation order.
    pub matched: Vec<usize>,
}

/// An ordered list of platform rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<PlatformRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        RuleSet::default()
    }

    /// Append a rule; it is evaluated after all rules already present.
    pub fn push(&mut self, rule: PlatformRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[PlatformRule] {
        &self.rules
    }

    /// Evaluate every rule in order against `tags`, starting from `mode`.
    pub fn evaluate(&self, tags: &PlatformTags, mode: Mode) -> MergedPolicy {
        let mut merged = MergedPolicy {
            flags: Vec::new(),
            macros: Vec::new(),
            mode,
            matched: Vec::new(),
        };

        for (idx, rule) in self.rules.iter().enumerate() {
            if !rule.matches(tags) {
                continue;
            }
            merged.matched.push(idx);
            merged.flags.extend(rule.effect.flags.iter().cloned());
            merged.macros.extend(rule.effect.macros.iter().cloned());
            if let Some(debug) = rule.effect.debug {
                merged.mode.debug = debug;
            }
            if let Some(optimize) = rule.effect.optimize {
                merged.mode.optimize = optimize;
            }
        }

        merged
    }
}

impl Extend<PlatformRule> for RuleSet {
    fn extend<I: IntoIterator<Item = PlatformRule>>(&mut self, iter: I) {
        self.rules.extend(iter);
    }
}

impl FromIterator<PlatformRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = PlatformRule>>(iter: I) -> Self {
        RuleSet {
            rules: iter.into_iter().collect(),
        }
    }
}
