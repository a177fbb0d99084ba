//! Rule nodes of the grammar graph
//!
//! A grammar is an arena of immutable [`Rule`]s addressed by [`RuleId`],
//! so cyclic (including self-referential) graphs are expressed through ids
//! rather than owning references. [`RuleKind`] is the closed set of match
//! behaviors the engine knows how to run.

use crate::error::GrammarError;
use regex::{Regex, RegexBuilder};

/// Default discovery window for pattern matching, in characters.
pub const DEFAULT_MAX_SCAN: usize = 4096;

/// Stable handle of a rule within one grammar's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RuleId(pub(crate) u32);

impl RuleId {
    /// Index into the grammar's arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One rule of the grammar: an optional name, the match behavior, and the
/// attributes the engine derives at build time.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: Option<String>,
    pub kind: RuleKind,
    /// Whether results for this rule may be memoized per position. Rules
    /// whose outcome depends on enclosing context are not cacheable.
    pub cacheable: bool,
    /// Weight of this rule in quality scoring: how much information a
    /// match of it carries, and so how costly its absence is.
    pub specificity: u32,
}

impl Rule {
    /// Child rule ids, for introspection and diagnostics.
    pub fn components(&self) -> Vec<RuleId> {
        match &self.kind {
            RuleKind::Literal { .. } | RuleKind::Pattern { .. } => Vec::new(),
            RuleKind::Sequence { items } => items.clone(),
            RuleKind::Repeat { item, .. } => vec![*item],
            RuleKind::OneOf { members } => members.clone(),
            RuleKind::Forbid { inner } => vec![*inner],
            RuleKind::UpTo { terminal } => vec![*terminal],
            RuleKind::Without { inner, .. } => vec![*inner],
            RuleKind::Tag { inner, .. } => vec![*inner],
        }
    }
}

/// The closed set of match behaviors.
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Exact text. Partial leading matches earn partial credit.
    Literal { text: String },

    /// Longest prefix accepted by an anchored regular expression, probed
    /// over a bounded discovery window.
    Pattern {
        regex: Regex,
        source: String,
        case_insensitive: bool,
        max_scan: usize,
    },

    /// All items in order.
    Sequence { items: Vec<RuleId> },

    /// `item` repeated `min..=max` times; `max: None` is unbounded.
    /// Out-of-range counts degrade quality instead of failing.
    Repeat {
        item: RuleId,
        min: u32,
        max: Option<u32>,
    },

    /// Priority-ordered alternation; order is priority.
    OneOf { members: Vec<RuleId> },

    /// Negative lookahead: succeeds (empty) when `inner` does not cleanly
    /// match here.
    Forbid { inner: RuleId },

    /// Scan forward until `terminal` matches; the match spans the lead-up
    /// plus the terminal.
    UpTo { terminal: RuleId },

    /// Parse `inner` with the listed rules suppressed from any alternation
    /// consulted in that span.
    Without {
        inner: RuleId,
        excluded: Vec<RuleId>,
    },

    /// Transparent wrapper labeling a sub-match for extraction.
    Tag { label: String, inner: RuleId },
}

impl RuleKind {
    /// Literal text rule.
    pub fn literal(text: impl Into<String>) -> Self {
        RuleKind::Literal { text: text.into() }
    }

    /// Case-sensitive pattern with the default discovery window.
    pub fn pattern(source: &str) -> Result<Self, GrammarError> {
        Self::pattern_with(source, false, DEFAULT_MAX_SCAN)
    }

    /// Pattern with explicit case-sensitivity and discovery window.
    pub fn pattern_with(
        source: &str,
        case_insensitive: bool,
        max_scan: usize,
    ) -> Result<Self, GrammarError> {
        // Anchored so a match always starts at the window head.
        let anchored = format!(r"\A(?:{})", source);
        let regex = RegexBuilder::new(&anchored)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| GrammarError::InvalidPattern {
                source: source.to_string(),
                error: Box::new(e),
            })?;
        Ok(RuleKind::Pattern {
            regex,
            source: source.to_string(),
            case_insensitive,
            max_scan,
        })
    }

    /// Whether results of this kind may be memoized per position.
    pub(crate) fn default_cacheable(&self) -> bool {
        match self {
            RuleKind::Literal { .. }
            | RuleKind::Pattern { .. }
            | RuleKind::Sequence { .. }
            | RuleKind::Repeat { .. }
            | RuleKind::OneOf { .. }
            | RuleKind::UpTo { .. } => true,
            // Probe and context-altering kinds depend on enclosing state.
            RuleKind::Forbid { .. } | RuleKind::Without { .. } | RuleKind::Tag { .. } => false,
        }
    }

    /// Short human-readable description, used in diagnostics for anonymous
    /// rules.
    pub(crate) fn describe(&self) -> String {
        match self {
            RuleKind::Literal { text } => format!("{:?}", text),
            RuleKind::Pattern { source, .. } => format!("/{}/", source),
            RuleKind::Sequence { .. } => "sequence".to_string(),
            RuleKind::Repeat { min, max, .. } => match max {
                Some(max) => format!("repeat {}..={}", min, max),
                None => format!("repeat {}..", min),
            },
            RuleKind::OneOf { .. } => "alternation".to_string(),
            RuleKind::Forbid { .. } => "forbidden content".to_string(),
            RuleKind::UpTo { .. } => "scan-until".to_string(),
            RuleKind::Without { .. } => "exclusion scope".to_string(),
            RuleKind::Tag { label, .. } => format!("tagged '{}'", label),
        }
    }
}
