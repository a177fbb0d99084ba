//! Grammar arena and builder
//!
//! A [`Grammar`] is an immutable arena of rules plus a name registry. It is
//! produced by [`GrammarBuilder`], the surface an external grammar loader
//! consumes: per-variant constructors, a numeric id allocator, and a
//! two-phase declare/define protocol so self-referential graphs can be
//! built. All structural problems are caught at [`GrammarBuilder::build`]
//! and never reach the parsing engine.

use crate::error::GrammarError;
use crate::rule::{Rule, RuleId, RuleKind, DEFAULT_MAX_SCAN};
use indexmap::IndexMap;

/// Immutable rule graph. Shared by reference (via `Rc`) across every parse
/// that uses it.
#[derive(Debug)]
pub struct Grammar {
    rules: Vec<Rule>,
    names: IndexMap<String, RuleId>,
}

impl Grammar {
    /// The rule behind a handle. Handles only come from the builder that
    /// produced this grammar, so the lookup is infallible.
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.index()]
    }

    /// Resolve a rule name.
    pub fn rule_id(&self, name: &str) -> Option<RuleId> {
        self.names.get(name).copied()
    }

    /// Name of a rule, if it has one.
    pub fn rule_name(&self, id: RuleId) -> Option<&str> {
        self.rule(id).name.as_deref()
    }

    /// Named rules in declaration order.
    pub fn named_rules(&self) -> impl Iterator<Item = (&str, RuleId)> {
        self.names.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Number of rules in the arena, anonymous ones included.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Name if present, otherwise a description of the rule's shape. Used
    /// in diagnostics.
    pub(crate) fn describe(&self, id: RuleId) -> String {
        let rule = self.rule(id);
        match &rule.name {
            Some(name) => name.clone(),
            None => rule.kind.describe(),
        }
    }
}

enum Slot {
    Declared { name: String },
    Defined { name: Option<String>, kind: RuleKind },
}

/// Incremental construction of a [`Grammar`].
///
/// Anonymous helpers (`literal`, `sequence`, ...) allocate and define in
/// one step; named, possibly cyclic rules go through [`declare`] first and
/// [`define`] once their components exist.
///
/// [`declare`]: GrammarBuilder::declare
/// [`define`]: GrammarBuilder::define
pub struct GrammarBuilder {
    slots: Vec<Slot>,
    names: IndexMap<String, RuleId>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        GrammarBuilder {
            slots: Vec::new(),
            names: IndexMap::new(),
        }
    }

    fn alloc(&mut self, slot: Slot) -> RuleId {
        let id = RuleId(self.slots.len() as u32);
        self.slots.push(slot);
        id
    }

    /// Reserve an id for a named rule whose definition comes later.
    pub fn declare(&mut self, name: &str) -> Result<RuleId, GrammarError> {
        if self.names.contains_key(name) {
            return Err(GrammarError::DuplicateRule {
                name: name.to_string(),
            });
        }
        let id = self.alloc(Slot::Declared {
            name: name.to_string(),
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Supply the definition for a previously declared rule.
    pub fn define(&mut self, id: RuleId, kind: RuleKind) -> Result<(), GrammarError> {
        match &self.slots[id.index()] {
            Slot::Declared { name } => {
                let name = Some(name.clone());
                self.slots[id.index()] = Slot::Defined { name, kind };
                Ok(())
            }
            Slot::Defined { .. } => Err(GrammarError::Redefined { index: id.index() }),
        }
    }

    /// Anonymous literal rule.
    pub fn literal(&mut self, text: &str) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::literal(text),
        })
    }

    /// Anonymous case-sensitive pattern rule with the default window.
    pub fn pattern(&mut self, source: &str) -> Result<RuleId, GrammarError> {
        self.pattern_with(source, false, DEFAULT_MAX_SCAN)
    }

    /// Anonymous pattern rule with explicit options.
    pub fn pattern_with(
        &mut self,
        source: &str,
        case_insensitive: bool,
        max_scan: usize,
    ) -> Result<RuleId, GrammarError> {
        let kind = RuleKind::pattern_with(source, case_insensitive, max_scan)?;
        Ok(self.alloc(Slot::Defined { name: None, kind }))
    }

    /// Anonymous sequence of `items` in order.
    pub fn sequence(&mut self, items: &[RuleId]) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::Sequence {
                items: items.to_vec(),
            },
        })
    }

    /// Anonymous repetition; `max: None` is unbounded.
    pub fn repeat(
        &mut self,
        item: RuleId,
        min: u32,
        max: Option<u32>,
    ) -> Result<RuleId, GrammarError> {
        if let Some(max) = max {
            if max < min {
                return Err(GrammarError::InvalidRepeat { min, max });
            }
        }
        Ok(self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::Repeat { item, min, max },
        }))
    }

    /// Zero-or-one occurrence of `item`.
    pub fn optional(&mut self, item: RuleId) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::Repeat {
                item,
                min: 0,
                max: Some(1),
            },
        })
    }

    /// Anonymous priority-ordered alternation.
    pub fn one_of(&mut self, members: &[RuleId]) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::OneOf {
                members: members.to_vec(),
            },
        })
    }

    /// Negative lookahead on `inner`.
    pub fn forbid(&mut self, inner: RuleId) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::Forbid { inner },
        })
    }

    /// Scan forward until `terminal` matches.
    pub fn up_to(&mut self, terminal: RuleId) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::UpTo { terminal },
        })
    }

    /// Parse `inner` with `excluded` suppressed from alternations.
    pub fn without(&mut self, inner: RuleId, excluded: &[RuleId]) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::Without {
                inner,
                excluded: excluded.to_vec(),
            },
        })
    }

    /// Label a sub-match for later extraction.
    pub fn tag(&mut self, label: &str, inner: RuleId) -> RuleId {
        self.alloc(Slot::Defined {
            name: None,
            kind: RuleKind::Tag {
                label: label.to_string(),
                inner,
            },
        })
    }

    /// Validate the graph and produce the immutable grammar.
    pub fn build(self) -> Result<Grammar, GrammarError> {
        let mut rules = Vec::with_capacity(self.slots.len());
        for slot in self.slots {
            match slot {
                Slot::Declared { name } => {
                    return Err(GrammarError::UndefinedRule { name });
                }
                Slot::Defined { name, kind } => {
                    let cacheable = kind.default_cacheable();
                    rules.push(Rule {
                        name,
                        kind,
                        cacheable,
                        specificity: 0,
                    });
                }
            }
        }

        check_references(&rules)?;
        check_delegation_cycles(&rules)?;
        compute_specificity(&mut rules);

        Ok(Grammar {
            rules,
            names: self.names,
        })
    }
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_references(rules: &[Rule]) -> Result<(), GrammarError> {
    for (index, rule) in rules.iter().enumerate() {
        let mut refs = rule.components();
        if let RuleKind::Without { excluded, .. } = &rule.kind {
            refs.extend_from_slice(excluded);
        }
        if refs.iter().any(|r| r.index() >= rules.len()) {
            return Err(GrammarError::UnresolvedReference { index });
        }
    }
    Ok(())
}

/// Reject rules that only ever delegate back to themselves: a cycle made
/// purely of alternation membership, wrappers, and single-item sequences
/// can never consume input and never terminate.
fn check_delegation_cycles(rules: &[Rule]) -> Result<(), GrammarError> {
    fn delegates(rule: &Rule) -> Vec<RuleId> {
        match &rule.kind {
            RuleKind::OneOf { members } => members.clone(),
            RuleKind::Without { inner, .. } | RuleKind::Tag { inner, .. } => vec![*inner],
            RuleKind::Sequence { items } if items.len() == 1 => vec![items[0]],
            _ => Vec::new(),
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unseen,
        Active,
        Done,
    }

    fn visit(rules: &[Rule], id: RuleId, marks: &mut [Mark]) -> Result<(), GrammarError> {
        match marks[id.index()] {
            Mark::Done => return Ok(()),
            Mark::Active => {
                let name = rules[id.index()]
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("#{}", id.index()));
                return Err(GrammarError::SelfReferential { name });
            }
            Mark::Unseen => {}
        }
        marks[id.index()] = Mark::Active;
        for next in delegates(&rules[id.index()]) {
            visit(rules, next, marks)?;
        }
        marks[id.index()] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unseen; rules.len()];
    for i in 0..rules.len() {
        visit(rules, RuleId(i as u32), &mut marks)?;
    }
    Ok(())
}

/// Fill in specificity weights by cycle-guarded depth-first traversal. A
/// rule revisited during its own computation contributes 1.
fn compute_specificity(rules: &mut [Rule]) {
    #[derive(Clone, Copy)]
    enum State {
        Unvisited,
        InProgress,
        Done(u32),
    }

    fn weigh(rules: &[Rule], id: RuleId, states: &mut [State]) -> u32 {
        match states[id.index()] {
            State::Done(w) => return w,
            State::InProgress => return 1,
            State::Unvisited => {}
        }
        states[id.index()] = State::InProgress;
        let w = match &rules[id.index()].kind {
            RuleKind::Literal { text } => (text.chars().count() as u32).max(1),
            RuleKind::Pattern { .. } => 1,
            RuleKind::Sequence { items } => items
                .iter()
                .map(|i| weigh(rules, *i, states))
                .fold(0u32, u32::saturating_add)
                .max(1),
            RuleKind::Repeat { item, min, .. } => {
                weigh(rules, *item, states).saturating_mul((*min).max(1))
            }
            RuleKind::OneOf { members } => members
                .iter()
                .map(|m| weigh(rules, *m, states))
                .min()
                .unwrap_or(1),
            RuleKind::Forbid { .. } => 1,
            RuleKind::UpTo { terminal } => weigh(rules, *terminal, states),
            RuleKind::Without { inner, .. } => weigh(rules, *inner, states),
            RuleKind::Tag { inner, .. } => weigh(rules, *inner, states),
        };
        states[id.index()] = State::Done(w);
        w
    }

    let mut states = vec![State::Unvisited; rules.len()];
    for i in 0..rules.len() {
        let w = weigh(rules, RuleId(i as u32), &mut states);
        rules[i].specificity = w;
    }
}
