//! Parser context: the value threaded through the search
//!
//! A [`Context`] bundles everything one rule attempt needs: the stream
//! position, the branch-and-bound quality floor, the active exclusion set,
//! an optional forced substitution, and shared handles to the grammar,
//! cache, and observer. Deriving operations (`advance`, `exclude`,
//! `with_floor`, `substitute`) always return a new value; a context handed
//! to a callee is never mutated behind its back.

use crate::cache::ParseCache;
use crate::expression::Expression;
use crate::grammar::Grammar;
use crate::observer::ParseObserver;
use crate::rule::RuleId;
use crate::stream::Stream;
use std::cell::RefCell;
use std::rc::Rc;

/// Persistent set of excluded rule ids: deriving a wider set shares the
/// existing links instead of copying, so contexts stay cheap to branch.
#[derive(Clone, Default)]
pub struct Exclusions {
    head: Option<Rc<ExclusionNode>>,
}

struct ExclusionNode {
    ids: Vec<RuleId>,
    next: Option<Rc<ExclusionNode>>,
}

impl Exclusions {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn contains(&self, id: RuleId) -> bool {
        let mut node = self.head.as_ref();
        while let Some(n) = node {
            if n.ids.contains(&id) {
                return true;
            }
            node = n.next.as_ref();
        }
        false
    }

    fn with(&self, ids: &[RuleId]) -> Self {
        if ids.is_empty() {
            return self.clone();
        }
        Exclusions {
            head: Some(Rc::new(ExclusionNode {
                ids: ids.to_vec(),
                next: self.head.clone(),
            })),
        }
    }
}

/// A forced result: for the remainder of one context derivation, parsing
/// `rule` at `position` short-circuits to `result`. Used exclusively by
/// the recursion regulator to build a larger match around an accepted
/// smaller one.
struct Substitution {
    rule: RuleId,
    position: usize,
    result: Expression,
}

#[derive(Clone)]
pub struct Context {
    stream: Stream,
    floor: i64,
    exclusions: Exclusions,
    substitution: Option<Rc<Substitution>>,
    grammar: Rc<Grammar>,
    cache: Rc<RefCell<ParseCache>>,
    observer: Rc<dyn ParseObserver>,
}

impl Context {
    pub(crate) fn new(
        stream: Stream,
        floor: i64,
        grammar: Rc<Grammar>,
        cache: Rc<RefCell<ParseCache>>,
        observer: Rc<dyn ParseObserver>,
    ) -> Self {
        Context {
            stream,
            floor,
            exclusions: Exclusions::default(),
            substitution: None,
            grammar,
            cache,
            observer,
        }
    }

    /// Absolute stream position of this context.
    pub fn position(&self) -> usize {
        self.stream.position()
    }

    /// The branch-and-bound floor: candidates whose quality cannot reach
    /// it are abandoned.
    pub fn floor(&self) -> i64 {
        self.floor
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub(crate) fn grammar(&self) -> &Rc<Grammar> {
        &self.grammar
    }

    pub(crate) fn cache(&self) -> &Rc<RefCell<ParseCache>> {
        &self.cache
    }

    pub(crate) fn observer(&self) -> &Rc<dyn ParseObserver> {
        &self.observer
    }

    /// New context `n` positions further along.
    pub fn advance(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.stream = self.stream.advance(n);
        next
    }

    /// New context at an absolute position.
    pub(crate) fn at(&self, abs: usize) -> Self {
        let mut next = self.clone();
        next.stream = self.stream.at(abs);
        next
    }

    /// New context with `ids` added to the exclusion set.
    pub fn exclude(&self, ids: &[RuleId]) -> Self {
        let mut next = self.clone();
        next.exclusions = self.exclusions.with(ids);
        next
    }

    /// New context with a different quality floor.
    pub fn with_floor(&self, floor: i64) -> Self {
        let mut next = self.clone();
        next.floor = floor;
        next
    }

    /// New context forcing `rule` at `position` to resolve to `result`.
    pub(crate) fn substitute(&self, rule: RuleId, position: usize, result: Expression) -> Self {
        let mut next = self.clone();
        next.substitution = Some(Rc::new(Substitution {
            rule,
            position,
            result,
        }));
        next
    }

    /// The forced result for `rule` at this context's position, if any.
    pub(crate) fn substitution_for(&self, rule: RuleId) -> Option<Expression> {
        let sub = self.substitution.as_ref()?;
        if sub.rule == rule && sub.position == self.position() {
            Some(sub.result.clone())
        } else {
            None
        }
    }

    pub fn is_excluded(&self, id: RuleId) -> bool {
        self.exclusions.contains(id)
    }

    /// Whether results computed here may be memoized: no exclusions and no
    /// forced substitution in effect.
    pub(crate) fn is_pristine(&self) -> bool {
        self.exclusions.is_empty() && self.substitution.is_none()
    }

    /// Name if present, otherwise a description of the rule's shape.
    pub(crate) fn describe(&self, id: RuleId) -> String {
        self.grammar.describe(id)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("position", &self.position())
            .field("floor", &self.floor)
            .field("pristine", &self.is_pristine())
            .finish()
    }
}
