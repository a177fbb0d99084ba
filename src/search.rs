//! Candidate enumeration: the parse algorithms for every rule variant
//!
//! The central entry is [`candidates`]: a lazy, deterministic iterator of
//! interpretations of one rule at one context, non-ascending in quality,
//! each at or above the context's quality floor. "Parse" is the first
//! candidate; an expression's `next_match` is the first candidate strictly
//! below its own quality.
//!
//! Composite variants (sequence, repeat) run a best-first fringe: a
//! max-heap of prefix states ordered by accumulated quality, ties broken
//! LIFO so the greedy path completes first. Every future contribution is
//! a penalty (≤ 0), which makes the accumulated quality an admissible
//! bound: the first completed state popped is the best interpretation,
//! and pruning a state whose accumulation has fallen below the floor is
//! safe (incremental branch-and-bound).

use crate::cache::VisitGuard;
use crate::context::Context;
use crate::expression::{ExprDetail, Expression, IssueKind, ParseIssue};
use crate::quality;
use crate::rule::{RuleId, RuleKind};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Lazy enumeration of the interpretations of `rule` at `ctx`, best first.
pub(crate) fn candidates(ctx: &Context, rule: RuleId) -> RuleCandidates {
    let state = match ctx.substitution_for(rule) {
        Some(forced) => IterState::Forced(Some(forced)),
        None => IterState::Start,
    };
    RuleCandidates {
        ctx: ctx.clone(),
        rule,
        state,
    }
}

/// Iterator over the candidates of one (rule, context) pair. Wraps the
/// per-variant engines with the cross-cutting concerns: forced
/// substitutions, memo consultation and write-back, the visiting guard,
/// observer hooks, and the poison check.
pub(crate) struct RuleCandidates {
    ctx: Context,
    rule: RuleId,
    state: IterState,
}

enum IterState {
    Start,
    /// The recursion regulator forced a result for this (rule, position).
    Forced(Option<Expression>),
    Running {
        raw: Box<dyn Iterator<Item = Expression>>,
        memo_write: bool,
        first: bool,
    },
    /// A memo hit: yield the stored best, then regenerate the rest of the
    /// (deterministic) enumeration, skipping its first item.
    Replay {
        best: Option<Expression>,
        raw: Option<Box<dyn Iterator<Item = Expression>>>,
    },
    Done,
}

impl Iterator for RuleCandidates {
    type Item = Expression;

    fn next(&mut self) -> Option<Expression> {
        loop {
            match &mut self.state {
                IterState::Done => return None,

                IterState::Forced(slot) => {
                    let result = slot.take();
                    self.state = IterState::Done;
                    return result;
                }

                IterState::Start => {
                    if self.ctx.cache().borrow().is_poisoned() {
                        self.state = IterState::Done;
                        return None;
                    }
                    let key = (self.ctx.position(), self.rule);
                    {
                        // A lookup while this key is being evaluated is
                        // recursion: answer with an interrupt, never loop.
                        let mut cache = self.ctx.cache().borrow_mut();
                        if cache.is_visiting(&key) {
                            cache.note_reentry(key);
                            self.state = IterState::Done;
                            return None;
                        }
                    }
                    let name = self.ctx.grammar().rule(self.rule).name.clone();
                    let cacheable =
                        self.ctx.grammar().rule(self.rule).cacheable && self.ctx.is_pristine();
                    self.ctx
                        .observer()
                        .rule_entered(self.rule, name.as_deref(), key.0);

                    if cacheable {
                        // A stored best is the global quality maximum for
                        // its key, so it is valid under any floor; if it
                        // falls below the current floor the miss is
                        // definitive. A stored "no result" only covers
                        // floors at or above the one it was computed under.
                        let verdict = {
                            let cache = self.ctx.cache().borrow();
                            match cache.lookup(&key) {
                                Some(entry) => match &entry.best {
                                    Some(best) if best.quality() >= self.ctx.floor() => {
                                        Some(Some(best.clone()))
                                    }
                                    Some(_) => Some(None),
                                    None if self.ctx.floor() >= entry.floor => Some(None),
                                    None => None,
                                },
                                None => None,
                            }
                        };
                        match verdict {
                            Some(Some(best)) => {
                                self.ctx.observer().cache_consulted(self.rule, key.0, true);
                                self.ctx.observer().rule_exited(
                                    self.rule,
                                    name.as_deref(),
                                    key.0,
                                    Some(&best),
                                );
                                self.state = IterState::Replay {
                                    best: Some(best),
                                    raw: None,
                                };
                                continue;
                            }
                            Some(None) => {
                                self.ctx.observer().cache_consulted(self.rule, key.0, true);
                                self.ctx
                                    .observer()
                                    .rule_exited(self.rule, name.as_deref(), key.0, None);
                                self.state = IterState::Done;
                                return None;
                            }
                            None => {
                                self.ctx.observer().cache_consulted(self.rule, key.0, false);
                            }
                        }
                    }

                    self.state = IterState::Running {
                        raw: build_engine(&self.ctx, self.rule),
                        memo_write: cacheable,
                        first: true,
                    };
                }

                IterState::Running {
                    raw,
                    memo_write,
                    first,
                } => {
                    if self.ctx.cache().borrow().is_poisoned() {
                        self.state = IterState::Done;
                        return None;
                    }
                    let key = (self.ctx.position(), self.rule);
                    let mark = self.ctx.cache().borrow().log_mark();
                    let result = {
                        let Some(_guard) = VisitGuard::enter(self.ctx.cache(), key) else {
                            return None;
                        };
                        raw.next()
                    };
                    if *first {
                        *first = false;
                        // Only a result that was not cut short by a
                        // still-active recursion interrupt is stable
                        // enough to memoize.
                        if *memo_write && !self.ctx.cache().borrow().interrupted_since(mark) {
                            self.ctx.cache().borrow_mut().store(
                                key,
                                self.ctx.floor(),
                                result.clone(),
                            );
                        }
                        let name = self.ctx.grammar().rule(self.rule).name.clone();
                        self.ctx.observer().rule_exited(
                            self.rule,
                            name.as_deref(),
                            key.0,
                            result.as_ref(),
                        );
                    }
                    if result.is_none() {
                        self.state = IterState::Done;
                    }
                    return result;
                }

                IterState::Replay { best, raw } => {
                    if let Some(b) = best.take() {
                        return Some(b);
                    }
                    if self.ctx.cache().borrow().is_poisoned() {
                        self.state = IterState::Done;
                        return None;
                    }
                    let key = (self.ctx.position(), self.rule);
                    if raw.is_none() {
                        let mut engine = build_engine(&self.ctx, self.rule);
                        let skipped = {
                            let Some(_guard) = VisitGuard::enter(self.ctx.cache(), key) else {
                                return None;
                            };
                            engine.next()
                        };
                        if skipped.is_none() {
                            self.state = IterState::Done;
                            return None;
                        }
                        *raw = Some(engine);
                    }
                    let result = {
                        let Some(_guard) = VisitGuard::enter(self.ctx.cache(), key) else {
                            return None;
                        };
                        raw.as_mut().unwrap().next()
                    };
                    if result.is_none() {
                        self.state = IterState::Done;
                    }
                    return result;
                }
            }
        }
    }
}

fn build_engine(ctx: &Context, rule: RuleId) -> Box<dyn Iterator<Item = Expression>> {
    let kind = ctx.grammar().rule(rule).kind.clone();
    match kind {
        RuleKind::Literal { text } => Box::new(LiteralCandidates::new(ctx.clone(), rule, text)),
        RuleKind::Pattern {
            regex,
            source,
            max_scan,
            ..
        } => Box::new(PatternCandidates::new(
            ctx.clone(),
            rule,
            regex,
            source,
            max_scan,
        )),
        RuleKind::Sequence { items } => Box::new(SequenceCandidates::new(ctx.clone(), rule, items)),
        RuleKind::Repeat { item, min, max } => {
            Box::new(RepeatCandidates::new(ctx.clone(), rule, item, min, max))
        }
        RuleKind::OneOf { members } => Box::new(OneOfCandidates::new(ctx.clone(), rule, members)),
        RuleKind::Forbid { inner } => Box::new(ForbidCandidates {
            ctx: ctx.clone(),
            rule,
            inner,
            emitted: false,
        }),
        RuleKind::UpTo { terminal } => Box::new(UpToCandidates {
            ctx: ctx.clone(),
            rule,
            terminal,
            skip: 0,
            done: false,
        }),
        RuleKind::Without { inner, excluded } => Box::new(DelegateCandidates {
            inner: candidates(&ctx.exclude(&excluded), inner),
            ctx: ctx.clone(),
            rule,
            detail: ExprDetail::None,
        }),
        RuleKind::Tag { label, inner } => Box::new(DelegateCandidates {
            inner: candidates(ctx, inner),
            ctx: ctx.clone(),
            rule,
            detail: ExprDetail::Tag { label },
        }),
    }
}

/// Heap entry for the fringe searches. Ordered by accumulated quality,
/// ties broken LIFO via the insertion counter.
struct Entry<S> {
    score: i64,
    seq: u64,
    state: S,
}

impl<S> PartialEq for Entry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl<S> Eq for Entry<S> {}

impl<S> PartialOrd for Entry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> Ord for Entry<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.score, self.seq).cmp(&(other.score, other.seq))
    }
}

// ---------------------------------------------------------------------------
// Literal

struct LiteralCandidates {
    ctx: Context,
    rule: RuleId,
    text: String,
    chars: Vec<char>,
    next_len: usize,
    primed: bool,
    done: bool,
}

impl LiteralCandidates {
    fn new(ctx: Context, rule: RuleId, text: String) -> Self {
        let chars = text.chars().collect();
        LiteralCandidates {
            ctx,
            rule,
            text,
            chars,
            next_len: 0,
            primed: false,
            done: false,
        }
    }
}

impl Iterator for LiteralCandidates {
    type Item = Expression;

    /// Candidates are k, k-1, ..., 1 matched leading symbols, where k is
    /// the longest common prefix with the stream. Zero matched symbols is
    /// not a candidate: a wholly absent literal is the enclosing
    /// composite's composition error, not a match.
    fn next(&mut self) -> Option<Expression> {
        if self.done {
            return None;
        }
        if !self.primed {
            self.primed = true;
            let mut k = 0;
            for (i, expected) in self.chars.iter().enumerate() {
                match self.ctx.stream().char_at(i) {
                    Ok(Some(actual)) if actual == *expected => k += 1,
                    Ok(_) => break,
                    Err(e) => {
                        self.ctx.cache().borrow_mut().poison(e);
                        self.done = true;
                        return None;
                    }
                }
            }
            if k == 0 {
                self.done = true;
                return None;
            }
            self.next_len = k;
        }
        if self.next_len >= 1 {
            let matched = self.next_len;
            self.next_len -= 1;
            let missing = (self.chars.len() - matched) as i64;
            let penalty = -(quality::SYMBOL_MISMATCH * missing);
            if penalty >= self.ctx.floor() {
                let mut issues = Vec::new();
                if missing > 0 {
                    issues.push(ParseIssue::new(
                        self.ctx.position() + matched,
                        IssueKind::SymbolMismatch,
                        format!(
                            "expected {:?}, matched {} of {} symbols",
                            self.text,
                            matched,
                            self.chars.len()
                        ),
                        penalty,
                    ));
                }
                return Some(Expression::new(
                    self.rule,
                    self.ctx.clone(),
                    self.ctx.position(),
                    matched,
                    Vec::new(),
                    issues,
                    ExprDetail::Literal {
                        matched,
                        expected: self.chars.len(),
                    },
                ));
            }
        }
        // Shorter candidates only score lower; nothing further qualifies.
        self.done = true;
        None
    }
}

// ---------------------------------------------------------------------------
// Pattern

struct PatternCandidates {
    ctx: Context,
    rule: RuleId,
    regex: Regex,
    source: String,
    max_scan: usize,
    window: Option<Vec<char>>,
    /// Current window truncation, in characters.
    limit: usize,
    truncation_done: bool,
    absent_emitted: bool,
    done: bool,
}

impl PatternCandidates {
    fn new(ctx: Context, rule: RuleId, regex: Regex, source: String, max_scan: usize) -> Self {
        PatternCandidates {
            ctx,
            rule,
            regex,
            source,
            max_scan,
            window: None,
            limit: 0,
            truncation_done: false,
            absent_emitted: false,
            done: false,
        }
    }
}

impl Iterator for PatternCandidates {
    type Item = Expression;

    /// The anchored match of the discovery window, then re-matches of
    /// successively truncated windows (strictly shorter each time), and
    /// finally the "pattern absent" zero-length candidate.
    fn next(&mut self) -> Option<Expression> {
        if self.done {
            return None;
        }
        if self.window.is_none() {
            let mut chars = Vec::new();
            for i in 0..self.max_scan {
                match self.ctx.stream().char_at(i) {
                    Ok(Some(c)) => chars.push(c),
                    Ok(None) => break,
                    Err(e) => {
                        self.ctx.cache().borrow_mut().poison(e);
                        self.done = true;
                        return None;
                    }
                }
            }
            self.limit = chars.len();
            self.window = Some(chars);
        }
        while !self.truncation_done {
            let window = self.window.as_ref().unwrap();
            let text: String = window[..self.limit].iter().collect();
            match self.regex.find(&text) {
                Some(m) => {
                    let matched = text[..m.end()].chars().count();
                    if matched == 0 {
                        self.truncation_done = true;
                    } else {
                        self.limit = matched - 1;
                    }
                    return Some(Expression::new(
                        self.rule,
                        self.ctx.clone(),
                        self.ctx.position(),
                        matched,
                        Vec::new(),
                        Vec::new(),
                        ExprDetail::Pattern { matched: true },
                    ));
                }
                None => self.truncation_done = true,
            }
        }
        if !self.absent_emitted {
            self.absent_emitted = true;
            let penalty = -quality::PATTERN_MISS;
            if penalty >= self.ctx.floor() {
                let issue = ParseIssue::new(
                    self.ctx.position(),
                    IssueKind::PatternAbsent,
                    format!("expected text matching /{}/", self.source),
                    penalty,
                );
                return Some(Expression::new(
                    self.rule,
                    self.ctx.clone(),
                    self.ctx.position(),
                    0,
                    Vec::new(),
                    vec![issue],
                    ExprDetail::Pattern { matched: false },
                ));
            }
        }
        self.done = true;
        None
    }
}

// ---------------------------------------------------------------------------
// Sequence

struct SeqState {
    children: Vec<Expression>,
    issues: Vec<ParseIssue>,
    pos: usize,
    acc: i64,
    next_item: usize,
    /// Remaining candidates for the last placed child, for re-forking.
    last_iter: Option<RuleCandidates>,
}

struct SequenceCandidates {
    ctx: Context,
    rule: RuleId,
    items: Vec<RuleId>,
    heap: BinaryHeap<Entry<SeqState>>,
    counter: u64,
}

impl SequenceCandidates {
    fn new(ctx: Context, rule: RuleId, items: Vec<RuleId>) -> Self {
        let start = ctx.position();
        let mut engine = SequenceCandidates {
            ctx,
            rule,
            items,
            heap: BinaryHeap::new(),
            counter: 0,
        };
        engine.push_state(SeqState {
            children: Vec::new(),
            issues: Vec::new(),
            pos: start,
            acc: 0,
            next_item: 0,
            last_iter: None,
        });
        engine
    }

    fn push_state(&mut self, state: SeqState) {
        if state.acc < self.ctx.floor() {
            return;
        }
        self.counter += 1;
        self.heap.push(Entry {
            score: state.acc,
            seq: self.counter,
            state,
        });
    }

    /// Push the state that replaces the last placed child with its next
    /// candidate, keeping the same resume point.
    fn push_sibling(&mut self, state: &SeqState, mut iter: RuleCandidates) {
        let Some(alt) = iter.next() else { return };
        let prev = state
            .children
            .last()
            .expect("a state with a live iterator has a placed child");
        let base_pos = prev.position();
        let base_acc = state.acc - prev.quality();
        let mut children = state.children.clone();
        let pos = base_pos + alt.length();
        let acc = base_acc + alt.quality();
        *children.last_mut().unwrap() = alt;
        self.push_state(SeqState {
            children,
            issues: state.issues.clone(),
            pos,
            acc,
            next_item: state.next_item,
            last_iter: Some(iter),
        });
    }
}

impl Iterator for SequenceCandidates {
    type Item = Expression;

    fn next(&mut self) -> Option<Expression> {
        while let Some(entry) = self.heap.pop() {
            let mut state = entry.state;
            if let Some(iter) = state.last_iter.take() {
                self.push_sibling(&state, iter);
            }

            if state.next_item == self.items.len() {
                let start = self.ctx.position();
                return Some(Expression::new(
                    self.rule,
                    self.ctx.clone(),
                    start,
                    state.pos - start,
                    state.children,
                    state.issues,
                    ExprDetail::None,
                ));
            }

            let item = self.items[state.next_item];
            let child_ctx = self
                .ctx
                .at(state.pos)
                .with_floor(self.ctx.floor() - state.acc);
            let mark = self.ctx.cache().borrow().log_mark();
            let mut iter = candidates(&child_ctx, item);
            let first = iter.next();
            let interrupted = self.ctx.cache().borrow().interrupted_since(mark);

            match first {
                Some(child) => {
                    let mut children = state.children;
                    let pos = state.pos + child.length();
                    let acc = state.acc + child.quality();
                    children.push(child);
                    self.push_state(SeqState {
                        children,
                        issues: state.issues,
                        pos,
                        acc,
                        next_item: state.next_item + 1,
                        last_iter: Some(iter),
                    });
                }
                // Cut short by recursion regulation: this prefix cannot be
                // judged here, so drop it rather than record a bogus skip.
                None if interrupted => {}
                None => {
                    let specificity = self.ctx.grammar().rule(item).specificity as i64;
                    let penalty = -(quality::COMPONENT_MISSING * specificity);
                    let mut issues = state.issues;
                    issues.push(ParseIssue::new(
                        state.pos,
                        IssueKind::ComponentMissing,
                        format!("expected {}", self.ctx.describe(item)),
                        penalty,
                    ));
                    self.push_state(SeqState {
                        children: state.children,
                        issues,
                        pos: state.pos,
                        acc: state.acc + penalty,
                        next_item: state.next_item + 1,
                        last_iter: None,
                    });
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Repeat

struct RepState {
    children: Vec<Expression>,
    issues: Vec<ParseIssue>,
    pos: usize,
    acc: i64,
    stopped: bool,
    last_iter: Option<RuleCandidates>,
}

struct RepeatCandidates {
    ctx: Context,
    rule: RuleId,
    item: RuleId,
    min: u32,
    max: Option<u32>,
    heap: BinaryHeap<Entry<RepState>>,
    counter: u64,
}

impl RepeatCandidates {
    fn new(ctx: Context, rule: RuleId, item: RuleId, min: u32, max: Option<u32>) -> Self {
        let start = ctx.position();
        let mut engine = RepeatCandidates {
            ctx,
            rule,
            item,
            min,
            max,
            heap: BinaryHeap::new(),
            counter: 0,
        };
        engine.push_state(RepState {
            children: Vec::new(),
            issues: Vec::new(),
            pos: start,
            acc: 0,
            stopped: false,
            last_iter: None,
        });
        engine
    }

    fn push_state(&mut self, state: RepState) {
        if state.acc < self.ctx.floor() {
            return;
        }
        self.counter += 1;
        self.heap.push(Entry {
            score: state.acc,
            seq: self.counter,
            state,
        });
    }

    fn push_sibling(&mut self, state: &RepState, mut iter: RuleCandidates) {
        let Some(alt) = pull_consuming(&mut iter) else {
            return;
        };
        let prev = state
            .children
            .last()
            .expect("a state with a live iterator has a placed child");
        let base_pos = prev.position();
        let base_acc = state.acc - prev.quality();
        let mut children = state.children.clone();
        let pos = base_pos + alt.length();
        let acc = base_acc + alt.quality();
        *children.last_mut().unwrap() = alt;
        self.push_state(RepState {
            children,
            issues: state.issues.clone(),
            pos,
            acc,
            stopped: false,
            last_iter: Some(iter),
        });
    }

    /// Penalty and issue for stopping at `count` repetitions, `0`/`None`
    /// when the count is within range. Both shortfall and excess are soft:
    /// they degrade quality instead of failing.
    fn cardinality(&self, count: u32, pos: usize) -> (i64, Option<ParseIssue>) {
        let shortfall = self.min.saturating_sub(count);
        let excess = self.max.map_or(0, |max| count.saturating_sub(max));
        let off = (shortfall + excess) as i64;
        if off == 0 {
            return (0, None);
        }
        let specificity = self.ctx.grammar().rule(self.item).specificity as i64;
        let penalty = -(quality::CARDINALITY * specificity * off);
        let range = match self.max {
            Some(max) => format!("{}..={}", self.min, max),
            None => format!("{}..", self.min),
        };
        let issue = ParseIssue::new(
            pos,
            IssueKind::Cardinality,
            format!("matched {} repetitions, expected {}", count, range),
            penalty,
        );
        (penalty, Some(issue))
    }
}

impl Iterator for RepeatCandidates {
    type Item = Expression;

    fn next(&mut self) -> Option<Expression> {
        while let Some(entry) = self.heap.pop() {
            let mut state = entry.state;
            if let Some(iter) = state.last_iter.take() {
                self.push_sibling(&state, iter);
            }

            if state.stopped {
                let start = self.ctx.position();
                let count = state.children.len() as u32;
                return Some(Expression::new(
                    self.rule,
                    self.ctx.clone(),
                    start,
                    state.pos - start,
                    state.children,
                    state.issues,
                    ExprDetail::Repeat { count },
                ));
            }

            let count = state.children.len() as u32;

            // Another repetition. Appended repetitions must consume at
            // least one symbol, or the path would never terminate.
            let child_ctx = self
                .ctx
                .at(state.pos)
                .with_floor(self.ctx.floor() - state.acc);
            let mark = self.ctx.cache().borrow().log_mark();
            let mut iter = candidates(&child_ctx, self.item);
            let first = pull_consuming(&mut iter);
            let interrupted = self.ctx.cache().borrow().interrupted_since(mark);

            // Stopping here. When the attempt at another repetition was
            // cut short by recursion regulation, a shortfall claim would
            // be bogus, so only an in-range stop survives an interrupt.
            let (penalty, issue) = self.cardinality(count, state.pos);
            if !(interrupted && penalty != 0) {
                let mut issues = state.issues.clone();
                issues.extend(issue);
                self.push_state(RepState {
                    children: state.children.clone(),
                    issues,
                    pos: state.pos,
                    acc: state.acc + penalty,
                    stopped: true,
                    last_iter: None,
                });
            }

            if let Some(child) = first {
                let mut children = state.children;
                let pos = state.pos + child.length();
                let acc = state.acc + child.quality();
                children.push(child);
                self.push_state(RepState {
                    children,
                    issues: state.issues,
                    pos,
                    acc,
                    stopped: false,
                    last_iter: Some(iter),
                });
            }
        }
        None
    }
}

/// First candidate that consumes input; zero-length matches would let a
/// repetition spin in place.
fn pull_consuming(iter: &mut RuleCandidates) -> Option<Expression> {
    iter.find(|c| c.length() > 0)
}

// ---------------------------------------------------------------------------
// OneOf

struct Slot {
    iter: RuleCandidates,
    head: Option<Expression>,
}

struct OneOfCandidates {
    ctx: Context,
    rule: RuleId,
    members: Vec<RuleId>,
    slots: Vec<Slot>,
    /// Members not yet consulted (after a clean short-circuit).
    unopened: Vec<RuleId>,
    pending: Option<Expression>,
    /// Grown readings that subsume an accepted seed at a quality cost.
    /// They never replace the best but are emitted as alternates.
    deferred: Vec<Expression>,
    started: bool,
}

impl OneOfCandidates {
    fn new(ctx: Context, rule: RuleId, members: Vec<RuleId>) -> Self {
        OneOfCandidates {
            ctx,
            rule,
            members,
            slots: Vec::new(),
            unopened: Vec::new(),
            pending: None,
            deferred: Vec::new(),
            started: false,
        }
    }

    /// Consult members in priority order. A clean head short-circuits;
    /// otherwise the best head wins, priority breaking ties. Members whose
    /// attempt re-entered this alternation at this position are recorded
    /// and revisited by [`grow`](Self::grow).
    fn start(&mut self) {
        self.started = true;
        let pos = self.ctx.position();
        let own_key = (pos, self.rule);
        let members = std::mem::take(&mut self.members);
        let mut interrupted = Vec::new();
        let mut consulted = 0;

        for &member in &members {
            consulted += 1;
            if self.ctx.is_excluded(member) {
                continue;
            }
            let mark = self.ctx.cache().borrow().log_mark();
            let mut iter = candidates(&self.ctx, member);
            let head = iter.next();
            if self.ctx.cache().borrow().reentered_since(mark, &own_key) {
                interrupted.push(member);
            }
            let clean = head.as_ref().map_or(false, |h| h.quality() == 0);
            self.slots.push(Slot { iter, head });
            if clean {
                break;
            }
        }
        self.unopened = members[consulted..].to_vec();

        let Some(winner) = self.best_slot() else {
            return;
        };
        let head = self.slots[winner].head.take().unwrap();
        self.slots[winner].head = self.slots[winner].iter.next();

        let mut best = self.wrap(head);
        if !interrupted.is_empty() {
            best = self.grow(best, &interrupted);
        }
        self.pending = Some(best);
    }

    /// Left-recursion support: re-parse each interrupted member with the
    /// current best forced as the result of this alternation at this
    /// position, to fixpoint. A rebuild that is strictly longer and no
    /// worse in quality replaces the best; a strictly longer rebuild that
    /// costs quality is kept as a deferred alternate, so damaged
    /// continuations of an accepted seed stay reachable. Termination:
    /// length grows strictly and is bounded by the discoverable input.
    fn grow(&mut self, mut best: Expression, interrupted: &[RuleId]) -> Expression {
        let pos = self.ctx.position();
        loop {
            let mut improved = false;
            for &member in interrupted {
                let grown_ctx = self.ctx.substitute(self.rule, pos, best.clone());
                let Some(candidate) = candidates(&grown_ctx, member).next() else {
                    continue;
                };
                let grown = self.wrap(candidate);
                if grown.length() <= best.length() {
                    continue;
                }
                if grown.quality() >= best.quality() {
                    self.ctx.observer().match_discarded(&best, &grown);
                    best = grown;
                    improved = true;
                } else if !self.deferred.contains(&grown) {
                    self.deferred.push(grown);
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Highest-quality deferred grown reading.
    fn best_deferred(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, expr) in self.deferred.iter().enumerate() {
            let better = match best {
                None => true,
                Some(b) => expr.quality() > self.deferred[b].quality(),
            };
            if better {
                best = Some(i);
            }
        }
        best
    }

    /// Highest-quality peeked head, priority (slot order) breaking ties.
    fn best_slot(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(head) = &slot.head else { continue };
            let better = match best {
                None => true,
                Some(b) => head.quality() > self.slots[b].head.as_ref().unwrap().quality(),
            };
            if better {
                best = Some(i);
            }
        }
        best
    }

    fn wrap(&self, chosen: Expression) -> Expression {
        Expression::new(
            self.rule,
            self.ctx.clone(),
            self.ctx.position(),
            chosen.length(),
            vec![chosen],
            Vec::new(),
            ExprDetail::None,
        )
    }
}

impl Iterator for OneOfCandidates {
    type Item = Expression;

    fn next(&mut self) -> Option<Expression> {
        if !self.started {
            self.start();
        }
        if let Some(best) = self.pending.take() {
            return Some(best);
        }
        // Remaining candidates: merge of every member's enumeration plus
        // any deferred grown readings.
        for member in std::mem::take(&mut self.unopened) {
            if self.ctx.is_excluded(member) {
                continue;
            }
            let mut iter = candidates(&self.ctx, member);
            let head = iter.next();
            self.slots.push(Slot { iter, head });
        }
        let winner = self.best_slot();
        let spare = self.best_deferred();
        let take_spare = match (winner, spare) {
            (None, Some(_)) => true,
            // On equal quality the grown reading wins: it consumes more
            // input and localizes its problem later.
            (Some(w), Some(s)) => {
                let head = self.slots[w].head.as_ref().unwrap();
                self.deferred[s].quality() >= head.quality()
            }
            _ => false,
        };
        if take_spare {
            return Some(self.deferred.remove(spare.unwrap()));
        }
        let winner = winner?;
        let head = self.slots[winner].head.take().unwrap();
        self.slots[winner].head = self.slots[winner].iter.next();
        Some(self.wrap(head))
    }
}

// ---------------------------------------------------------------------------
// Forbid

struct ForbidCandidates {
    ctx: Context,
    rule: RuleId,
    inner: RuleId,
    emitted: bool,
}

impl Iterator for ForbidCandidates {
    type Item = Expression;

    /// Succeeds (empty) when the inner rule has no clean match here. A
    /// clean inner match yields an error-carrying empty candidate rather
    /// than an outright failure, so tolerant callers keep a positional
    /// diagnostic.
    fn next(&mut self) -> Option<Expression> {
        if self.emitted {
            return None;
        }
        self.emitted = true;
        let probe_ctx = self.ctx.with_floor(0);
        let present = candidates(&probe_ctx, self.inner).next().is_some();
        if !present {
            return Some(Expression::new(
                self.rule,
                self.ctx.clone(),
                self.ctx.position(),
                0,
                Vec::new(),
                Vec::new(),
                ExprDetail::None,
            ));
        }
        let specificity = self.ctx.grammar().rule(self.inner).specificity as i64;
        let penalty = -(quality::FORBIDDEN * specificity);
        if penalty < self.ctx.floor() {
            return None;
        }
        let issue = ParseIssue::new(
            self.ctx.position(),
            IssueKind::ForbiddenPresent,
            format!("forbidden {} present", self.ctx.describe(self.inner)),
            penalty,
        );
        Some(Expression::new(
            self.rule,
            self.ctx.clone(),
            self.ctx.position(),
            0,
            Vec::new(),
            vec![issue],
            ExprDetail::None,
        ))
    }
}

// ---------------------------------------------------------------------------
// UpTo

struct UpToCandidates {
    ctx: Context,
    rule: RuleId,
    terminal: RuleId,
    skip: usize,
    done: bool,
}

impl Iterator for UpToCandidates {
    type Item = Expression;

    /// Scan forward one symbol at a time, probing the terminal cleanly at
    /// each offset; each later occurrence is a later candidate.
    fn next(&mut self) -> Option<Expression> {
        if self.done {
            return None;
        }
        loop {
            let at = self.ctx.position() + self.skip;
            let probe_ctx = self.ctx.at(at).with_floor(0);
            if let Some(terminal) = candidates(&probe_ctx, self.terminal).next() {
                let tlen = terminal.length();
                let expr = Expression::new(
                    self.rule,
                    self.ctx.clone(),
                    self.ctx.position(),
                    self.skip + tlen,
                    vec![terminal],
                    Vec::new(),
                    ExprDetail::None,
                );
                // The rescan resumes past the found terminal, never
                // overlapping it.
                self.skip += tlen.max(1);
                return Some(expr);
            }
            match self.ctx.stream().char_at(self.skip) {
                Ok(Some(_)) => self.skip += 1,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.ctx.cache().borrow_mut().poison(e);
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Without / Tag

/// Transparent wrapper around an inner enumeration; used for exclusion
/// scopes (inner runs under a widened exclusion set) and tags.
struct DelegateCandidates {
    ctx: Context,
    rule: RuleId,
    inner: RuleCandidates,
    detail: ExprDetail,
}

impl Iterator for DelegateCandidates {
    type Item = Expression;

    fn next(&mut self) -> Option<Expression> {
        let child = self.inner.next()?;
        Some(Expression::new(
            self.rule,
            self.ctx.clone(),
            self.ctx.position(),
            child.length(),
            vec![child],
            Vec::new(),
            self.detail.clone(),
        ))
    }
}
