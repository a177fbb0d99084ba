//! Candidate matches and their lazy alternatives
//!
//! An [`Expression`] is one concrete interpretation of a rule at a stream
//! position: an immutable tree node (behind `Rc`, so clones are cheap)
//! holding its children, any recovered problems as [`ParseIssue`]s, and a
//! lazily-memoized quality score. It also remembers the context it was
//! parsed under, which is exactly the state [`next_match`] needs to
//! enumerate the next-best alternative interpretation on demand. There is
//! no suspended call stack, only deterministic re-enumeration.
//!
//! [`next_match`]: Expression::next_match

use crate::context::Context;
use crate::rule::{RuleId, RuleKind};
use crate::search;
use once_cell::unsync::OnceCell;
use std::ops::Range;
use std::rc::Rc;

/// Classification of a recovered (never fatal) parse problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum IssueKind {
    /// A literal stopped matching partway through its text.
    SymbolMismatch,
    /// A pattern matched nothing.
    PatternAbsent,
    /// An expected sequence component is absent entirely.
    ComponentMissing,
    /// A repetition matched fewer than its minimum or more than its
    /// maximum count.
    Cardinality,
    /// A forbidden rule's content is present.
    ForbiddenPresent,
}

/// One recovered problem: position, classification, a rendered message,
/// and the quality penalty it contributes (always negative).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ParseIssue {
    pub position: usize,
    pub kind: IssueKind,
    pub message: String,
    pub penalty: i64,
}

impl ParseIssue {
    pub(crate) fn new(position: usize, kind: IssueKind, message: String, penalty: i64) -> Self {
        debug_assert!(penalty < 0, "issues always carry a negative penalty");
        ParseIssue {
            position,
            kind,
            message,
            penalty,
        }
    }
}

/// The earliest issue in a tree, with the rule-name path from the root
/// down to the node that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IssueReport {
    pub issue: ParseIssue,
    pub path: Vec<String>,
}

/// Variant-specific detail retained on a node, for diagnostics and
/// extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprDetail {
    None,
    /// How many leading symbols of the literal matched, out of how many.
    Literal { matched: usize, expected: usize },
    /// Whether the pattern matched at all (as opposed to being absent).
    Pattern { matched: bool },
    /// Number of repetitions in a repeat match.
    Repeat { count: u32 },
    /// Label of a tagged sub-match.
    Tag { label: String },
}

struct ExprNode {
    rule: RuleId,
    position: usize,
    length: usize,
    children: Vec<Expression>,
    issues: Vec<ParseIssue>,
    detail: ExprDetail,
    /// The context this node was parsed under; what `next_match` resumes
    /// from.
    ctx: Context,
    quality: OnceCell<i64>,
}

/// One candidate interpretation of a rule at a position. Immutable once
/// built: alternates are always newly constructed, never patched in place.
#[derive(Clone)]
pub struct Expression {
    node: Rc<ExprNode>,
}

impl Expression {
    pub(crate) fn new(
        rule: RuleId,
        ctx: Context,
        position: usize,
        length: usize,
        children: Vec<Expression>,
        issues: Vec<ParseIssue>,
        detail: ExprDetail,
    ) -> Self {
        Expression {
            node: Rc::new(ExprNode {
                rule,
                position,
                length,
                children,
                issues,
                detail,
                ctx,
                quality: OnceCell::new(),
            }),
        }
    }

    /// The rule this expression interprets.
    pub fn rule(&self) -> RuleId {
        self.node.rule
    }

    /// The rule's name, if it has one.
    pub fn rule_name(&self) -> Option<&str> {
        self.node.ctx.grammar().rule_name(self.node.rule)
    }

    /// Absolute start position in the stream.
    pub fn position(&self) -> usize {
        self.node.position
    }

    /// Matched length in characters.
    pub fn length(&self) -> usize {
        self.node.length
    }

    /// Matched span as absolute positions.
    pub fn span(&self) -> Range<usize> {
        self.node.position..self.node.position + self.node.length
    }

    /// Child interpretations, in match order.
    pub fn children(&self) -> &[Expression] {
        &self.node.children
    }

    /// Issues attached to this node itself (children carry their own).
    pub fn issues(&self) -> &[ParseIssue] {
        &self.node.issues
    }

    /// Variant-specific detail.
    pub fn detail(&self) -> &ExprDetail {
        &self.node.detail
    }

    /// The matched slice of the input.
    pub fn text(&self) -> String {
        let span = self.span();
        self.node.ctx.stream().substring(span.start, span.end)
    }

    /// Match quality: 0 for a clean match, negative otherwise. Additive
    /// over children plus this node's own penalties; computed lazily and
    /// memoized on first access.
    pub fn quality(&self) -> i64 {
        *self.node.quality.get_or_init(|| {
            let own: i64 = self.node.issues.iter().map(|i| i.penalty).sum();
            let children: i64 = self.node.children.iter().map(|c| c.quality()).sum();
            own + children
        })
    }

    /// Total recovered problems in this tree.
    pub fn error_count(&self) -> usize {
        self.node.issues.len()
            + self
                .node
                .children
                .iter()
                .map(|c| c.error_count())
                .sum::<usize>()
    }

    /// The earliest issue in the tree, by position (tree order on ties),
    /// with the rule-name path leading to it.
    pub fn first_error(&self) -> Option<IssueReport> {
        fn visit(expr: &Expression, path: &mut Vec<String>, best: &mut Option<IssueReport>) {
            if let Some(name) = expr.rule_name() {
                path.push(name.to_string());
            }
            for issue in expr.issues() {
                let better = best
                    .as_ref()
                    .map_or(true, |b| issue.position < b.issue.position);
                if better {
                    *best = Some(IssueReport {
                        issue: issue.clone(),
                        path: path.clone(),
                    });
                }
            }
            for child in expr.children() {
                visit(child, path, best);
            }
            if expr.rule_name().is_some() {
                path.pop();
            }
        }

        let mut best = None;
        visit(self, &mut Vec::new(), &mut best);
        best
    }

    /// Human-readable rendering of the first error, with line/column.
    pub fn describe_first_error(&self) -> Option<String> {
        let report = self.first_error()?;
        let (line, col) = self.node.ctx.stream().line_col(report.issue.position);
        let place = if report.path.is_empty() {
            String::new()
        } else {
            format!(" (in {})", report.path.join(" > "))
        };
        Some(format!(
            "parse problem at line {}, column {}: {}{}",
            line, col, report.issue.message, place
        ))
    }

    /// Whether this match consumed input through the fully discovered end
    /// of the stream.
    pub fn is_complete(&self) -> bool {
        let stream = self.node.ctx.stream();
        stream.is_fully_discovered() && self.span().end == stream.discovered_len()
    }

    /// Nodes in this tree, the Occam's-razor tiebreak in ranking.
    pub fn node_count(&self) -> usize {
        1 + self
            .node
            .children
            .iter()
            .map(|c| c.node_count())
            .sum::<usize>()
    }

    /// The best strictly-lower-quality alternative interpretation of the
    /// same rule at the same position, or `None` when none remains at or
    /// above the quality floor this expression was parsed under.
    ///
    /// Successive calls down a chain of results are strictly
    /// quality-descending and terminate: the underlying enumeration is
    /// deterministic and non-ascending, and equal-quality alternates are
    /// collapsed.
    pub fn next_match(&self) -> Option<Expression> {
        let bound = self.quality();
        search::candidates(&self.node.ctx, self.node.rule).find(|c| c.quality() < bound)
    }

    /// All sub-matches tagged with `label`, in tree order.
    pub fn find_tagged(&self, label: &str) -> Vec<Expression> {
        let mut found = Vec::new();
        self.collect_tagged(label, &mut found);
        found
    }

    fn collect_tagged(&self, label: &str, found: &mut Vec<Expression>) {
        if let ExprDetail::Tag { label: own } = &self.node.detail {
            if own == label {
                found.push(self.clone());
            }
        }
        for child in self.children() {
            child.collect_tagged(label, found);
        }
    }

    /// Indented tree dump for diagnostics.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.outline_into(&mut out, 0);
        out
    }

    fn outline_into(&self, out: &mut String, depth: usize) {
        let grammar = self.node.ctx.grammar();
        let label = grammar.describe(self.node.rule);
        let snippet: String = self.text().chars().take(24).collect();
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!(
            "{} [{}..{}] {:?} q={}\n",
            label,
            self.span().start,
            self.span().end,
            snippet,
            self.quality()
        ));
        for issue in self.issues() {
            out.push_str(&"  ".repeat(depth + 1));
            out.push_str(&format!("! {}\n", issue.message));
        }
        for child in self.children() {
            child.outline_into(out, depth + 1);
        }
    }

    /// Plain-data snapshot of this tree, suitable for external tooling.
    pub fn summary(&self) -> ExpressionSummary {
        ExpressionSummary {
            rule: self.rule_name().map(str::to_string),
            position: self.position(),
            length: self.length(),
            quality: self.quality(),
            error_count: self.error_count(),
            issues: self.node.issues.clone(),
            children: self.node.children.iter().map(|c| c.summary()).collect(),
        }
    }

    /// Line and column (1-based) of an absolute position in the underlying
    /// stream.
    pub fn line_col(&self, pos: usize) -> (usize, usize) {
        self.node.ctx.stream().line_col(pos)
    }

    /// Whether this node is a transparent `Tag` wrapper.
    pub fn tag_label(&self) -> Option<&str> {
        match self.node.ctx.grammar().rule(self.node.rule).kind {
            RuleKind::Tag { ref label, .. } => Some(label),
            _ => None,
        }
    }
}

/// Structural equality: same rule, span, issues, detail, and children.
/// Identity and cached state are ignored, so two independent parses of the
/// same input compare equal.
impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.node.rule == other.node.rule
            && self.node.position == other.node.position
            && self.node.length == other.node.length
            && self.node.issues == other.node.issues
            && self.node.detail == other.node.detail
            && self.node.children == other.node.children
    }
}

impl Eq for Expression {}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expression")
            .field("rule", &self.node.rule)
            .field("span", &self.span())
            .field("quality", &self.quality())
            .field("errors", &self.error_count())
            .field("children", &self.node.children.len())
            .finish()
    }
}

/// Serializable outline node mirroring an [`Expression`] tree.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ExpressionSummary {
    pub rule: Option<String>,
    pub position: usize,
    pub length: usize,
    pub quality: i64,
    pub error_count: usize,
    pub issues: Vec<ParseIssue>,
    pub children: Vec<ExpressionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use crate::parser::Parser;

    #[test]
    fn test_quality_is_additive_and_memoized() {
        let mut b = GrammarBuilder::new();
        let a = b.literal("ab");
        let c = b.literal("cd");
        let seq = b.sequence(&[a, c]);
        let parser = Parser::new(b.build().unwrap());

        let expr = parser.parse_tolerant("abcx", seq).unwrap().unwrap();
        let child_sum: i64 = expr.children().iter().map(|c| c.quality()).sum();
        let own: i64 = expr.issues().iter().map(|i| i.penalty).sum();
        assert_eq!(expr.quality(), child_sum + own);
        // Second access hits the memoized value.
        assert_eq!(expr.quality(), child_sum + own);
    }

    #[test]
    fn test_structural_equality_across_parses() {
        let mut b = GrammarBuilder::new();
        let word = b.literal("word");
        let parser = Parser::new(b.build().unwrap());

        let first = parser.parse("word", word).unwrap().unwrap();
        let second = parser.parse("word", word).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_first_error_path_and_position() {
        let mut b = GrammarBuilder::new();
        let open = b.literal("(");
        let body = b.declare("body").unwrap();
        b.define(body, RuleKind::literal("inner")).unwrap();
        let close = b.literal(")");
        let group = b.declare("group").unwrap();
        b.define(group, RuleKind::Sequence {
            items: vec![open, body, close],
        })
        .unwrap();
        let parser = Parser::new(b.build().unwrap());

        let expr = parser.parse_tolerant("(inn", group).unwrap().unwrap();
        let report = expr.first_error().unwrap();
        assert!(report.issue.position >= 1);
        assert!(report.path.contains(&"group".to_string()));
    }

    #[test]
    fn test_text_and_span() {
        let mut b = GrammarBuilder::new();
        let word = b.literal("hello");
        let parser = Parser::new(b.build().unwrap());

        let expr = parser.parse("hello", word).unwrap().unwrap();
        assert_eq!(expr.span(), 0..5);
        assert_eq!(expr.text(), "hello");
        assert!(expr.is_complete());
    }

    #[test]
    fn test_outline_mentions_rule_names() {
        let mut b = GrammarBuilder::new();
        let digits = b.declare("digits").unwrap();
        b.define(digits, RuleKind::pattern("[0-9]+").unwrap())
            .unwrap();
        let parser = Parser::new(b.build().unwrap());

        let expr = parser.parse("123", digits).unwrap().unwrap();
        assert!(expr.outline().contains("digits"));
    }
}
