//! Recursive grammar behavior, left recursion included.

use parlance::{
    Expression, GrammarBuilder, IssueKind, ParseObserver, Parser, RuleId, RuleKind,
};
use std::cell::Cell;
use std::rc::Rc;

fn arithmetic() -> (GrammarBuilder, RuleId) {
    let mut b = GrammarBuilder::new();
    let expr = b.declare("expr").unwrap();
    let digit = b.pattern("[0-9]").unwrap();
    let plus = b.literal("+");
    let addition = b.sequence(&[expr, plus, expr]);
    b.define(expr, RuleKind::OneOf {
        members: vec![addition, digit],
    })
    .unwrap();
    (b, expr)
}

#[test]
fn test_left_recursion_terminates_and_spans() {
    let (b, expr) = arithmetic();
    let parser = Parser::new(b.build().unwrap());

    for (input, len) in [("1", 1), ("1+2", 3), ("1+2+3", 5), ("1+2+3+4", 7)] {
        let result = parser.parse(input, expr).unwrap().unwrap();
        assert_eq!(result.length(), len, "input {:?}", input);
        assert_eq!(result.quality(), 0, "input {:?}", input);
    }
}

#[test]
fn test_growth_discards_smaller_accepted_matches() {
    struct Discards {
        count: Cell<usize>,
    }
    impl ParseObserver for Discards {
        fn match_discarded(&self, superseded: &Expression, replacement: &Expression) {
            assert!(replacement.length() > superseded.length());
            self.count.set(self.count.get() + 1);
        }
    }

    let (b, expr) = arithmetic();
    let observer = Rc::new(Discards {
        count: Cell::new(0),
    });
    let parser = Parser::new(b.build().unwrap()).with_observer(observer.clone());

    let result = parser.parse("1+2", expr).unwrap().unwrap();
    assert_eq!(result.length(), 3);
    // The seed match "1" was grown into "1+2" at least once.
    assert!(observer.count.get() >= 1);
}

#[test]
fn test_right_recursion() {
    let mut b = GrammarBuilder::new();
    let expr = b.declare("expr").unwrap();
    let digit = b.pattern("[0-9]").unwrap();
    let plus = b.literal("+");
    let addition = b.sequence(&[digit, plus, expr]);
    b.define(expr, RuleKind::OneOf {
        members: vec![addition, digit],
    })
    .unwrap();
    let parser = Parser::new(b.build().unwrap());

    let result = parser.parse("1+2+3", expr).unwrap().unwrap();
    assert_eq!(result.length(), 5);
    assert_eq!(result.quality(), 0);
}

#[test]
fn test_nested_parentheses() {
    let mut b = GrammarBuilder::new();
    let expr = b.declare("expr").unwrap();
    let digit = b.pattern("[0-9]").unwrap();
    let open = b.literal("(");
    let close = b.literal(")");
    let group = b.sequence(&[open, expr, close]);
    b.define(expr, RuleKind::OneOf {
        members: vec![group, digit],
    })
    .unwrap();
    let parser = Parser::new(b.build().unwrap());

    let result = parser.parse("((1))", expr).unwrap().unwrap();
    assert_eq!(result.length(), 5);
    assert_eq!(result.quality(), 0);
}

#[test]
fn test_left_recursion_mixed_with_grouping() {
    let mut b = GrammarBuilder::new();
    let expr = b.declare("expr").unwrap();
    let term = b.declare("term").unwrap();
    let digit = b.pattern("[0-9]").unwrap();
    let plus = b.literal("+");
    let open = b.literal("(");
    let close = b.literal(")");
    let addition = b.sequence(&[expr, plus, term]);
    let group = b.sequence(&[open, expr, close]);
    b.define(expr, RuleKind::OneOf {
        members: vec![addition, term],
    })
    .unwrap();
    b.define(term, RuleKind::OneOf {
        members: vec![group, digit],
    })
    .unwrap();
    let parser = Parser::new(b.build().unwrap());

    let result = parser.parse("(1+2)+3", expr).unwrap().unwrap();
    assert_eq!(result.length(), 7);
    assert_eq!(result.quality(), 0);
}

#[test]
fn test_recursive_grammar_is_reusable_across_parses() {
    let (b, expr) = arithmetic();
    let parser = Parser::new(b.build().unwrap());

    let first = parser.parse("1+2+3", expr).unwrap().unwrap();
    let second = parser.parse("1+2+3", expr).unwrap().unwrap();
    assert_eq!(first, second);

    // A failing parse in between leaves no residue either.
    assert!(parser.parse("+", expr).unwrap().is_none());
    let third = parser.parse("1+2+3", expr).unwrap().unwrap();
    assert_eq!(first, third);
}

#[test]
fn test_clean_prefix_beats_damaged_longer_reading() {
    let (b, expr) = arithmetic();
    let parser = Parser::new(b.build().unwrap());

    // "1+" reads best as the clean expression "1"; growing it into a
    // damaged addition would lower quality and is not accepted.
    let result = parser.parse("1+", expr).unwrap().unwrap();
    assert_eq!(result.length(), 1);
    assert_eq!(result.quality(), 0);
}

#[test]
fn test_recursion_grows_mid_input() {
    let mut b = GrammarBuilder::new();
    let expr = b.declare("expr").unwrap();
    let digit = b.pattern("[0-9]").unwrap();
    let plus = b.literal("+");
    let addition = b.sequence(&[expr, plus, expr]);
    b.define(expr, RuleKind::OneOf {
        members: vec![addition, digit],
    })
    .unwrap();
    let semi = b.literal(";");
    let stmt = b.sequence(&[expr, semi]);
    let parser = Parser::new(b.build().unwrap());

    // The grown reading "1+2" must be available even though input
    // continues past it.
    let result = parser.parse("1+2;", stmt).unwrap().unwrap();
    assert_eq!(result.length(), 4);
    assert_eq!(result.quality(), 0);
}

#[test]
fn test_tolerant_recovery_around_recursion() {
    let mut b = GrammarBuilder::new();
    let expr = b.declare("expr").unwrap();
    let digit = b.pattern("[0-9]").unwrap();
    let plus = b.literal("+");
    let addition = b.sequence(&[expr, plus, expr]);
    b.define(expr, RuleKind::OneOf {
        members: vec![addition, digit],
    })
    .unwrap();
    let semi = b.literal(";");
    let stmt = b.sequence(&[expr, semi]);
    let parser = Parser::new(b.build().unwrap());

    // "1+;": the best reading grows "1" into a damaged addition whose
    // right operand is absent, then closes with the terminator. All
    // three characters are consumed and the problem sits after the "+".
    assert!(parser.parse("1+;", stmt).unwrap().is_none());
    let result = parser.parse_tolerant("1+;", stmt).unwrap().unwrap();
    assert_eq!(result.length(), 3);
    assert_eq!(result.quality(), -8);
    assert_eq!(result.error_count(), 1);
    let report = result.first_error().unwrap();
    assert_eq!(report.issue.kind, IssueKind::PatternAbsent);
    assert_eq!(report.issue.position, 2);
}

#[test]
fn test_damaged_growth_is_enumerable_as_alternate() {
    let (b, expr) = arithmetic();
    let parser = Parser::new(b.build().unwrap());

    // "1+" reads best as the clean "1"; the grown addition with an
    // absent right operand is the next interpretation down.
    let best = parser.parse_tolerant("1+", expr).unwrap().unwrap();
    assert_eq!(best.length(), 1);
    assert_eq!(best.quality(), 0);

    let next = best.next_match().unwrap();
    assert_eq!(next.length(), 2);
    assert_eq!(next.quality(), -8);
    let report = next.first_error().unwrap();
    assert_eq!(report.issue.kind, IssueKind::PatternAbsent);
    assert_eq!(report.issue.position, 2);
}
