//! End-to-end grammar scenarios.

use parlance::{GrammarBuilder, IssueKind, Parser, RuleId, RuleKind, Stream};

#[test]
fn test_literal_exact_match() {
    let mut b = GrammarBuilder::new();
    let word = b.literal("hello");
    let parser = Parser::new(b.build().unwrap());

    let expr = parser.parse("hello", word).unwrap().unwrap();
    assert_eq!(expr.span(), 0..5);
    assert_eq!(expr.text(), "hello");
    assert_eq!(expr.quality(), 0);
    assert_eq!(expr.error_count(), 0);
}

#[test]
fn test_parse_from_mid_stream_position() {
    let mut b = GrammarBuilder::new();
    let word = b.literal("abc");
    let parser = Parser::new(b.build().unwrap());

    let stream = Stream::from_str("xxabc").advance(2);
    let expr = parser.parse_stream(stream, word, false).unwrap().unwrap();
    assert_eq!(expr.position(), 2);
    assert_eq!(expr.span(), 2..5);
    assert_eq!(expr.text(), "abc");
}

#[test]
fn test_sequence_spans_and_sums() {
    let mut b = GrammarBuilder::new();
    let a = b.literal("foo");
    let c = b.literal("bar");
    let seq = b.sequence(&[a, c]);
    let parser = Parser::new(b.build().unwrap());

    let expr = parser.parse("foobar", seq).unwrap().unwrap();
    assert_eq!(expr.length(), 6);
    assert_eq!(expr.children().len(), 2);
    let child_total: usize = expr.children().iter().map(|c| c.length()).sum();
    assert_eq!(child_total, expr.length());
    assert_eq!(expr.children()[0].text(), "foo");
    assert_eq!(expr.children()[1].text(), "bar");
}

#[test]
fn test_pattern_matches_longest_prefix() {
    let mut b = GrammarBuilder::new();
    let number = b.pattern("[0-9]+").unwrap();
    let parser = Parser::new(b.build().unwrap());

    let expr = parser.parse("42", number).unwrap().unwrap();
    assert_eq!(expr.length(), 2);

    // A clean shorter prefix still parses cleanly.
    let expr = parser.parse("4a", number).unwrap().unwrap();
    assert_eq!(expr.length(), 1);
    assert_eq!(expr.quality(), 0);

    // No digits at all: nothing clean to return.
    assert!(parser.parse("a4", number).unwrap().is_none());
}

#[test]
fn test_repeat_counts_and_cardinality() {
    let mut b = GrammarBuilder::new();
    let x = b.literal("x");
    let three_to_five = b.repeat(x, 3, Some(5)).unwrap();
    let parser = Parser::new(b.build().unwrap());

    assert!(parser.parse("xxx", three_to_five).unwrap().is_some());
    assert!(parser.parse("xxxxx", three_to_five).unwrap().is_some());

    // Too few: strict refuses, tolerant degrades.
    assert!(parser.parse("xx", three_to_five).unwrap().is_none());
    let short = parser.parse_tolerant("xx", three_to_five).unwrap().unwrap();
    assert_eq!(short.children().len(), 2);
    assert_eq!(short.issues()[0].kind, IssueKind::Cardinality);
    assert!(short.quality() < 0);
}

fn list_grammar() -> (Parser, RuleId) {
    let mut b = GrammarBuilder::new();
    let number = b.declare("number").unwrap();
    b.define(number, RuleKind::pattern("[0-9]+").unwrap())
        .unwrap();
    let comma = b.literal(",");
    let tail = b.sequence(&[comma, number]);
    let tails = b.repeat(tail, 0, None).unwrap();
    let items = b.sequence(&[number, tails]);
    let body = b.optional(items);
    let open = b.literal("[");
    let close = b.literal("]");
    let list = b.declare("list").unwrap();
    b.define(list, RuleKind::Sequence {
        items: vec![open, body, close],
    })
    .unwrap();
    (Parser::new(b.build().unwrap()), list)
}

#[test]
fn test_list_clean() {
    let (parser, list) = list_grammar();
    let expr = parser.parse("[1,2,3]", list).unwrap().unwrap();
    assert_eq!(expr.length(), 7);
    assert_eq!(expr.quality(), 0);
    assert!(expr.is_complete());
}

#[test]
fn test_empty_list_clean() {
    let (parser, list) = list_grammar();
    let expr = parser.parse("[]", list).unwrap().unwrap();
    assert_eq!(expr.length(), 2);
    assert_eq!(expr.quality(), 0);
}

#[test]
fn test_list_trailing_comma_localized() {
    let (parser, list) = list_grammar();

    assert!(parser.parse("[1,2,]", list).unwrap().is_none());

    let expr = parser.parse_tolerant("[1,2,]", list).unwrap().unwrap();
    assert_eq!(expr.length(), 6);
    assert_eq!(expr.error_count(), 1);

    // The best reading is "a number is missing after the final comma",
    // not "the list ends early".
    let report = expr.first_error().unwrap();
    assert_eq!(report.issue.kind, IssueKind::PatternAbsent);
    assert_eq!(report.issue.position, 5);
    assert!(report.path.contains(&"list".to_string()));
}

#[test]
fn test_list_error_description_has_line_and_column() {
    let (parser, list) = list_grammar();
    let expr = parser.parse_tolerant("[1,2,]", list).unwrap().unwrap();
    let rendered = expr.describe_first_error().unwrap();
    assert!(rendered.contains("line 1"));
    assert!(rendered.contains("column 6"));
}

#[test]
fn test_left_recursive_addition() {
    let mut b = GrammarBuilder::new();
    let expr = b.declare("expr").unwrap();
    let digit = b.pattern("[0-9]").unwrap();
    let plus = b.literal("+");
    let addition = b.sequence(&[expr, plus, expr]);
    b.define(expr, RuleKind::OneOf {
        members: vec![addition, digit],
    })
    .unwrap();
    let parser = Parser::new(b.build().unwrap());

    let result = parser.parse("1+2+3", expr).unwrap().unwrap();
    assert_eq!(result.length(), 5);
    assert_eq!(result.quality(), 0);
    assert!(result.is_complete());
}

#[test]
fn test_completeness_breaks_quality_ties() {
    // Both "/*a*/" and "/*a*/b*/" are clean readings; the one consuming
    // the whole input is ranked better.
    let mut b = GrammarBuilder::new();
    let open = b.literal("/*");
    let close = b.literal("*/");
    let rest = b.up_to(close);
    let comment = b.sequence(&[open, rest]);
    let parser = Parser::new(b.build().unwrap());

    let expr = parser.parse("/*a*/b*/", comment).unwrap().unwrap();
    assert_eq!(expr.length(), 8);
    assert!(expr.is_complete());

    let expr = parser.parse("/*a*/b", comment).unwrap().unwrap();
    assert_eq!(expr.length(), 5);
}
