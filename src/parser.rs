//! Entry points
//!
//! A [`Parser`] binds a grammar to a set of options and an observer, and
//! runs one top-level search per call. Each call gets a fresh memo cache;
//! nothing is shared between parses except the grammar itself.

use crate::cache::ParseCache;
use crate::context::Context;
use crate::error::ParseError;
use crate::expression::Expression;
use crate::grammar::Grammar;
use crate::observer::{NoopObserver, ParseObserver};
use crate::quality::rank;
use crate::rule::RuleId;
use crate::search;
use crate::stream::Stream;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use tracing::debug;

/// Tuning knobs for a [`Parser`].
#[derive(Debug, Clone, Copy)]
pub struct ParserOptions {
    /// Quality floor for tolerant parsing. Interpretations scoring below
    /// it are abandoned, which bounds how much error recovery is explored.
    pub tolerant_floor: i64,
    /// How many equal-quality alternatives to examine when picking the
    /// final result. Ties beyond this many are resolved by enumeration
    /// order.
    pub max_tie_scan: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            tolerant_floor: -10_000,
            max_tie_scan: 64,
        }
    }
}

/// A grammar bound and ready to parse. Cheap to keep around; each parse
/// call is independent.
pub struct Parser {
    grammar: Rc<Grammar>,
    options: ParserOptions,
    observer: Rc<dyn ParseObserver>,
}

impl Parser {
    pub fn new(grammar: Grammar) -> Self {
        Self::with_options(grammar, ParserOptions::default())
    }

    pub fn with_options(grammar: Grammar, options: ParserOptions) -> Self {
        Parser {
            grammar: Rc::new(grammar),
            options,
            observer: Rc::new(NoopObserver),
        }
    }

    /// Attach an observer to receive search notifications.
    pub fn with_observer(mut self, observer: Rc<dyn ParseObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Parse `input` against `root`, accepting clean matches only.
    /// `Ok(None)` means the input has no error-free interpretation.
    pub fn parse(&self, input: &str, root: RuleId) -> Result<Option<Expression>, ParseError> {
        self.run(Stream::from_str(input), root, 0)
    }

    /// Parse `input` against `root`, recovering from errors down to the
    /// configured quality floor. The result, if any, is the best-ranked
    /// interpretation; its issues say what was wrong and where.
    pub fn parse_tolerant(
        &self,
        input: &str,
        root: RuleId,
    ) -> Result<Option<Expression>, ParseError> {
        self.run(Stream::from_str(input), root, self.options.tolerant_floor)
    }

    /// Parse an already-constructed stream (a reader- or file-backed one,
    /// or a branch positioned mid-input).
    pub fn parse_stream(
        &self,
        stream: Stream,
        root: RuleId,
        tolerate: bool,
    ) -> Result<Option<Expression>, ParseError> {
        let floor = if tolerate {
            self.options.tolerant_floor
        } else {
            0
        };
        self.run(stream, root, floor)
    }

    fn run(
        &self,
        stream: Stream,
        root: RuleId,
        floor: i64,
    ) -> Result<Option<Expression>, ParseError> {
        let cache = Rc::new(RefCell::new(ParseCache::new()));
        let ctx = Context::new(
            stream,
            floor,
            Rc::clone(&self.grammar),
            Rc::clone(&cache),
            Rc::clone(&self.observer),
        );
        debug!(root = %root, floor, "parse started");

        let mut iter = search::candidates(&ctx, root);
        let first = iter.next();
        if let Some(err) = cache.borrow_mut().take_poison() {
            return Err(ParseError::Stream(err));
        }
        let Some(mut best) = first else {
            debug!(root = %root, "no interpretation at or above floor");
            return Ok(None);
        };

        // The enumeration is non-ascending, so equal-quality alternates
        // come next; rank them so ties resolve on more than arrival order.
        let quality = best.quality();
        for _ in 0..self.options.max_tie_scan {
            let Some(next) = iter.next() else { break };
            if next.quality() < quality {
                break;
            }
            if rank(&next, &best) == Ordering::Greater {
                self.observer.match_discarded(&best, &next);
                best = next;
            }
        }
        if let Some(err) = cache.borrow_mut().take_poison() {
            return Err(ParseError::Stream(err));
        }

        debug!(
            length = best.length(),
            quality = best.quality(),
            errors = best.error_count(),
            "parse finished"
        );
        Ok(Some(best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use std::cell::Cell;
    use std::io;

    #[test]
    fn test_strict_rejects_damaged_input() {
        let mut b = GrammarBuilder::new();
        let word = b.literal("hello");
        let parser = Parser::new(b.build().unwrap());

        assert!(parser.parse("hello", word).unwrap().is_some());
        assert!(parser.parse("helXo", word).unwrap().is_none());
    }

    #[test]
    fn test_tolerant_recovers_with_issues() {
        let mut b = GrammarBuilder::new();
        let word = b.literal("hello");
        let parser = Parser::new(b.build().unwrap());

        let expr = parser.parse_tolerant("helXo", word).unwrap().unwrap();
        assert_eq!(expr.length(), 3);
        assert!(expr.quality() < 0);
        assert_eq!(expr.error_count(), 1);
    }

    #[test]
    fn test_tight_floor_limits_recovery() {
        let mut b = GrammarBuilder::new();
        let word = b.literal("hello");
        let grammar = b.build().unwrap();
        let parser = Parser::with_options(
            grammar,
            ParserOptions {
                tolerant_floor: -4,
                ..ParserOptions::default()
            },
        );

        // Two unmatched trailing symbols cost -8, below the floor.
        assert!(parser.parse_tolerant("helXY", word).unwrap().is_none());
        // One costs -4, exactly at it.
        assert!(parser.parse_tolerant("hellX", word).unwrap().is_some());
    }

    #[test]
    fn test_parse_stream_from_reader() {
        let mut b = GrammarBuilder::new();
        let digits = b.pattern("[0-9]+").unwrap();
        let parser = Parser::new(b.build().unwrap());

        let stream = Stream::from_reader(io::Cursor::new("12345".as_bytes().to_vec()));
        let expr = parser.parse_stream(stream, digits, false).unwrap().unwrap();
        assert_eq!(expr.length(), 5);
        assert_eq!(expr.text(), "12345");
    }

    #[test]
    fn test_stream_fault_is_reported_not_recovered() {
        let mut b = GrammarBuilder::new();
        let digits = b.pattern("[0-9]+").unwrap();
        let parser = Parser::new(b.build().unwrap());

        let stream = Stream::from_reader(io::Cursor::new(vec![b'1', b'2', 0xff]));
        let err = parser.parse_stream(stream, digits, true).unwrap_err();
        assert!(matches!(err, ParseError::Stream(_)));
    }

    #[test]
    fn test_observer_sees_rule_attempts() {
        struct Counter {
            entered: Cell<usize>,
        }
        impl ParseObserver for Counter {
            fn rule_entered(&self, _rule: RuleId, _name: Option<&str>, _position: usize) {
                self.entered.set(self.entered.get() + 1);
            }
        }

        let mut b = GrammarBuilder::new();
        let a = b.literal("a");
        let c = b.literal("b");
        let seq = b.sequence(&[a, c]);
        let observer = Rc::new(Counter {
            entered: Cell::new(0),
        });
        let parser = Parser::new(b.build().unwrap()).with_observer(observer.clone());

        parser.parse("ab", seq).unwrap().unwrap();
        assert!(observer.entered.get() >= 3);
    }

    #[test]
    fn test_empty_input_against_optional() {
        let mut b = GrammarBuilder::new();
        let x = b.literal("x");
        let opt = b.optional(x);
        let parser = Parser::new(b.build().unwrap());

        let expr = parser.parse("", opt).unwrap().unwrap();
        assert_eq!(expr.length(), 0);
        assert_eq!(expr.quality(), 0);
    }
}
