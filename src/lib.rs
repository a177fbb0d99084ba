//! parlance - declarative, error-tolerant parsing
//!
//! Grammars are built as data with [`GrammarBuilder`] and run by a
//! [`Parser`] that searches for the best interpretation of the input
//! rather than the first one. A damaged input still parses: problems are
//! recorded as [`ParseIssue`]s on the result tree and degrade its quality
//! score instead of aborting. Alternative interpretations are enumerated
//! lazily, best first, through [`Expression::next_match`].
//!
//! # Quick start
//!
//! ```rust
//! use parlance::{GrammarBuilder, Parser};
//!
//! let mut b = GrammarBuilder::new();
//! let number = b.pattern("[0-9]+").unwrap();
//! let comma = b.literal(",");
//! let tail = b.sequence(&[comma, number]);
//! let tails = b.repeat(tail, 0, None).unwrap();
//! let items = b.sequence(&[number, tails]);
//! let body = b.optional(items);
//! let open = b.literal("[");
//! let close = b.literal("]");
//! let list = b.sequence(&[open, body, close]);
//!
//! let parser = Parser::new(b.build().unwrap());
//!
//! let clean = parser.parse("[1,2,3]", list).unwrap().unwrap();
//! assert_eq!(clean.quality(), 0);
//!
//! // A damaged input still yields a tree, with the problem localized:
//! // the number missing after the trailing comma.
//! let damaged = parser.parse_tolerant("[1,2,]", list).unwrap().unwrap();
//! assert!(damaged.quality() < 0);
//! let report = damaged.first_error().unwrap();
//! assert_eq!(report.issue.position, 5);
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod expression;
pub mod grammar;
pub mod observer;
pub mod parser;
pub mod quality;
pub mod rule;
pub mod stream;

pub(crate) mod search;

pub use error::{GrammarError, ParseError};
pub use expression::{
    ExprDetail, Expression, ExpressionSummary, IssueKind, IssueReport, ParseIssue,
};
pub use grammar::{Grammar, GrammarBuilder};
pub use observer::{NoopObserver, ParseObserver, TraceObserver};
pub use parser::{Parser, ParserOptions};
pub use quality::rank;
pub use rule::{Rule, RuleId, RuleKind, DEFAULT_MAX_SCAN};
pub use stream::{Stream, StreamError};
