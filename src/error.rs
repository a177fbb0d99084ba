//! Fatal error types
//!
//! Match-level problems (missing components, cardinality violations,
//! forbidden content) are data, not errors: they ride along on expressions
//! as [`ParseIssue`](crate::expression::ParseIssue)s and only lower match
//! quality. The types here cover the two genuinely fatal categories: a
//! malformed rule graph, raised at construction time and never reaching the
//! engine, and an input fault, which aborts the parse in progress.

use crate::stream::StreamError;
use thiserror::Error;

/// Rule-graph construction failure. Raised by
/// [`GrammarBuilder`](crate::grammar::GrammarBuilder) before any parsing
/// can start.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("duplicate rule name '{name}'")]
    DuplicateRule { name: String },

    #[error("rule '{name}' was declared but never defined")]
    UndefinedRule { name: String },

    #[error("rule #{index} references a rule outside this grammar")]
    UnresolvedReference { index: usize },

    #[error("rule '{name}' is defined only in terms of itself")]
    SelfReferential { name: String },

    #[error("repeat range is empty: max {max} is below min {min}")]
    InvalidRepeat { min: u32, max: u32 },

    #[error("invalid pattern /{source}/: {error}")]
    InvalidPattern {
        source: String,
        #[source]
        error: Box<regex::Error>,
    },

    #[error("rule #{index} is already defined")]
    Redefined { index: usize },
}

/// Fatal parse-time failure. The only variant is an underlying input
/// fault; everything else the engine encounters is recovered locally.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("input stream failure: {0}")]
    Stream(#[from] StreamError),
}
