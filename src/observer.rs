//! Instrumentation hooks
//!
//! The engine reports rule attempts, cache consultations, and superseded
//! matches through a [`ParseObserver`]. External tooling (debuggers, trace
//! recorders) plugs in here; the engine itself never depends on an
//! observer being present, and [`NoopObserver`] is the default.

use crate::expression::Expression;
use crate::rule::RuleId;
use tracing::trace;

/// Notifications emitted at well-defined points of the search. All methods
/// default to no-ops, so implementors override only what they need.
pub trait ParseObserver {
    /// A rule attempt is starting at `position`.
    fn rule_entered(&self, _rule: RuleId, _name: Option<&str>, _position: usize) {}

    /// A rule attempt finished; `result` is its best interpretation, if any.
    fn rule_exited(
        &self,
        _rule: RuleId,
        _name: Option<&str>,
        _position: usize,
        _result: Option<&Expression>,
    ) {
    }

    /// The memo table was consulted for `(rule, position)`.
    fn cache_consulted(&self, _rule: RuleId, _position: usize, _hit: bool) {}

    /// A previously accepted match was superseded by a better alternative.
    fn match_discarded(&self, _superseded: &Expression, _replacement: &Expression) {}
}

/// The default observer: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ParseObserver for NoopObserver {}

/// Forwards every notification to `tracing` at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceObserver;

impl ParseObserver for TraceObserver {
    fn rule_entered(&self, rule: RuleId, name: Option<&str>, position: usize) {
        trace!(rule = %rule, name = name.unwrap_or("-"), position, "rule entered");
    }

    fn rule_exited(
        &self,
        rule: RuleId,
        name: Option<&str>,
        position: usize,
        result: Option<&Expression>,
    ) {
        match result {
            Some(expr) => trace!(
                rule = %rule,
                name = name.unwrap_or("-"),
                position,
                length = expr.length(),
                quality = expr.quality(),
                "rule matched"
            ),
            None => trace!(
                rule = %rule,
                name = name.unwrap_or("-"),
                position,
                "rule did not match"
            ),
        }
    }

    fn cache_consulted(&self, rule: RuleId, position: usize, hit: bool) {
        trace!(rule = %rule, position, hit, "cache consulted");
    }

    fn match_discarded(&self, superseded: &Expression, replacement: &Expression) {
        trace!(
            position = superseded.position(),
            old_length = superseded.length(),
            new_length = replacement.length(),
            "match discarded"
        );
    }
}
