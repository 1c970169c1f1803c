//! Declarative reply-check predicates evaluated over a fan-out reply
//! aggregate: identical, typed, valued, and state-comparison variants.

pub mod check;

pub use check::{
    evaluate_all, CheckOutcome, CheckSpec, IdenticalReplyCheck, ReplyCheck, StateHashReplyCheck,
    StateReplyCheck, TypeReplyCheck, ValueReplyCheck,
};
