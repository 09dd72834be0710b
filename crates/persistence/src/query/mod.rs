//! Query expression model.
//!
//! A [`Query`] is assembled token by token and handed to a data source
//! cursor or count. Backends that filter in process compile it with
//! [`QueryEvaluator`].

mod builder;
mod evaluator;
mod expression;

pub use builder::Query;
pub use evaluator::{Filter, QueryEvaluator};
pub use expression::{Condition, Expression, OrderBy, Predicate};
