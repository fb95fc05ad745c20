pub mod builder;
pub mod filter;
mod pattern;
pub mod plan;

pub use builder::Query;
pub use filter::{Filter, FilterOp};
pub use plan::{ComponentConstraint, QueryPlan, SortDirection, SortKey};
