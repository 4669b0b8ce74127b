pub mod batcher;
pub mod filter;
pub mod merge;

pub use batcher::{Completion, MergedQuery, PendingQuery, QueryBatcher};
pub use filter::QueryFilter;
pub use merge::{MergeRule, QueryClass};
