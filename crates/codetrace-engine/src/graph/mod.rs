pub mod store;

pub use store::{CommitCounts, GraphStore};
