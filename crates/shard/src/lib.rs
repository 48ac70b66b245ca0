//! A worker's in-memory shard: an arena of ingested records indexed by id,
//! and by country and disease through date-ordered AVL trees.

mod avl;
mod blockmap;
mod store;
mod topk;

pub use avl::DateTree;
pub use blockmap::BlockMap;
pub use store::{DomainError, InsertError, Shard};
pub use topk::{top_k, CaseCount};
