mod arena;
mod node;
mod raw_tree;
mod search;

pub(crate) use arena::Handle;
pub(crate) use raw_tree::RawTree;
