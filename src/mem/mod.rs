pub mod allocator;
pub(crate) mod block;
pub(crate) mod descriptor;
pub(crate) mod free_list;
