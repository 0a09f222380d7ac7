//! Memory substrate: the page, bump and slab allocators the rest of the
//! core is built on. Everything above this module allocates through one
//! of these three, never directly through the global allocator.

pub mod bump;
pub mod page;
pub mod slab;

pub use bump::BumpAllocator;
pub use page::page_size;
pub use slab::SlabAllocator;
