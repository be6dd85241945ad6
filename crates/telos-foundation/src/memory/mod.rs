//! Bounded memory stores.
//!
//! Two views back every cycle: working memory (key/value, LRU + TTL) for
//! context reassembly, and episodic memory (append-only, age/byte-bounded)
//! for the durable history of actions and observations. [`MemoryStore`]
//! shards both per tenant; within a tenant, writes are serialized.

mod episodic;
mod store;
mod working;

pub use episodic::EpisodicMemory;
pub use store::MemoryStore;
pub use telos_kernel::memory::ContextSummary;
pub use working::WorkingMemory;
