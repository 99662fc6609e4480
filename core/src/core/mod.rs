pub mod callbacks;
pub mod context;
pub mod data;
pub mod store;

// Re-export key types for easier access from other reqscope modules (and lib.rs)
pub use callbacks::CallbackIndex;
pub use context::ExecutionContext;
pub use data::{acquire, attach, AttachedData, DataId, DataRef};
pub use store::ContextStore;
