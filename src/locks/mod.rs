pub mod manager;

pub use manager::{
    call_with_stomp_guard, LockGuard, LockManager, LockMode, MergePatch, ResourceBusyError,
    ResourceClass, ResourceKey, ResourceSnapshot,
};
