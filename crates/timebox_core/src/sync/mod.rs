//! Write coalescing and live subscriptions.

pub mod coalescer;
pub mod subscription;

pub use coalescer::{PendingWrite, WriteCoalescer, WriteOutcome};
pub use subscription::{
    SheetListObserver, SubscriptionHandle, SubscriptionManager, SubscriptionState,
};
