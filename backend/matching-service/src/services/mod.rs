pub mod blocks;
pub mod discovery;
pub mod events;
pub mod ledger;
pub mod messaging_gate;
pub mod visibility;

pub use blocks::BlockService;
pub use discovery::{DiscoveryEngine, DiscoveryPolicy, DiscoveryResult, DiscoveryTier, PolicyLadder};
pub use events::NotificationBus;
pub use ledger::{GiftLedgerService, GiftPolicy};
pub use messaging_gate::{MessagingGate, QuotaStatus};
pub use visibility::{VisibilityService, VisibilityVerdict};
