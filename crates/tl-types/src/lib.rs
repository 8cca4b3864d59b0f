pub mod activity;
pub mod error;
pub mod group;
pub mod invitation;
pub mod member;
pub mod message;

// Re-exports for convenience
pub use activity::{ActivityKind, NewActivity, SyncActivity};
pub use error::{Result, TeamLinkError};
pub use group::Group;
pub use invitation::{Invitation, InvitationStatus};
pub use member::{ExternalIdentity, Member, MemberRef};
pub use message::{
    CacheEntry, CachedMessage, ExternalProfile, NewMessageNotification, MAX_CACHED_MESSAGES,
    STALE_AFTER_SECS,
};
