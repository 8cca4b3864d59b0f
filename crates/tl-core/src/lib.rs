pub mod broadcast;
pub mod cache_store;
pub mod credentials;
pub mod fetcher;
pub mod identity;
pub mod invitations;
pub mod lifecycle;
pub mod logging;
pub mod membership;
pub mod messages;
pub mod naming;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::{
    BroadcastHub, Listener, LocalTransport, Subscription, Transport, TransportSink,
    TransportSubscription, NEW_MESSAGE_EVENT,
};
pub use cache_store::CacheStore;
pub use credentials::{CredentialCache, CredentialSource, SettingsCredentialSource};
pub use fetcher::MessageFetcher;
pub use identity::IdentityService;
pub use invitations::InvitationService;
pub use lifecycle::{ChannelLifecycle, CreateChannelInput, CreatedChannel};
pub use logging::init_logging;
pub use membership::{MemberFailure, MemberSyncReport, MembershipSynchronizer, SyncReport};
pub use messages::{ChannelPreview, MessageService, NewUpload};
pub use naming::normalize_channel_name;
pub use services::Services;
