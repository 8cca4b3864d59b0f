pub mod activity;
pub mod channel_cache;
pub mod connection;
pub mod groups;
pub mod invitations;
pub mod members;
pub mod settings;

pub use activity::ActivityRepository;
pub use channel_cache::ChannelCacheRepository;
pub use connection::Database;
pub use groups::GroupRepository;
pub use invitations::InvitationRepository;
pub use members::MemberRepository;
pub use settings::{SettingsRepository, BOT_TOKEN_KEY};
