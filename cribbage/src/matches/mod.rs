pub mod broadcast;
pub mod config;
pub mod errors;
pub mod manager;
pub mod messages;
pub mod snapshot;

pub use crate::db::MatchId;
pub use broadcast::{
    Broadcaster, Envelope, Hub, NullBroadcaster, Subscription, match_channel, player_channel,
};
pub use config::ManagerConfig;
pub use errors::{ErrorKind, MatchError, MatchResult};
pub use manager::{LiveMatch, MatchGuard, MatchManager};
pub use messages::{CorrectionRequest, CountRecord, CountRequest, MoveRequest};
pub use snapshot::{MatchSnapshot, PlayerView, StateView};
