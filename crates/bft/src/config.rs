//! Consensus configuration.

use crate::pacemaker::PacemakerConfig;
use crate::sync::SyncConfig;

/// Tunables for the whole consensus machine. Defaults are sized for a
/// small cluster on a LAN-like network; timeouts back off automatically
/// when the network is slower than assumed.
#[derive(Debug, Clone, Default)]
pub struct BftConfig {
    pub pacemaker: PacemakerConfig,
    pub sync: SyncConfig,
}
