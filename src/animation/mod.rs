//! Serialized playback of visual packet effects

pub mod effects;
pub mod queue;

pub use effects::{plan_dhcp_exchange, plan_ping, EffectKind, PacketEffect, PingPlan};
pub use queue::{AnimationError, AnimationQueue, Sequencer};
