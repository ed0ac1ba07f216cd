//! Minimap synchronization for Skylink.
//!
//! The game sends the positions of every entity on its map as a stream of
//! frames: periodic full snapshots, and deltas in between. Frames are
//! numbered, and every delta names the frame it was computed against, so a
//! receiver can tell exactly when it has fallen out of step.
//!
//! - [`DeltaEncoder`] is the sending side: it turns successive snapshots
//!   into full and delta frames.
//! - [`MinimapStore`] is the receiving side: it applies frames only when
//!   they continue its current baseline and otherwise waits for the next
//!   full snapshot.
//!
//! ```text
//!   full(5) ─→ delta(6←5) ─→ delta(7←6) ─╳─ delta(9←8) ─→ ... ─→ full(12)
//!   Synced      Synced        Synced      AwaitingFull           Synced
//! ```
//!
//! Nothing is ever acknowledged or retransmitted. The sender keeps no
//! per-receiver state; the receiver heals itself at the next full frame.

mod encoder;
mod store;

pub use encoder::{DeltaEncoder, Frame, Snapshot, SnapshotEntity};
pub use store::{
    ApplyOutcome, DiscardReason, Entity, MinimapStore, MinimapView, SyncMetrics, SyncState,
};
