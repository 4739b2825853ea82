pub mod logship;

pub use crate::logship::*;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a global `tracing` subscriber writing to stdout. Call once,
/// near the top of `main`.
pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder().with_max_level(max_level).finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
