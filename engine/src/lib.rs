pub mod client;
pub mod config;
pub mod connections;
pub mod context;
mod engine;
pub mod error;
pub mod graph;
pub mod kind;
pub mod message;
pub mod mutex;
pub mod port;
pub mod position;
pub mod router;
pub mod routing;
pub mod semaphore;
pub mod session;
pub mod snap_grid;
pub mod topology;
pub mod transport;
pub mod unit;
pub mod units;
pub mod worker;

pub use config::EngineConfig;
pub use context::{AudioContext, ContextHandle, TransportCommand, TransportSnapshot};
pub use error::{ConnectionError, EngineError};

use tokio::sync::mpsc::{Sender, channel};
use tokio::task::JoinHandle;

/// Spawns the control task on the current tokio runtime. The returned
/// [`AudioContext`] belongs to whichever thread runs the audio callback.
pub fn init(config: EngineConfig) -> (Sender<message::Message>, JoinHandle<()>, AudioContext) {
    let (tx, rx) = channel::<message::Message>(32);
    let (context, handle) = AudioContext::new(&config);
    let mut engine = engine::Engine::new(rx, handle, &config);
    let handle = tokio::spawn(async move {
        engine.init().await;
        engine.work().await;
    });
    (tx, handle, context)
}
