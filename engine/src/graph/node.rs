use crate::port::Port;
use crate::unit::{EngineProcessTimeInfo, UnitCell};
use crate::kind::PortFlow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One upstream port summed into one of this node's inputs.
pub struct InputFeed {
    pub source: Arc<Port>,
    pub input: usize,
    pub multiplier: f32,
}

impl fmt::Debug for InputFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputFeed")
            .field("source", &self.source.id())
            .field("input", &self.input)
            .field("multiplier", &self.multiplier)
            .finish()
    }
}

#[derive(Debug)]
pub struct GraphNode {
    pub(crate) index: usize,
    pub(crate) unit: Arc<UnitCell>,
    pub(crate) incoming: Vec<usize>,
    pub(crate) outgoing: Vec<usize>,
    pub(crate) init_refcount: usize,
    pub(crate) refcount: AtomicUsize,
    pub(crate) feeds: Vec<InputFeed>,
    pub(crate) playback_latency: usize,
    pub(crate) route_playback_latency: usize,
}

impl GraphNode {
    pub(crate) fn new(index: usize, unit: Arc<UnitCell>) -> Self {
        let playback_latency = unit.latency();
        Self {
            index,
            unit,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            init_refcount: 0,
            refcount: AtomicUsize::new(0),
            feeds: Vec::new(),
            playback_latency,
            route_playback_latency: playback_latency,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn unit(&self) -> &Arc<UnitCell> {
        &self.unit
    }

    pub fn incoming(&self) -> &[usize] {
        &self.incoming
    }

    pub fn outgoing(&self) -> &[usize] {
        &self.outgoing
    }

    pub fn feeds(&self) -> &[InputFeed] {
        &self.feeds
    }

    pub fn is_initial(&self) -> bool {
        self.incoming.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.outgoing.is_empty()
    }

    pub fn playback_latency(&self) -> usize {
        self.playback_latency
    }

    pub fn route_playback_latency(&self) -> usize {
        self.route_playback_latency
    }

    pub(crate) fn reset(&self) {
        self.refcount.store(self.init_refcount, Ordering::Relaxed);
    }

    /// Called once per finished upstream node; true when this node became
    /// runnable.
    pub(crate) fn upstream_done(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Clears inputs, sums feeds and runs the unit. While latency pre-roll
    /// still covers this route the inputs stay silent.
    pub(crate) fn run(&self, time: &EngineProcessTimeInfo, remaining_latency_preroll: usize) {
        let noroll = remaining_latency_preroll > self.route_playback_latency;
        let offset = time.local_offset;
        let nframes = time.nframes;
        for port in self.unit.ports() {
            if port.flow() == PortFlow::Input {
                port.clear_range(offset, nframes);
            }
        }
        if !noroll {
            let ports = self.unit.ports();
            for feed in &self.feeds {
                if let Some(input) = ports.get(feed.input) {
                    input.mix_from(&feed.source, feed.multiplier, offset, nframes);
                }
            }
        }
        let time = EngineProcessTimeInfo { noroll, ..*time };
        self.unit.process(&time);
    }
}
