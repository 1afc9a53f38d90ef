use crate::mutex::UnsafeMutex;
use crate::port::{MidiEvent, Port, PortId, PortSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Session-stable unit identity. Ports are addressed through it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnitUid(pub u64);

impl fmt::Display for UnitUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Track,
    Plugin,
    Fader,
    Send,
    HardwareIo,
    SampleProcessor,
    ModulatorMacro,
}

/// Time range handed to every unit for one sub-cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineProcessTimeInfo {
    /// Playhead frame at the start of the whole callback block.
    pub g_start_frame: i64,
    /// Playhead frame at `local_offset`.
    pub g_start_frame_w_offset: i64,
    /// Offset of this sub-range inside the block buffers.
    pub local_offset: usize,
    pub nframes: usize,
    /// Set while latency pre-roll has not reached this node yet.
    pub noroll: bool,
    pub rolling: bool,
}

impl EngineProcessTimeInfo {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.local_offset..self.local_offset + self.nframes
    }
}

/// Windowed view of a unit's ports for the current sub-range.
pub struct PortIo<'a> {
    ports: &'a [Arc<Port>],
    offset: usize,
    nframes: usize,
}

impl<'a> PortIo<'a> {
    pub fn new(ports: &'a [Arc<Port>], offset: usize, nframes: usize) -> Self {
        Self {
            ports,
            offset,
            nframes,
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn port(&self, index: usize) -> Option<&Port> {
        self.ports.get(index).map(|p| p.as_ref())
    }

    pub fn input(&self, index: usize) -> &[f32] {
        match self.ports.get(index) {
            Some(port) => window(port.samples(), self.offset, self.nframes),
            None => &[],
        }
    }

    pub fn output(&mut self, index: usize) -> &mut [f32] {
        match self.ports.get(index) {
            Some(port) => window(port.samples(), self.offset, self.nframes),
            None => &mut [],
        }
    }

    pub fn events(&self, index: usize) -> &[MidiEvent] {
        match self.ports.get(index) {
            Some(port) => port.events().as_slice(),
            None => &[],
        }
    }

    pub fn push_event(&mut self, index: usize, event: MidiEvent) -> bool {
        self.ports
            .get(index)
            .map(|port| port.push_event(event))
            .unwrap_or(false)
    }

    pub fn clear_output(&mut self, index: usize) {
        if let Some(port) = self.ports.get(index) {
            port.clear_range(self.offset, self.nframes);
        }
    }

    /// Writes `from * gain` over the window of `to`.
    pub fn copy_scaled(&mut self, from: usize, to: usize, gain: f32) {
        if from == to {
            return;
        }
        let (Some(src), Some(dst)) = (self.ports.get(from), self.ports.get(to)) else {
            return;
        };
        let src = window(src.samples(), self.offset, self.nframes);
        let dst = window(dst.samples(), self.offset, self.nframes);
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = *s * gain;
        }
    }

    /// Appends the events of `from` that fall inside the window to `to`,
    /// stopping when `to` is full.
    pub fn forward_events(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let (Some(src), Some(dst)) = (self.ports.get(from), self.ports.get(to)) else {
            return;
        };
        let start = self.offset as u32;
        let end = (self.offset + self.nframes) as u32;
        for event in src.events().iter() {
            if event.frame < start || event.frame >= end {
                continue;
            }
            if !dst.push_event(*event) {
                break;
            }
        }
    }
}

fn window(samples: &mut [f32], offset: usize, nframes: usize) -> &mut [f32] {
    let start = offset.min(samples.len());
    let end = (offset + nframes).min(samples.len());
    &mut samples[start..end]
}

/// Anything the scheduler can run for a time range.
pub trait ProcessingUnit: Send {
    fn kind(&self) -> UnitKind;
    fn name(&self) -> &str;
    fn ports(&self) -> Vec<PortSpec>;
    /// Extra playback latency in frames this unit adds to its route. Read
    /// on the control thread whenever a graph is built, possibly while the
    /// unit is processing, so report it from state published for that
    /// (an atomic, or a value fixed in `prepare`).
    fn latency(&self) -> usize {
        0
    }
    fn prepare(&mut self, _sample_rate: u32, _max_block: usize) {}
    fn process(&mut self, time: &EngineProcessTimeInfo, io: &mut PortIo<'_>);
}

/// Registry entry: a unit, its instantiated ports and cached metadata.
pub struct UnitCell {
    uid: UnitUid,
    kind: UnitKind,
    name: String,
    latency: AtomicUsize,
    ports: Vec<Arc<Port>>,
    processor: UnsafeMutex<Box<dyn ProcessingUnit>>,
}

impl UnitCell {
    pub fn new(
        uid: UnitUid,
        mut unit: Box<dyn ProcessingUnit>,
        sample_rate: u32,
        max_block: usize,
    ) -> Self {
        unit.prepare(sample_rate, max_block);
        let ports = unit
            .ports()
            .iter()
            .enumerate()
            .map(|(index, spec)| Arc::new(Port::new(PortId::new(uid, index as u32), spec, max_block)))
            .collect();
        Self {
            uid,
            kind: unit.kind(),
            name: unit.name().to_string(),
            latency: AtomicUsize::new(unit.latency()),
            ports,
            processor: UnsafeMutex::new(unit),
        }
    }

    pub fn uid(&self) -> UnitUid {
        self.uid
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &[Arc<Port>] {
        &self.ports
    }

    pub fn port(&self, index: u32) -> Option<&Arc<Port>> {
        self.ports.get(index as usize)
    }

    /// Latency cached at the last graph snapshot.
    pub fn latency(&self) -> usize {
        self.latency.load(Ordering::Relaxed)
    }

    /// Asks the unit for its current latency and caches it for the next
    /// build. Control thread only.
    pub fn refresh_latency(&self) -> usize {
        let frames = self.processor.lock().latency();
        self.latency.store(frames, Ordering::Relaxed);
        frames
    }

    /// Only the worker holding this node for the current cycle may call this.
    pub fn process(&self, time: &EngineProcessTimeInfo) {
        let mut io = PortIo::new(&self.ports, time.local_offset, time.nframes);
        self.processor.lock().process(time, &mut io);
    }
}

impl fmt::Debug for UnitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitCell")
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("ports", &self.ports.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_ports() -> Vec<Arc<Port>> {
        [PortSpec::event_in("in"), PortSpec::event_out("out")]
            .iter()
            .enumerate()
            .map(|(i, spec)| Arc::new(Port::new(PortId::new(UnitUid(3), i as u32), spec, 64)))
            .collect()
    }

    #[test]
    fn forwarded_events_stay_inside_the_window() {
        let ports = event_ports();
        for frame in [0, 10, 31, 32, 40, 63] {
            ports[0].push_event(MidiEvent::new(frame, &[0x90, 60, 100]));
        }
        // A block split at frame 32 forwards each half once.
        PortIo::new(&ports, 0, 32).forward_events(0, 1);
        let first: Vec<u32> = ports[1].events().iter().map(|e| e.frame).collect();
        assert_eq!(first, vec![0, 10, 31]);

        PortIo::new(&ports, 32, 32).forward_events(0, 1);
        let all: Vec<u32> = ports[1].events().iter().map(|e| e.frame).collect();
        assert_eq!(all, vec![0, 10, 31, 32, 40, 63]);
    }
}
