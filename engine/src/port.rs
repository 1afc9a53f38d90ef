use crate::kind::{Kind, PortFlow};
use crate::mutex::UnsafeMutex;
use crate::unit::UnitUid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events an event port can hold per cycle. Pushes beyond this are dropped so
/// the buffer never reallocates on the audio thread.
pub const EVENT_CAPACITY: usize = 1024;

/// Stable port address: owning unit plus the port's position in the unit's
/// port list. Survives save/load as long as unit uids do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId {
    pub unit: UnitUid,
    pub index: u32,
}

impl PortId {
    pub fn new(unit: UnitUid, index: u32) -> Self {
        Self { unit, index }
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit, self.index)
    }
}

/// What a unit declares about one of its ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub kind: Kind,
    pub flow: PortFlow,
    pub label: String,
}

impl PortSpec {
    pub fn new(kind: Kind, flow: PortFlow, label: impl Into<String>) -> Self {
        Self {
            kind,
            flow,
            label: label.into(),
        }
    }

    pub fn audio_in(label: impl Into<String>) -> Self {
        Self::new(Kind::Audio, PortFlow::Input, label)
    }

    pub fn audio_out(label: impl Into<String>) -> Self {
        Self::new(Kind::Audio, PortFlow::Output, label)
    }

    pub fn event_in(label: impl Into<String>) -> Self {
        Self::new(Kind::Event, PortFlow::Input, label)
    }

    pub fn event_out(label: impl Into<String>) -> Self {
        Self::new(Kind::Event, PortFlow::Output, label)
    }
}

/// The parts of a port the connection manager needs to validate an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortDescriptor {
    pub id: PortId,
    pub kind: Kind,
    pub flow: PortFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub frame: u32,
    pub data: [u8; 3],
    pub len: u8,
}

impl MidiEvent {
    pub fn new(frame: u32, bytes: &[u8]) -> Self {
        let mut data = [0_u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            frame,
            data,
            len: len as u8,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// A typed endpoint with a buffer preallocated for the largest block.
pub struct Port {
    id: PortId,
    kind: Kind,
    flow: PortFlow,
    label: String,
    samples: UnsafeMutex<Vec<f32>>,
    events: UnsafeMutex<Vec<MidiEvent>>,
}

impl Port {
    pub fn new(id: PortId, spec: &PortSpec, max_block: usize) -> Self {
        let (samples, events) = match spec.kind {
            Kind::Audio | Kind::CV => (vec![0.0; max_block], Vec::new()),
            Kind::Event => (Vec::new(), Vec::with_capacity(EVENT_CAPACITY)),
        };
        Self {
            id,
            kind: spec.kind,
            flow: spec.flow,
            label: spec.label.clone(),
            samples: UnsafeMutex::new(samples),
            events: UnsafeMutex::new(events),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn flow(&self) -> PortFlow {
        self.flow
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn descriptor(&self) -> PortDescriptor {
        PortDescriptor {
            id: self.id,
            kind: self.kind,
            flow: self.flow,
        }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn samples(&self) -> &mut [f32] {
        self.samples.lock().as_mut_slice()
    }

    #[allow(clippy::mut_from_ref)]
    pub fn events(&self) -> &mut Vec<MidiEvent> {
        self.events.lock()
    }

    pub fn push_event(&self, event: MidiEvent) -> bool {
        let events = self.events.lock();
        if events.len() >= events.capacity().min(EVENT_CAPACITY) {
            return false;
        }
        events.push(event);
        true
    }

    /// Zeroes `[offset, offset + nframes)` of a sample port, or drops the
    /// events inside that window of an event port.
    pub fn clear_range(&self, offset: usize, nframes: usize) {
        if self.kind.is_sample_based() {
            let samples = self.samples.lock();
            let end = (offset + nframes).min(samples.len());
            if offset < end {
                samples[offset..end].fill(0.0);
            }
        } else {
            let start = offset as u32;
            let end = (offset + nframes) as u32;
            self.events
                .lock()
                .retain(|e| e.frame < start || e.frame >= end);
        }
    }

    /// Adds `src` scaled by `multiplier` into this port over the given window.
    pub fn mix_from(&self, src: &Port, multiplier: f32, offset: usize, nframes: usize) {
        if self.kind.is_sample_based() && src.kind.is_sample_based() {
            let dst = self.samples.lock();
            let from = src.samples.lock();
            let end = (offset + nframes).min(dst.len()).min(from.len());
            if offset >= end {
                return;
            }
            for (d, s) in dst[offset..end].iter_mut().zip(from[offset..end].iter()) {
                *d += *s * multiplier;
            }
        } else if self.kind == Kind::Event && src.kind == Kind::Event {
            let start = offset as u32;
            let end = (offset + nframes) as u32;
            let incoming = src.events.lock();
            for event in incoming.iter() {
                if event.frame >= start && event.frame < end && !self.push_event(*event) {
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("flow", &self.flow)
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(kind: Kind, flow: PortFlow) -> Port {
        Port::new(
            PortId::new(UnitUid(1), 0),
            &PortSpec::new(kind, flow, "p"),
            8,
        )
    }

    #[test]
    fn mix_is_weighted_and_windowed() {
        let src = port(Kind::Audio, PortFlow::Output);
        let dst = port(Kind::Audio, PortFlow::Input);
        src.samples().fill(1.0);
        dst.mix_from(&src, 0.5, 2, 4);
        dst.mix_from(&src, 0.25, 2, 4);
        assert_eq!(dst.samples(), &[0.0, 0.0, 0.75, 0.75, 0.75, 0.75, 0.0, 0.0]);
    }

    #[test]
    fn event_window_is_respected() {
        let src = port(Kind::Event, PortFlow::Output);
        let dst = port(Kind::Event, PortFlow::Input);
        src.push_event(MidiEvent::new(1, &[0x90, 60, 100]));
        src.push_event(MidiEvent::new(5, &[0x80, 60, 0]));
        dst.mix_from(&src, 1.0, 0, 4);
        assert_eq!(dst.events().len(), 1);
        assert_eq!(dst.events()[0].bytes(), &[0x90, 60, 100]);
        dst.clear_range(0, 4);
        assert!(dst.events().is_empty());
    }
}
