use crate::port::PortSpec;
use crate::unit::{EngineProcessTimeInfo, PortIo, ProcessingUnit, UnitKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Mixer strip state shared between the control side and the track unit.
#[derive(Debug, Default)]
pub struct TrackControls {
    level_db: AtomicU32,
    armed: AtomicBool,
    muted: AtomicBool,
    soloed: AtomicBool,
    /// Set while another track is soloed.
    solo_silenced: AtomicBool,
}

impl TrackControls {
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_db.load(Ordering::Relaxed))
    }
    pub fn set_level(&self, level_db: f32) {
        self.level_db.store(level_db.to_bits(), Ordering::Relaxed);
    }

    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::Relaxed)
    }
    pub fn arm(&self) {
        self.armed.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
    pub fn mute(&self) {
        self.muted.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn soloed(&self) -> bool {
        self.soloed.load(Ordering::Relaxed)
    }
    pub fn solo(&self) {
        self.soloed.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn set_solo_silenced(&self, silenced: bool) {
        self.solo_silenced.store(silenced, Ordering::Relaxed);
    }

    pub fn audible(&self) -> bool {
        !self.muted() && !self.solo_silenced.load(Ordering::Relaxed)
    }

    pub fn gain(&self) -> f32 {
        if !self.audible() {
            0.0
        } else {
            10.0_f32.powf(self.level() / 20.0)
        }
    }
}

/// Port layout: audio inputs, audio outputs, then one event input and one
/// event output when `midi` is set.
pub struct Track {
    name: String,
    audio_ins: usize,
    audio_outs: usize,
    midi: bool,
    controls: Arc<TrackControls>,
}

impl Track {
    pub fn new(name: impl Into<String>, audio_ins: usize, audio_outs: usize, midi: bool) -> Self {
        Self {
            name: name.into(),
            audio_ins,
            audio_outs,
            midi,
            controls: Arc::new(TrackControls::default()),
        }
    }

    pub fn controls(&self) -> Arc<TrackControls> {
        self.controls.clone()
    }

    fn midi_in_index(&self) -> usize {
        self.audio_ins + self.audio_outs
    }
}

impl ProcessingUnit for Track {
    fn kind(&self) -> UnitKind {
        UnitKind::Track
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> Vec<PortSpec> {
        let mut ports = Vec::with_capacity(self.audio_ins + self.audio_outs + 2);
        for i in 0..self.audio_ins {
            ports.push(PortSpec::audio_in(format!("{} in {}", self.name, i + 1)));
        }
        for i in 0..self.audio_outs {
            ports.push(PortSpec::audio_out(format!("{} out {}", self.name, i + 1)));
        }
        if self.midi {
            ports.push(PortSpec::event_in(format!("{} midi in", self.name)));
            ports.push(PortSpec::event_out(format!("{} midi out", self.name)));
        }
        ports
    }

    fn process(&mut self, time: &EngineProcessTimeInfo, io: &mut PortIo<'_>) {
        let gain = if time.noroll { 0.0 } else { self.controls.gain() };
        for out in 0..self.audio_outs {
            let out_index = self.audio_ins + out;
            if self.audio_ins == 0 || gain == 0.0 {
                io.clear_output(out_index);
                continue;
            }
            io.copy_scaled(out % self.audio_ins, out_index, gain);
        }
        if self.midi {
            let midi_in = self.midi_in_index();
            let midi_out = midi_in + 1;
            io.clear_output(midi_out);
            if gain > 0.0 {
                io.forward_events(midi_in, midi_out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Port, PortId};
    use crate::unit::UnitUid;

    fn ports_for(track: &Track) -> Vec<Arc<Port>> {
        track
            .ports()
            .iter()
            .enumerate()
            .map(|(i, spec)| Arc::new(Port::new(PortId::new(UnitUid(7), i as u32), spec, 4)))
            .collect()
    }

    #[test]
    fn unity_level_copies_input() {
        let mut track = Track::new("t", 1, 2, false);
        let ports = ports_for(&track);
        ports[0].samples().copy_from_slice(&[0.5, -0.5, 0.25, 1.0]);
        let time = EngineProcessTimeInfo {
            nframes: 4,
            rolling: true,
            ..Default::default()
        };
        track.process(&time, &mut PortIo::new(&ports, 0, 4));
        assert_eq!(ports[1].samples(), &[0.5, -0.5, 0.25, 1.0]);
        assert_eq!(ports[2].samples(), &[0.5, -0.5, 0.25, 1.0]);
    }

    #[test]
    fn mute_and_noroll_silence_output() {
        let mut track = Track::new("t", 1, 1, false);
        let ports = ports_for(&track);
        ports[0].samples().fill(1.0);
        let time = EngineProcessTimeInfo {
            nframes: 4,
            noroll: true,
            ..Default::default()
        };
        track.process(&time, &mut PortIo::new(&ports, 0, 4));
        assert_eq!(ports[1].samples(), &[0.0; 4]);

        track.controls().mute();
        let time = EngineProcessTimeInfo {
            nframes: 4,
            ..Default::default()
        };
        track.process(&time, &mut PortIo::new(&ports, 0, 4));
        assert_eq!(ports[1].samples(), &[0.0; 4]);
    }
}
