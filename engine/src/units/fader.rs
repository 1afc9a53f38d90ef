use crate::port::PortSpec;
use crate::unit::{EngineProcessTimeInfo, PortIo, ProcessingUnit, UnitKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug)]
pub struct GainControl {
    gain: AtomicU32,
    muted: AtomicBool,
}

impl Default for GainControl {
    fn default() -> Self {
        Self {
            gain: AtomicU32::new(1.0_f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }
}

impl GainControl {
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    fn effective(&self) -> f32 {
        if self.muted() { 0.0 } else { self.gain() }
    }
}

/// N inputs, N outputs, one linear gain. Mixer buses are faders with several
/// sources connected to the same inputs.
pub struct Fader {
    name: String,
    kind: UnitKind,
    channels: usize,
    control: Arc<GainControl>,
}

impl Fader {
    pub fn new(name: impl Into<String>, channels: usize) -> Self {
        Self {
            name: name.into(),
            kind: UnitKind::Fader,
            channels,
            control: Arc::new(GainControl::default()),
        }
    }

    pub fn send(name: impl Into<String>, channels: usize) -> Self {
        Self {
            kind: UnitKind::Send,
            ..Self::new(name, channels)
        }
    }

    pub fn control(&self) -> Arc<GainControl> {
        self.control.clone()
    }
}

impl ProcessingUnit for Fader {
    fn kind(&self) -> UnitKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> Vec<PortSpec> {
        let mut ports = Vec::with_capacity(self.channels * 2);
        for i in 0..self.channels {
            ports.push(PortSpec::audio_in(format!("{} in {}", self.name, i + 1)));
        }
        for i in 0..self.channels {
            ports.push(PortSpec::audio_out(format!("{} out {}", self.name, i + 1)));
        }
        ports
    }

    fn process(&mut self, time: &EngineProcessTimeInfo, io: &mut PortIo<'_>) {
        let gain = if time.noroll {
            0.0
        } else {
            self.control.effective()
        };
        for ch in 0..self.channels {
            io.copy_scaled(ch, self.channels + ch, gain);
        }
    }
}
