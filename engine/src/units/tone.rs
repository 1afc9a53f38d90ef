use crate::port::PortSpec;
use crate::unit::{EngineProcessTimeInfo, PortIo, ProcessingUnit, UnitKind};
use std::f32::consts::TAU;

/// Sine generator locked to the timeline position, so a looped or relocated
/// playhead restarts the waveform at the matching phase.
pub struct Tone {
    name: String,
    frequency: f32,
    amplitude: f32,
    sample_rate: f32,
}

impl Tone {
    pub fn new(name: impl Into<String>, frequency: f32, amplitude: f32) -> Self {
        Self {
            name: name.into(),
            frequency,
            amplitude,
            sample_rate: 48_000.0,
        }
    }
}

impl ProcessingUnit for Tone {
    fn kind(&self) -> UnitKind {
        UnitKind::SampleProcessor
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out(format!("{} out", self.name))]
    }

    fn prepare(&mut self, sample_rate: u32, _max_block: usize) {
        self.sample_rate = sample_rate as f32;
    }

    fn process(&mut self, time: &EngineProcessTimeInfo, io: &mut PortIo<'_>) {
        if time.noroll || !time.rolling {
            io.clear_output(0);
            return;
        }
        let step = self.frequency / self.sample_rate;
        let start = time.g_start_frame_w_offset;
        for (i, sample) in io.output(0).iter_mut().enumerate() {
            let phase = ((start + i as i64) as f64 * step as f64).fract() as f32;
            *sample = (phase * TAU).sin() * self.amplitude;
        }
    }
}
