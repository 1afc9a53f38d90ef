use crate::mutex::UnsafeMutex;
use crate::port::PortSpec;
use crate::unit::{EngineProcessTimeInfo, PortIo, ProcessingUnit, UnitKind};
use std::sync::Arc;

/// Per-channel buffers shared with the audio backend.
///
/// The backend fills capture channels before a cycle and drains playback
/// channels after it; during the cycle only the owning hardware unit
/// touches them.
#[derive(Debug)]
pub struct HwChannels {
    channels: Vec<UnsafeMutex<Vec<f32>>>,
}

impl HwChannels {
    pub fn new(channels: usize, max_block: usize) -> Arc<Self> {
        Arc::new(Self {
            channels: (0..channels)
                .map(|_| UnsafeMutex::new(vec![0.0; max_block]))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[allow(clippy::mut_from_ref)]
    pub fn channel(&self, index: usize) -> &mut [f32] {
        match self.channels.get(index) {
            Some(ch) => ch.lock().as_mut_slice(),
            None => &mut [],
        }
    }
}

/// Capture side: exposes hardware channels as output ports.
pub struct HardwareInput {
    name: String,
    buffers: Arc<HwChannels>,
}

impl HardwareInput {
    pub fn new(name: impl Into<String>, buffers: Arc<HwChannels>) -> Self {
        Self {
            name: name.into(),
            buffers,
        }
    }
}

impl ProcessingUnit for HardwareInput {
    fn kind(&self) -> UnitKind {
        UnitKind::HardwareIo
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> Vec<PortSpec> {
        (0..self.buffers.len())
            .map(|i| PortSpec::audio_out(format!("{} capture {}", self.name, i + 1)))
            .collect()
    }

    fn process(&mut self, time: &EngineProcessTimeInfo, io: &mut PortIo<'_>) {
        for ch in 0..self.buffers.len() {
            let captured = self.buffers.channel(ch);
            let out = io.output(ch);
            let start = time.local_offset.min(captured.len());
            let end = (start + out.len()).min(captured.len());
            let src = &captured[start..end];
            out[..src.len()].copy_from_slice(src);
            out[src.len()..].fill(0.0);
        }
    }
}

/// Playback side: collects input ports into hardware channels.
pub struct HardwareOutput {
    name: String,
    buffers: Arc<HwChannels>,
}

impl HardwareOutput {
    pub fn new(name: impl Into<String>, buffers: Arc<HwChannels>) -> Self {
        Self {
            name: name.into(),
            buffers,
        }
    }
}

impl ProcessingUnit for HardwareOutput {
    fn kind(&self) -> UnitKind {
        UnitKind::HardwareIo
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> Vec<PortSpec> {
        (0..self.buffers.len())
            .map(|i| PortSpec::audio_in(format!("{} playback {}", self.name, i + 1)))
            .collect()
    }

    fn process(&mut self, time: &EngineProcessTimeInfo, io: &mut PortIo<'_>) {
        for ch in 0..self.buffers.len() {
            let playback = self.buffers.channel(ch);
            let input = io.input(ch);
            let start = time.local_offset.min(playback.len());
            let end = (start + input.len()).min(playback.len());
            playback[start..end].copy_from_slice(&input[..end - start]);
        }
    }
}
