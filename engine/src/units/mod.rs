pub mod fader;
pub mod hw;
pub mod tone;
pub mod track;

pub use fader::{Fader, GainControl};
pub use hw::{HardwareInput, HardwareOutput, HwChannels};
pub use tone::Tone;
pub use track::{Track, TrackControls};

use crate::unit::{ProcessingUnit, UnitUid};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Built-in unit recipe, as found in rig files and `Action::AddUnit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitDescriptor {
    Track {
        uid: UnitUid,
        name: String,
        #[serde(default = "stereo")]
        audio_ins: usize,
        #[serde(default = "stereo")]
        audio_outs: usize,
        #[serde(default)]
        midi: bool,
    },
    Fader {
        uid: UnitUid,
        name: String,
        #[serde(default = "stereo")]
        channels: usize,
    },
    Send {
        uid: UnitUid,
        name: String,
        #[serde(default = "stereo")]
        channels: usize,
    },
    HardwareInput {
        uid: UnitUid,
        name: String,
        #[serde(default = "stereo")]
        channels: usize,
    },
    HardwareOutput {
        uid: UnitUid,
        name: String,
        #[serde(default = "stereo")]
        channels: usize,
    },
    Tone {
        uid: UnitUid,
        name: String,
        frequency: f32,
        #[serde(default = "amplitude")]
        amplitude: f32,
    },
}

fn stereo() -> usize {
    2
}

fn amplitude() -> f32 {
    0.25
}

/// A built unit plus the handles the control side keeps for it.
pub struct BuiltUnit {
    pub uid: UnitUid,
    pub unit: Box<dyn ProcessingUnit>,
    pub track_controls: Option<Arc<TrackControls>>,
    pub gain_control: Option<Arc<GainControl>>,
    pub hw_channels: Option<Arc<HwChannels>>,
}

impl UnitDescriptor {
    pub fn uid(&self) -> UnitUid {
        match self {
            UnitDescriptor::Track { uid, .. }
            | UnitDescriptor::Fader { uid, .. }
            | UnitDescriptor::Send { uid, .. }
            | UnitDescriptor::HardwareInput { uid, .. }
            | UnitDescriptor::HardwareOutput { uid, .. }
            | UnitDescriptor::Tone { uid, .. } => *uid,
        }
    }

    pub fn build(&self, max_block: usize) -> BuiltUnit {
        let mut track_controls = None;
        let mut gain_control = None;
        let mut hw_channels = None;
        let unit: Box<dyn ProcessingUnit> = match self {
            UnitDescriptor::Track {
                name,
                audio_ins,
                audio_outs,
                midi,
                ..
            } => {
                let track = Track::new(name.clone(), *audio_ins, *audio_outs, *midi);
                track_controls = Some(track.controls());
                Box::new(track)
            }
            UnitDescriptor::Fader { name, channels, .. } => {
                let fader = Fader::new(name.clone(), *channels);
                gain_control = Some(fader.control());
                Box::new(fader)
            }
            UnitDescriptor::Send { name, channels, .. } => {
                let send = Fader::send(name.clone(), *channels);
                gain_control = Some(send.control());
                Box::new(send)
            }
            UnitDescriptor::HardwareInput { name, channels, .. } => {
                let buffers = HwChannels::new(*channels, max_block);
                hw_channels = Some(buffers.clone());
                Box::new(HardwareInput::new(name.clone(), buffers))
            }
            UnitDescriptor::HardwareOutput { name, channels, .. } => {
                let buffers = HwChannels::new(*channels, max_block);
                hw_channels = Some(buffers.clone());
                Box::new(HardwareOutput::new(name.clone(), buffers))
            }
            UnitDescriptor::Tone {
                name,
                frequency,
                amplitude,
                ..
            } => Box::new(Tone::new(name.clone(), *frequency, *amplitude)),
        };
        BuiltUnit {
            uid: self.uid(),
            unit,
            track_controls,
            gain_control,
            hw_channels,
        }
    }
}
