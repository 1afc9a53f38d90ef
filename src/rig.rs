use anyhow::Context;
use cadenza_engine::port::PortId;
use cadenza_engine::unit::UnitUid;
use cadenza_engine::units::UnitDescriptor;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Units to create at startup and how to wire them. A session file, when
/// given, replaces the wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rig {
    pub units: Vec<UnitDescriptor>,
    #[serde(default)]
    pub connections: Vec<RigConnection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigConnection {
    pub src: PortId,
    pub dest: PortId,
    #[serde(default = "unity")]
    pub multiplier: f32,
}

fn unity() -> f32 {
    1.0
}

impl Rig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read rig {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid rig {}", path.display()))
    }

    /// Two tones on their own tracks, summed on a stereo bus feeding the
    /// hardware output.
    pub fn demo() -> Self {
        let uid = UnitUid;
        let units = vec![
            UnitDescriptor::Tone {
                uid: uid(1),
                name: "A4".to_string(),
                frequency: 440.0,
                amplitude: 0.25,
            },
            UnitDescriptor::Tone {
                uid: uid(2),
                name: "E5".to_string(),
                frequency: 659.25,
                amplitude: 0.2,
            },
            UnitDescriptor::Track {
                uid: uid(10),
                name: "lead".to_string(),
                audio_ins: 1,
                audio_outs: 2,
                midi: false,
            },
            UnitDescriptor::Track {
                uid: uid(11),
                name: "harmony".to_string(),
                audio_ins: 1,
                audio_outs: 2,
                midi: false,
            },
            UnitDescriptor::Fader {
                uid: uid(20),
                name: "master".to_string(),
                channels: 2,
            },
            UnitDescriptor::HardwareOutput {
                uid: uid(30),
                name: "system".to_string(),
                channels: 2,
            },
        ];
        let wire = |src: (u64, u32), dest: (u64, u32)| RigConnection {
            src: PortId::new(uid(src.0), src.1),
            dest: PortId::new(uid(dest.0), dest.1),
            multiplier: 1.0,
        };
        let connections = vec![
            wire((1, 0), (10, 0)),
            wire((2, 0), (11, 0)),
            // Track outputs follow their single input at 1 and 2.
            wire((10, 1), (20, 0)),
            wire((10, 2), (20, 1)),
            wire((11, 1), (20, 0)),
            wire((11, 2), (20, 1)),
            // Fader outputs follow its two inputs.
            wire((20, 2), (30, 0)),
            wire((20, 3), (30, 1)),
        ];
        Self { units, connections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_rig_round_trips_through_json() {
        let rig = Rig::demo();
        let json = serde_json::to_string(&rig).unwrap();
        let back: Rig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rig);
    }

    #[test]
    fn multiplier_defaults_to_unity() {
        let rig: Rig = serde_json::from_str(
            r#"{
                "units": [{"type": "fader", "uid": 1, "name": "bus"}],
                "connections": [{"src": {"unit": 1, "index": 2}, "dest": {"unit": 2, "index": 0}}]
            }"#,
        )
        .unwrap();
        assert_eq!(rig.connections[0].multiplier, 1.0);
        assert_eq!(rig.units[0].uid(), UnitUid(1));
    }
}
