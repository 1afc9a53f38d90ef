use crate::port::{PortDescriptor, PortId};
use crate::snap_grid::{NoteLength, NoteType};
use crate::transport::{MarkerJump, Markers, RecordingMode, TransportEvent};
use crate::unit::UnitUid;
use crate::units::{HwChannels, UnitDescriptor};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

#[derive(Clone, Debug)]
pub enum Action {
    Quit,

    AddUnit(UnitDescriptor),
    UnitAdded {
        uid: UnitUid,
        name: String,
        ports: Vec<PortDescriptor>,
        hw_channels: Option<Arc<HwChannels>>,
    },
    RemoveUnit(UnitUid),
    Connect {
        src: PortId,
        dest: PortId,
        multiplier: f32,
        locked: bool,
    },
    SetConnectionEnabled {
        src: PortId,
        dest: PortId,
        enabled: bool,
    },
    Disconnect {
        src: PortId,
        dest: PortId,
    },
    DisconnectAll(PortId),
    RecalcGraph,
    GraphRebuilt,

    Play,
    Pause,
    MovePlayhead {
        ticks: f64,
        set_cue: bool,
    },
    MoveForward,
    MoveBackward,
    SetPlayheadToBar(u32),
    GotoMarker(MarkerJump),
    SetMarkers(Markers),
    SetLoopRange {
        start: f64,
        end: f64,
    },
    SetLoop(bool),
    SetPunchRange {
        punch_in: f64,
        punch_out: f64,
    },
    SetPunch(bool),
    SetRecordEnabled(bool),
    SetRecordingMode(RecordingMode),
    SetMetronome(bool),
    SetStartOnMidiInput(bool),
    SetRange {
        first: bool,
        ticks: f64,
    },
    ClearRange,
    SetTempo(f64),
    SetSnap {
        length: NoteLength,
        note_type: NoteType,
    },
    Transport(TransportEvent),

    TrackLevel(UnitUid, f32),
    TrackToggleArm(UnitUid),
    TrackToggleMute(UnitUid),
    TrackToggleSolo(UnitUid),
    FaderGain(UnitUid, f32),
    FaderMute(UnitUid, bool),

    LoadSession(PathBuf),
    SaveSession(PathBuf),
}

impl Action {
    /// Edits that change the topology. These are batched and applied
    /// together so a burst of edits costs one graph rebuild.
    pub fn edits_topology(&self) -> bool {
        matches!(
            self,
            Action::AddUnit(_)
                | Action::RemoveUnit(_)
                | Action::Connect { .. }
                | Action::SetConnectionEnabled { .. }
                | Action::Disconnect { .. }
                | Action::DisconnectAll(_)
                | Action::RecalcGraph
                | Action::LoadSession(_)
        )
    }
}

#[derive(Clone, Debug)]
pub enum Message {
    Channel(Sender<Self>),

    Request(Action),
    Response(Result<Action, String>),
}
