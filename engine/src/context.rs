use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::position::{Position, Tempo};
use crate::router::{CycleReport, Router, RouterHandle};
use crate::transport::{
    PlayState, RecordingMode, Transport, TransportEvent, TransportPositions, TransportSettings,
};
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use tracing::warn;

const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Transport edits requested from outside the audio thread. Applied in
/// order at the start of the next cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportCommand {
    Roll,
    Pause,
    MovePlayhead { ticks: f64, set_cue: bool },
    SetLoopRange { start: f64, end: f64 },
    SetLoop(bool),
    SetPunchRange { punch_in: f64, punch_out: f64 },
    SetPunch(bool),
    SetRecording(bool),
    SetRecordingMode(RecordingMode),
    SetMetronome(bool),
    SetStartOnMidiInput(bool),
    /// MIDI arrived on an input; rolls when starting on MIDI is enabled.
    MidiInput,
    PlayheadToBar(u32),
    SetRange { first: bool, ticks: f64 },
    ClearRange,
    SetTempo(Tempo),
    SetSettings(TransportSettings),
    ApplyPositions(TransportPositions),
}

/// Point-in-time view of the transport as seen by control threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    pub play_state: PlayState,
    pub playhead: Position,
    pub cue: Position,
    pub recording: bool,
    pub loop_enabled: bool,
    pub punch_enabled: bool,
    pub tempo: Tempo,
}

impl TransportSnapshot {
    pub fn is_rolling(&self) -> bool {
        self.play_state == PlayState::Rolling
    }
}

#[derive(Debug)]
struct SharedTransportState {
    play_state: AtomicU8,
    playhead_ticks: AtomicU64,
    playhead_frames: AtomicI64,
    cue_ticks: AtomicU64,
    cue_frames: AtomicI64,
    recording: AtomicBool,
    loop_enabled: AtomicBool,
    punch_enabled: AtomicBool,
    bpm: AtomicU64,
    sample_rate: AtomicU64,
}

impl SharedTransportState {
    fn new(transport: &Transport) -> Self {
        let state = Self {
            play_state: AtomicU8::new(0),
            playhead_ticks: AtomicU64::new(0),
            playhead_frames: AtomicI64::new(0),
            cue_ticks: AtomicU64::new(0),
            cue_frames: AtomicI64::new(0),
            recording: AtomicBool::new(false),
            loop_enabled: AtomicBool::new(false),
            punch_enabled: AtomicBool::new(false),
            bpm: AtomicU64::new(0),
            sample_rate: AtomicU64::new(0),
        };
        state.publish(transport);
        state
    }

    fn publish(&self, transport: &Transport) {
        let playhead = transport.playhead();
        let cue = transport.cue();
        let tempo = transport.tempo();
        self.playhead_ticks
            .store(playhead.ticks.to_bits(), Ordering::Relaxed);
        self.playhead_frames.store(playhead.frames, Ordering::Relaxed);
        self.cue_ticks.store(cue.ticks.to_bits(), Ordering::Relaxed);
        self.cue_frames.store(cue.frames, Ordering::Relaxed);
        self.recording
            .store(transport.is_recording(), Ordering::Relaxed);
        self.loop_enabled
            .store(transport.loop_enabled(), Ordering::Relaxed);
        self.punch_enabled
            .store(transport.punch_enabled(), Ordering::Relaxed);
        self.bpm.store(tempo.bpm.to_bits(), Ordering::Relaxed);
        self.sample_rate
            .store(tempo.sample_rate as u64, Ordering::Relaxed);
        self.play_state
            .store(transport.play_state().to_u8(), Ordering::Release);
    }

    fn snapshot(&self) -> TransportSnapshot {
        let play_state = PlayState::from_u8(self.play_state.load(Ordering::Acquire));
        TransportSnapshot {
            play_state,
            playhead: Position {
                ticks: f64::from_bits(self.playhead_ticks.load(Ordering::Relaxed)),
                frames: self.playhead_frames.load(Ordering::Relaxed),
            },
            cue: Position {
                ticks: f64::from_bits(self.cue_ticks.load(Ordering::Relaxed)),
                frames: self.cue_frames.load(Ordering::Relaxed),
            },
            recording: self.recording.load(Ordering::Relaxed),
            loop_enabled: self.loop_enabled.load(Ordering::Relaxed),
            punch_enabled: self.punch_enabled.load(Ordering::Relaxed),
            tempo: Tempo::new(
                f64::from_bits(self.bpm.load(Ordering::Relaxed)),
                self.sample_rate.load(Ordering::Relaxed) as u32,
            ),
        }
    }
}

/// The real-time half of the engine. Whoever owns it calls
/// [`AudioContext::process`] once per audio callback.
#[derive(Debug)]
pub struct AudioContext {
    router: Router,
    transport: Transport,
    commands: Arc<ArrayQueue<TransportCommand>>,
    shared: Arc<SharedTransportState>,
}

/// Cloneable control-side view of an [`AudioContext`].
#[derive(Debug, Clone)]
pub struct ContextHandle {
    router: RouterHandle,
    commands: Arc<ArrayQueue<TransportCommand>>,
    events: Arc<ArrayQueue<TransportEvent>>,
    shared: Arc<SharedTransportState>,
}

impl AudioContext {
    pub fn new(config: &EngineConfig) -> (Self, ContextHandle) {
        let (router, router_handle) = Router::new(config);
        let transport = Transport::new(config.tempo(), config.time_signatures(), config.transport);
        let commands = Arc::new(ArrayQueue::new(COMMAND_QUEUE_CAPACITY));
        let shared = Arc::new(SharedTransportState::new(&transport));
        let handle = ContextHandle {
            router: router_handle,
            commands: commands.clone(),
            events: transport.events(),
            shared: shared.clone(),
        };
        (
            Self {
                router,
                transport,
                commands,
                shared,
            },
            handle,
        )
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.router.start()
    }

    pub fn terminate(&mut self) {
        self.router.terminate();
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Direct access for the thread that owns the context.
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn process(&mut self, n_frames: usize) -> CycleReport {
        while let Some(command) = self.commands.pop() {
            self.apply(command);
        }
        let report = self.router.process(&mut self.transport, n_frames);
        self.shared.publish(&self.transport);
        report
    }

    fn apply(&mut self, command: TransportCommand) {
        let t = &mut self.transport;
        match command {
            TransportCommand::Roll => {
                t.request_roll();
            }
            TransportCommand::Pause => {
                t.request_pause();
            }
            TransportCommand::MovePlayhead { ticks, set_cue } => {
                t.move_playhead(ticks, set_cue);
            }
            TransportCommand::SetLoopRange { start, end } => {
                t.set_loop_range(start, end);
            }
            TransportCommand::SetLoop(enabled) => t.set_loop(enabled),
            TransportCommand::SetPunchRange {
                punch_in,
                punch_out,
            } => {
                t.set_punch_range(punch_in, punch_out);
            }
            TransportCommand::SetPunch(enabled) => t.set_punch_mode(enabled),
            TransportCommand::SetRecording(recording) => t.set_recording(recording),
            TransportCommand::SetRecordingMode(mode) => t.set_recording_mode(mode),
            TransportCommand::SetMetronome(enabled) => t.set_metronome_enabled(enabled),
            TransportCommand::SetStartOnMidiInput(enabled) => {
                t.set_start_playback_on_midi_input(enabled)
            }
            TransportCommand::MidiInput => {
                t.midi_input_received();
            }
            TransportCommand::PlayheadToBar(bar) => {
                t.set_playhead_to_bar(bar);
            }
            TransportCommand::SetRange { first, ticks } => t.set_range(first, ticks),
            TransportCommand::ClearRange => t.clear_range(),
            TransportCommand::SetTempo(tempo) => t.set_tempo(tempo),
            TransportCommand::SetSettings(settings) => t.set_settings(settings),
            TransportCommand::ApplyPositions(positions) => t.apply_positions(&positions),
        }
    }
}

impl ContextHandle {
    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Queues a command for the next cycle. Returns false when the queue is
    /// full and the command was dropped.
    pub fn send(&self, command: TransportCommand) -> bool {
        if self.commands.push(command).is_err() {
            warn!("Transport command queue full, dropping {:?}", command);
            return false;
        }
        true
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        self.shared.snapshot()
    }

    pub fn poll_events(&self) -> Vec<TransportEvent> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }
}
