use crate::config::EngineConfig;
use crate::context::{ContextHandle, TransportCommand};
use crate::error::EngineError;
use crate::message::{Action, Message};
use crate::position::Tempo;
use crate::router::RecalcHandle;
use crate::session::SessionState;
use crate::snap_grid::SnapGrid;
use crate::topology::Topology;
use crate::transport::{Markers, TransportPositions, backward_target};
use crate::unit::UnitUid;
use crate::units::{GainControl, TrackControls};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info, warn};

/// The control half: owns the topology, applies client requests and relays
/// transport notifications back to every client.
pub struct Engine {
    clients: Vec<tokio::sync::mpsc::Sender<Message>>,
    rx: Receiver<Message>,
    topology: Topology,
    context: ContextHandle,
    snap_grid: SnapGrid,
    positions: TransportPositions,
    markers: Markers,
    track_controls: HashMap<UnitUid, Arc<TrackControls>>,
    gain_controls: HashMap<UnitUid, Arc<GainControl>>,
    pending_requests: VecDeque<Action>,
    recalc: Option<RecalcHandle>,
    graph_dirty: bool,
}

impl Engine {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    pub fn new(rx: Receiver<Message>, context: ContextHandle, config: &EngineConfig) -> Self {
        Self {
            clients: vec![],
            rx,
            topology: Topology::new(config.sample_rate, config.block_size),
            context,
            snap_grid: SnapGrid::new(config.time_signatures()),
            positions: TransportPositions::default(),
            markers: Markers::default(),
            track_controls: HashMap::new(),
            gain_controls: HashMap::new(),
            pending_requests: VecDeque::new(),
            recalc: None,
            graph_dirty: false,
        }
    }

    pub async fn init(&mut self) {
        if let Err(e) = self.rebuild_now().await {
            error!("Initial graph build failed: {}", e);
        }
        info!(
            "Engine ready: {} unit(s), {} live node(s)",
            self.topology.unit_count(),
            self.context.router().live_nodes()
        );
    }

    async fn notify_clients(&mut self, action: Result<Action, String>) {
        let mut dropped = 0;
        for client in &self.clients {
            if client.send(Message::Response(action.clone())).await.is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.clients.retain(|c| !c.is_closed());
            debug!("Dropped {} disconnected client(s)", dropped);
        }
    }

    fn apply_mute_solo_policy(&self) {
        let any_soloed = self.track_controls.values().any(|c| c.soloed());
        for controls in self.track_controls.values() {
            controls.set_solo_silenced(any_soloed && !controls.soloed());
        }
    }

    fn track(&self, uid: UnitUid) -> Result<&Arc<TrackControls>, String> {
        self.track_controls
            .get(&uid)
            .ok_or_else(|| format!("Track not found: {uid}"))
    }

    fn fader(&self, uid: UnitUid) -> Result<&Arc<GainControl>, String> {
        self.gain_controls
            .get(&uid)
            .ok_or_else(|| format!("Fader not found: {uid}"))
    }

    fn transport(&self, command: TransportCommand) -> Result<(), String> {
        if self.context.send(command) {
            Ok(())
        } else {
            Err("Transport command queue is full".to_string())
        }
    }

    async fn rebuild_now(&mut self) -> Result<(), EngineError> {
        if let Some(pending) = self.recalc.take() {
            pending.wait().await?;
        }
        self.graph_dirty = false;
        self.context
            .router()
            .recalc_graph(&self.topology, true)?
            .wait()
            .await
    }

    /// Starts a background build unless one is still running; builds are
    /// kept strictly ordered so an older snapshot never lands last.
    async fn maybe_start_rebuild(&mut self) {
        if !self.graph_dirty {
            return;
        }
        if self.recalc.as_ref().is_some_and(|r| !r.is_finished()) {
            return;
        }
        self.finish_rebuild().await;
        self.graph_dirty = false;
        match self.context.router().recalc_graph(&self.topology, true) {
            Ok(handle) => self.recalc = Some(handle),
            Err(e) => {
                error!("Could not start graph build: {}", e);
                self.notify_clients(Err(e.to_string())).await;
            }
        }
    }

    async fn finish_rebuild(&mut self) {
        if !self.recalc.as_ref().is_some_and(|r| r.is_finished()) {
            return;
        }
        if let Some(done) = self.recalc.take() {
            match done.join() {
                Ok(()) => self.notify_clients(Ok(Action::GraphRebuilt)).await,
                Err(e) => self.notify_clients(Err(e.to_string())).await,
            }
        }
    }

    async fn relay_transport_events(&mut self) {
        for event in self.context.poll_events() {
            self.notify_clients(Ok(Action::Transport(event))).await;
        }
    }

    fn save_session(&self, path: &Path) -> Result<(), EngineError> {
        let snapshot = self.context.snapshot();
        let mut positions = self.positions;
        positions.playhead = snapshot.playhead.ticks;
        positions.cue = snapshot.cue.ticks;
        SessionState::capture(&self.topology, positions, self.markers.clone()).save(path)
    }

    async fn load_session(&mut self, path: &Path) -> Result<(), EngineError> {
        let session = SessionState::load(path)?;
        if let Some(pending) = self.recalc.take() {
            pending.wait().await?;
        }
        session.restore(&mut self.topology, self.context.router()).await?;
        self.graph_dirty = false;
        self.positions = session.transport;
        self.markers = session.markers.clone();
        if !self
            .context
            .send(TransportCommand::ApplyPositions(session.transport))
        {
            warn!("Transport queue full, session markers not applied");
        }
        info!(
            "Loaded session from {} with {} connection(s)",
            path.display(),
            session.connections.len()
        );
        Ok(())
    }

    async fn handle_edit(&mut self, a: &Action) -> Result<Option<Action>, String> {
        match a {
            Action::AddUnit(descriptor) => {
                let built = descriptor.build(self.topology.max_block());
                self.topology
                    .add_unit_with_uid(built.uid, built.unit)
                    .map_err(|e| e.to_string())?;
                if let Some(controls) = built.track_controls {
                    self.track_controls.insert(built.uid, controls);
                    self.apply_mute_solo_policy();
                }
                if let Some(control) = built.gain_control {
                    self.gain_controls.insert(built.uid, control);
                }
                let (name, ports) = match self.topology.unit(built.uid) {
                    Some(cell) => (
                        cell.name().to_string(),
                        cell.ports().iter().map(|p| p.descriptor()).collect(),
                    ),
                    None => return Err(format!("Unit {} vanished after insert", built.uid)),
                };
                self.graph_dirty = true;
                Ok(Some(Action::UnitAdded {
                    uid: built.uid,
                    name,
                    ports,
                    hw_channels: built.hw_channels,
                }))
            }
            Action::RemoveUnit(uid) => {
                self.topology.remove_unit(*uid).map_err(|e| e.to_string())?;
                if self.track_controls.remove(uid).is_some() {
                    self.apply_mute_solo_policy();
                }
                self.gain_controls.remove(uid);
                self.graph_dirty = true;
                Ok(None)
            }
            Action::Connect {
                src,
                dest,
                multiplier,
                locked,
            } => {
                self.topology
                    .connect(*src, *dest, *multiplier, *locked, true)
                    .map_err(|e| e.to_string())?;
                self.graph_dirty = true;
                Ok(None)
            }
            Action::SetConnectionEnabled { src, dest, enabled } => {
                let (multiplier, locked) = match self.topology.connections().get(*src, *dest) {
                    Some(c) => (c.multiplier, c.locked),
                    None => return Err(format!("No connection from {src} to {dest}")),
                };
                self.topology
                    .connect(*src, *dest, multiplier, locked, *enabled)
                    .map_err(|e| e.to_string())?;
                self.graph_dirty = true;
                Ok(None)
            }
            Action::Disconnect { src, dest } => {
                self.topology
                    .disconnect(*src, *dest)
                    .map_err(|e| format!("Disconnect failed: {}", e))?;
                self.graph_dirty = true;
                Ok(None)
            }
            Action::DisconnectAll(port) => {
                if self.topology.disconnect_all(*port) > 0 {
                    self.graph_dirty = true;
                }
                Ok(None)
            }
            Action::RecalcGraph => {
                self.graph_dirty = true;
                Ok(None)
            }
            Action::LoadSession(path) => {
                self.load_session(path).await.map_err(|e| e.to_string())?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    async fn handle_request(&mut self, a: Action) {
        let result = match &a {
            Action::Play => self.transport(TransportCommand::Roll),
            Action::Pause => self.transport(TransportCommand::Pause),
            Action::MovePlayhead { ticks, set_cue } => self.move_playhead(*ticks, *set_cue),
            Action::MoveForward => {
                let target = self
                    .snap_grid
                    .next_snap_point(self.context.snapshot().playhead.ticks);
                self.move_playhead(target, true)
            }
            Action::MoveBackward => {
                let snap = self.context.snapshot();
                let target =
                    backward_target(&self.snap_grid, snap.playhead, snap.is_rolling(), &snap.tempo);
                self.move_playhead(target, true)
            }
            Action::SetPlayheadToBar(bar) => self
                .ensure_playhead_movable()
                .and_then(|()| self.transport(TransportCommand::PlayheadToBar(*bar))),
            Action::GotoMarker(jump) => {
                let snap = self.context.snapshot();
                let mut positions = self.positions;
                positions.playhead = snap.playhead.ticks;
                positions.cue = snap.cue.ticks;
                match self.markers.target(
                    *jump,
                    &positions,
                    snap.playhead,
                    snap.is_rolling(),
                    &snap.tempo,
                ) {
                    Some(target) => self.move_playhead(target, true),
                    None => {
                        debug!("No marker for {:?} from {}", jump, snap.playhead.ticks);
                        Ok(())
                    }
                }
            }
            Action::SetMarkers(markers) => {
                if markers.end < markers.start {
                    Err(format!("End marker {} before start {}", markers.end, markers.start))
                } else {
                    self.markers = markers.clone();
                    Ok(())
                }
            }
            Action::SetLoopRange { start, end } => {
                if end.max(0.0) <= start.max(0.0) {
                    Err(format!("Empty loop range {start}..{end}"))
                } else {
                    self.positions.loop_start = start.max(0.0);
                    self.positions.loop_end = end.max(0.0);
                    self.transport(TransportCommand::SetLoopRange {
                        start: *start,
                        end: *end,
                    })
                }
            }
            Action::SetLoop(enabled) => {
                self.positions.loop_enabled = *enabled;
                self.transport(TransportCommand::SetLoop(*enabled))
            }
            Action::SetPunchRange {
                punch_in,
                punch_out,
            } => {
                if punch_out.max(0.0) <= punch_in.max(0.0) {
                    Err(format!("Empty punch range {punch_in}..{punch_out}"))
                } else {
                    self.positions.punch_in = punch_in.max(0.0);
                    self.positions.punch_out = punch_out.max(0.0);
                    self.transport(TransportCommand::SetPunchRange {
                        punch_in: *punch_in,
                        punch_out: *punch_out,
                    })
                }
            }
            Action::SetPunch(enabled) => {
                self.positions.punch_enabled = *enabled;
                self.transport(TransportCommand::SetPunch(*enabled))
            }
            Action::SetRecordEnabled(enabled) => {
                self.transport(TransportCommand::SetRecording(*enabled))
            }
            Action::SetRecordingMode(mode) => {
                self.transport(TransportCommand::SetRecordingMode(*mode))
            }
            Action::SetMetronome(enabled) => self.transport(TransportCommand::SetMetronome(*enabled)),
            Action::SetStartOnMidiInput(enabled) => {
                self.transport(TransportCommand::SetStartOnMidiInput(*enabled))
            }
            Action::SetRange { first, ticks } => {
                let ticks = ticks.max(0.0);
                let (a, b) = self.positions.range.unwrap_or((ticks, ticks));
                self.positions.range = Some(if *first { (ticks, b) } else { (a, ticks) });
                self.transport(TransportCommand::SetRange {
                    first: *first,
                    ticks,
                })
            }
            Action::ClearRange => {
                self.positions.range = None;
                self.transport(TransportCommand::ClearRange)
            }
            Action::SetTempo(bpm) => {
                if *bpm <= 0.0 {
                    Err(format!("Invalid tempo {bpm}"))
                } else {
                    let tempo = Tempo::new(*bpm, self.topology.sample_rate());
                    self.transport(TransportCommand::SetTempo(tempo))
                }
            }
            Action::SetSnap { length, note_type } => {
                self.snap_grid.snap_note_length = *length;
                self.snap_grid.snap_note_type = *note_type;
                Ok(())
            }
            Action::TrackLevel(uid, level) => self.track(*uid).map(|c| c.set_level(*level)),
            Action::TrackToggleArm(uid) => self.track(*uid).map(|c| c.arm()),
            Action::TrackToggleMute(uid) => self.track(*uid).map(|c| c.mute()),
            Action::TrackToggleSolo(uid) => {
                let result = self.track(*uid).map(|c| c.solo());
                self.apply_mute_solo_policy();
                result
            }
            Action::FaderGain(uid, gain) => self.fader(*uid).map(|c| c.set_gain(*gain)),
            Action::FaderMute(uid, muted) => self.fader(*uid).map(|c| c.set_muted(*muted)),
            Action::SaveSession(path) => self.save_session(path).map_err(|e| e.to_string()),
            _ => Ok(()),
        };
        match result {
            Ok(()) => self.notify_clients(Ok(a)).await,
            Err(e) => {
                warn!("{}", e);
                self.notify_clients(Err(e)).await;
            }
        }
    }

    fn ensure_playhead_movable(&self) -> Result<(), String> {
        let snap = self.context.snapshot();
        if snap.recording && snap.is_rolling() {
            return Err("Cannot move the playhead while recording".to_string());
        }
        Ok(())
    }

    fn move_playhead(&self, ticks: f64, set_cue: bool) -> Result<(), String> {
        self.ensure_playhead_movable()?;
        self.transport(TransportCommand::MovePlayhead { ticks, set_cue })
    }

    /// Applies queued topology edits in arrival order, then schedules one
    /// rebuild for the whole batch.
    async fn apply_pending(&mut self) {
        while let Some(a) = self.pending_requests.pop_front() {
            match self.handle_edit(&a).await {
                Ok(Some(reply)) => self.notify_clients(Ok(reply)).await,
                Ok(None) => self.notify_clients(Ok(a)).await,
                Err(e) => {
                    warn!("{}", e);
                    self.notify_clients(Err(e)).await;
                }
            }
        }
        self.maybe_start_rebuild().await;
    }

    async fn shutdown(&mut self) {
        self.apply_pending().await;
        if let Some(pending) = self.recalc.take() {
            if let Err(e) = pending.wait().await {
                error!("Graph build failed during shutdown: {}", e);
            }
        }
        if self.graph_dirty {
            if let Err(e) = self.rebuild_now().await {
                error!("Final graph build failed: {}", e);
            }
        }
        self.notify_clients(Ok(Action::Quit)).await;
    }

    pub async fn work(&mut self) {
        let mut ticker = tokio::time::interval(Self::POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                message = self.rx.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    match message {
                        Message::Channel(s) => {
                            self.clients.push(s);
                        }
                        Message::Request(Action::Quit) => {
                            self.shutdown().await;
                            break;
                        }
                        Message::Request(a) if a.edits_topology() => {
                            self.pending_requests.push_back(a);
                        }
                        Message::Request(a) => {
                            self.handle_request(a).await;
                        }
                        Message::Response(_) => {}
                    }
                }
                _ = ticker.tick() => {
                    self.apply_pending().await;
                    self.finish_rebuild().await;
                    self.relay_transport_events().await;
                }
            }
        }
        debug!("Engine loop finished");
    }
}
