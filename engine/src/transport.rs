use crate::position::{Position, Tempo, TimeSignatureMap};
use crate::snap_grid::SnapGrid;
use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Window after a snap point in which a backward move while rolling skips
/// to the point before it.
pub const REPEATED_BACKWARD_MS: u64 = 240;
const EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayState {
    #[default]
    Stopped,
    RollRequested,
    Rolling,
    PauseRequested,
    Paused,
}

impl PlayState {
    pub fn to_u8(self) -> u8 {
        match self {
            PlayState::Stopped => 0,
            PlayState::RollRequested => 1,
            PlayState::Rolling => 2,
            PlayState::PauseRequested => 3,
            PlayState::Paused => 4,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayState::RollRequested,
            2 => PlayState::Rolling,
            3 => PlayState::PauseRequested,
            4 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }
}

/// How a recording pass treats material already on the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RecordingMode {
    OverwriteEvents,
    MergeEvents,
    #[default]
    Takes,
    TakesMuted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub countin_bars: u32,
    pub preroll_bars: u32,
    pub return_to_cue: bool,
    pub metronome_enabled: bool,
    pub recording_mode: RecordingMode,
    pub start_playback_on_midi_input: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            countin_bars: 0,
            preroll_bars: 2,
            return_to_cue: false,
            metronome_enabled: false,
            recording_mode: RecordingMode::default(),
            start_playback_on_midi_input: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportEvent {
    PlayStateChanged(PlayState),
    PlayheadMovedManually(Position),
    LoopToggled(bool),
    PunchToggled(bool),
    RecordingToggled(bool),
    MetronomeToggled(bool),
    RecordingModeChanged(RecordingMode),
}

/// Persisted marker positions, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportPositions {
    pub playhead: f64,
    pub cue: f64,
    pub loop_start: f64,
    pub loop_end: f64,
    pub loop_enabled: bool,
    pub punch_in: f64,
    pub punch_out: f64,
    pub punch_enabled: bool,
    pub range: Option<(f64, f64)>,
}

impl Default for TransportPositions {
    fn default() -> Self {
        let bar = crate::position::TimeSignature::default().ticks_per_bar();
        Self {
            playhead: 0.0,
            cue: 0.0,
            loop_start: 0.0,
            loop_end: bar * 4.0,
            loop_enabled: false,
            punch_in: bar * 2.0,
            punch_out: bar * 4.0,
            punch_enabled: false,
            range: None,
        }
    }
}

/// Song start and end plus the user's markers, in ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Markers {
    pub start: f64,
    pub end: f64,
    pub markers: Vec<f64>,
}

impl Default for Markers {
    fn default() -> Self {
        let bar = crate::position::TimeSignature::default().ticks_per_bar();
        Self {
            start: 0.0,
            end: bar * 128.0,
            markers: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerJump {
    Start,
    End,
    Previous,
    Next,
}

impl Markers {
    /// Every position a previous/next jump may land on: the markers, song
    /// start and end, the cue, both loop points and zero. Sorted, no repeats.
    pub fn stops(&self, positions: &TransportPositions) -> Vec<f64> {
        let mut stops: Vec<f64> = self
            .markers
            .iter()
            .copied()
            .chain([
                self.start,
                self.end,
                positions.cue,
                positions.loop_start,
                positions.loop_end,
                0.0,
            ])
            .filter(|t| t.is_finite())
            .map(|t| t.max(0.0))
            .collect();
        stops.sort_by(f64::total_cmp);
        stops.dedup();
        stops
    }

    /// Where `jump` moves the playhead. Going back while rolling skips a
    /// stop passed less than [`REPEATED_BACKWARD_MS`] ago, except zero.
    pub fn target(
        &self,
        jump: MarkerJump,
        positions: &TransportPositions,
        playhead: Position,
        rolling: bool,
        tempo: &Tempo,
    ) -> Option<f64> {
        match jump {
            MarkerJump::Start => Some(self.start.max(0.0)),
            MarkerJump::End => Some(self.end.max(0.0)),
            MarkerJump::Next => self
                .stops(positions)
                .into_iter()
                .find(|&t| t > playhead.ticks + 1e-6),
            MarkerJump::Previous => {
                let window = tempo.ms_to_frames(REPEATED_BACKWARD_MS);
                let stops = self.stops(positions);
                stops.iter().enumerate().rev().find_map(|(i, &t)| {
                    if t + 1e-6 >= playhead.ticks {
                        return None;
                    }
                    if rolling && i > 0 && playhead.frames - tempo.ticks_to_frames(t) < window {
                        return None;
                    }
                    Some(t)
                })
            }
        }
    }
}

/// Playback clock and marker state.
///
/// The instance lives with the audio thread; other threads reach it through
/// commands applied between cycles, so the playhead has a single writer.
#[derive(Debug)]
pub struct Transport {
    playhead: Position,
    cue: Position,
    loop_start: Position,
    loop_end: Position,
    loop_enabled: bool,
    punch_in: Position,
    punch_out: Position,
    punch_enabled: bool,
    range_1: Position,
    range_2: Position,
    has_range: bool,
    recording: bool,
    play_state: PlayState,
    preroll_frames_remaining: i64,
    countin_frames_remaining: i64,
    playhead_before_pause: Position,
    settings: TransportSettings,
    tempo: Tempo,
    time_signatures: TimeSignatureMap,
    events: Arc<ArrayQueue<TransportEvent>>,
}

impl Transport {
    pub fn new(tempo: Tempo, time_signatures: TimeSignatureMap, settings: TransportSettings) -> Self {
        let mut transport = Self {
            playhead: Position::default(),
            cue: Position::default(),
            loop_start: Position::default(),
            loop_end: Position::default(),
            loop_enabled: false,
            punch_in: Position::default(),
            punch_out: Position::default(),
            punch_enabled: false,
            range_1: Position::default(),
            range_2: Position::default(),
            has_range: false,
            recording: false,
            play_state: PlayState::Stopped,
            preroll_frames_remaining: 0,
            countin_frames_remaining: 0,
            playhead_before_pause: Position::default(),
            settings,
            tempo,
            time_signatures,
            events: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
        };
        transport.apply_positions(&TransportPositions::default());
        transport
    }

    pub fn events(&self) -> Arc<ArrayQueue<TransportEvent>> {
        self.events.clone()
    }

    fn emit(&self, event: TransportEvent) {
        self.events.force_push(event);
    }

    fn position(&self, ticks: f64) -> Position {
        Position::from_ticks(ticks.max(0.0), &self.tempo)
    }

    pub fn playhead(&self) -> Position {
        self.playhead
    }

    pub fn cue(&self) -> Position {
        self.cue
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn is_rolling(&self) -> bool {
        self.play_state == PlayState::Rolling
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn settings(&self) -> TransportSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: TransportSettings) {
        self.settings = settings;
    }

    pub fn metronome_enabled(&self) -> bool {
        self.settings.metronome_enabled
    }

    pub fn set_metronome_enabled(&mut self, enabled: bool) {
        if self.settings.metronome_enabled != enabled {
            self.settings.metronome_enabled = enabled;
            self.emit(TransportEvent::MetronomeToggled(enabled));
        }
    }

    pub fn recording_mode(&self) -> RecordingMode {
        self.settings.recording_mode
    }

    pub fn set_recording_mode(&mut self, mode: RecordingMode) {
        if self.settings.recording_mode != mode {
            self.settings.recording_mode = mode;
            self.emit(TransportEvent::RecordingModeChanged(mode));
        }
    }

    pub fn start_playback_on_midi_input(&self) -> bool {
        self.settings.start_playback_on_midi_input
    }

    pub fn set_start_playback_on_midi_input(&mut self, enabled: bool) {
        self.settings.start_playback_on_midi_input = enabled;
    }

    /// Rolls from Stopped or Paused when starting on MIDI input is enabled.
    /// Returns true when a roll was requested.
    pub fn midi_input_received(&mut self) -> bool {
        self.settings.start_playback_on_midi_input && self.request_roll()
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn time_signatures(&self) -> &TimeSignatureMap {
        &self.time_signatures
    }

    pub fn loop_range(&self) -> (Position, Position) {
        (self.loop_start, self.loop_end)
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn punch_range(&self) -> (Position, Position) {
        (self.punch_in, self.punch_out)
    }

    pub fn punch_enabled(&self) -> bool {
        self.punch_enabled
    }

    pub fn preroll_frames_remaining(&self) -> i64 {
        self.preroll_frames_remaining
    }

    pub fn countin_frames_remaining(&self) -> i64 {
        self.countin_frames_remaining
    }

    pub fn playhead_before_pause(&self) -> Position {
        self.playhead_before_pause
    }

    fn set_play_state(&mut self, state: PlayState) {
        if self.play_state != state {
            self.play_state = state;
            self.emit(TransportEvent::PlayStateChanged(state));
        }
    }

    fn frames_per_bar_at(&self, ticks: f64) -> i64 {
        let ticks_per_bar = self.time_signatures.at(ticks).ticks_per_bar();
        self.tempo.ticks_to_frames(ticks_per_bar)
    }

    /// Starts rolling from Stopped or Paused. When recording, the playhead
    /// first moves back by the pre-roll bars (never before zero).
    pub fn request_roll(&mut self) -> bool {
        if !matches!(self.play_state, PlayState::Stopped | PlayState::Paused) {
            return false;
        }
        self.countin_frames_remaining =
            self.settings.countin_bars as i64 * self.frames_per_bar_at(self.playhead.ticks);
        self.preroll_frames_remaining = 0;
        if self.recording && self.settings.preroll_bars > 0 {
            let back = self
                .time_signatures
                .ticks_of_bars_before(self.playhead.ticks, self.settings.preroll_bars);
            let target = self.position(self.playhead.ticks - back);
            self.preroll_frames_remaining = self.playhead.frames - target.frames;
            self.playhead = target;
        }
        self.set_play_state(PlayState::RollRequested);
        true
    }

    pub fn request_pause(&mut self) -> bool {
        if !matches!(self.play_state, PlayState::Rolling | PlayState::RollRequested) {
            return false;
        }
        self.set_play_state(PlayState::PauseRequested);
        self.playhead_before_pause = self.playhead;
        self.countin_frames_remaining = 0;
        self.preroll_frames_remaining = 0;
        if self.settings.return_to_cue {
            self.playhead = self.cue;
            self.emit(TransportEvent::PlayheadMovedManually(self.playhead));
        }
        true
    }

    pub fn can_user_move_playhead(&self) -> bool {
        !(self.recording && self.play_state == PlayState::Rolling)
    }

    pub fn move_playhead(&mut self, ticks: f64, set_cue: bool) -> bool {
        if !self.can_user_move_playhead() {
            warn!("Refusing to move the playhead while recording");
            return false;
        }
        self.playhead = self.position(ticks);
        if set_cue {
            self.cue = self.playhead;
        }
        self.emit(TransportEvent::PlayheadMovedManually(self.playhead));
        true
    }

    pub fn move_forward(&mut self, grid: &SnapGrid) -> bool {
        let target = grid.next_snap_point(self.playhead.ticks);
        self.move_playhead(target, true)
    }

    pub fn move_backward(&mut self, grid: &SnapGrid) -> bool {
        let target = backward_target(grid, self.playhead, self.is_rolling(), &self.tempo);
        self.move_playhead(target, true)
    }

    /// Moves to the start of the 1-based `bar` without touching the cue.
    pub fn set_playhead_to_bar(&mut self, bar: u32) -> bool {
        let target = self.time_signatures.bar_start(bar);
        self.move_playhead(target, false)
    }

    /// Jumps to a marker and makes it the cue. False when there is nowhere
    /// to go or the playhead may not move.
    pub fn goto_marker(&mut self, markers: &Markers, jump: MarkerJump) -> bool {
        let positions = self.positions();
        match markers.target(jump, &positions, self.playhead, self.is_rolling(), &self.tempo) {
            Some(target) => self.move_playhead(target, true),
            None => false,
        }
    }

    pub fn set_loop_range(&mut self, start: f64, end: f64) -> bool {
        let (start, end) = (start.max(0.0), end.max(0.0));
        if end <= start {
            return false;
        }
        self.loop_start = self.position(start);
        self.loop_end = self.position(end);
        true
    }

    pub fn set_loop(&mut self, enabled: bool) {
        if self.loop_enabled != enabled {
            self.loop_enabled = enabled;
            self.emit(TransportEvent::LoopToggled(enabled));
        }
    }

    pub fn set_punch_range(&mut self, punch_in: f64, punch_out: f64) -> bool {
        let (punch_in, punch_out) = (punch_in.max(0.0), punch_out.max(0.0));
        if punch_out <= punch_in {
            return false;
        }
        self.punch_in = self.position(punch_in);
        self.punch_out = self.position(punch_out);
        true
    }

    pub fn set_punch_mode(&mut self, enabled: bool) {
        if self.punch_enabled != enabled {
            self.punch_enabled = enabled;
            self.emit(TransportEvent::PunchToggled(enabled));
        }
    }

    /// Read-only predicate for recording logic; nothing here enforces it.
    pub fn is_inside_punch_range(&self, frames: i64) -> bool {
        frames >= self.punch_in.frames && frames < self.punch_out.frames
    }

    pub fn set_recording(&mut self, recording: bool) {
        if self.recording != recording {
            self.recording = recording;
            self.emit(TransportEvent::RecordingToggled(recording));
        }
    }

    /// Sets one end of the selection range; the other end keeps its value.
    pub fn set_range(&mut self, first: bool, ticks: f64) {
        let pos = self.position(ticks);
        if first {
            self.range_1 = pos;
        } else {
            self.range_2 = pos;
        }
        self.has_range = true;
    }

    pub fn clear_range(&mut self) {
        self.has_range = false;
    }

    /// Selection range ordered start to end.
    pub fn range(&self) -> Option<(Position, Position)> {
        if !self.has_range {
            return None;
        }
        if self.range_1.ticks <= self.range_2.ticks {
            Some((self.range_1, self.range_2))
        } else {
            Some((self.range_2, self.range_1))
        }
    }

    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
        for pos in [
            &mut self.playhead,
            &mut self.cue,
            &mut self.loop_start,
            &mut self.loop_end,
            &mut self.punch_in,
            &mut self.punch_out,
            &mut self.range_1,
            &mut self.range_2,
            &mut self.playhead_before_pause,
        ] {
            pos.update_frames(&tempo);
        }
    }

    pub fn set_time_signatures(&mut self, map: TimeSignatureMap) {
        self.time_signatures = map;
    }

    /// Playhead frame after advancing by `frames`, wrapping at the loop end.
    pub fn position_after_adding_frames(&self, frames: i64) -> i64 {
        let before = self.playhead.frames;
        let after = before + frames;
        if self.loop_enabled && before < self.loop_end.frames && self.loop_end.frames <= after {
            after + self.loop_start.frames - self.loop_end.frames
        } else {
            after
        }
    }

    /// Audio thread only.
    pub fn add_to_playhead(&mut self, frames: i64) {
        let next = self.position_after_adding_frames(frames);
        self.playhead = Position::from_frames(next, &self.tempo);
    }

    /// Frames until the loop end when it lies strictly inside the next
    /// `nframes`, i.e. where a block has to be split.
    pub fn frames_to_loop_end(&self, nframes: i64) -> Option<i64> {
        if !self.loop_enabled {
            return None;
        }
        let distance = self.loop_end.frames - self.playhead.frames;
        (distance > 0 && distance < nframes).then_some(distance)
    }

    pub(crate) fn consume_countin(&mut self, frames: i64) {
        self.countin_frames_remaining = (self.countin_frames_remaining - frames).max(0);
    }

    pub(crate) fn consume_preroll(&mut self, frames: i64) {
        self.preroll_frames_remaining = (self.preroll_frames_remaining - frames).max(0);
    }

    /// Applies pending state requests at a cycle boundary. Returns true when
    /// the transport just started rolling.
    pub(crate) fn promote(&mut self) -> bool {
        match self.play_state {
            PlayState::PauseRequested => {
                self.set_play_state(PlayState::Paused);
                false
            }
            PlayState::RollRequested if self.countin_frames_remaining == 0 => {
                self.set_play_state(PlayState::Rolling);
                true
            }
            _ => false,
        }
    }

    pub fn positions(&self) -> TransportPositions {
        TransportPositions {
            playhead: self.playhead.ticks,
            cue: self.cue.ticks,
            loop_start: self.loop_start.ticks,
            loop_end: self.loop_end.ticks,
            loop_enabled: self.loop_enabled,
            punch_in: self.punch_in.ticks,
            punch_out: self.punch_out.ticks,
            punch_enabled: self.punch_enabled,
            range: self.range().map(|(a, b)| (a.ticks, b.ticks)),
        }
    }

    pub fn apply_positions(&mut self, positions: &TransportPositions) {
        self.playhead = self.position(positions.playhead);
        self.cue = self.position(positions.cue);
        if !self.set_loop_range(positions.loop_start, positions.loop_end) {
            warn!(
                "Ignoring empty loop range {}..{}",
                positions.loop_start, positions.loop_end
            );
        }
        self.loop_enabled = positions.loop_enabled;
        if !self.set_punch_range(positions.punch_in, positions.punch_out) {
            warn!(
                "Ignoring empty punch range {}..{}",
                positions.punch_in, positions.punch_out
            );
        }
        self.punch_enabled = positions.punch_enabled;
        match positions.range {
            Some((a, b)) => {
                self.set_range(true, a);
                self.set_range(false, b);
            }
            None => self.clear_range(),
        }
    }
}

/// Where a backward move lands: the previous snap point, or the one before
/// it when the playhead already sits on it (or, while rolling, just past it).
pub fn backward_target(grid: &SnapGrid, playhead: Position, rolling: bool, tempo: &Tempo) -> f64 {
    let prev = grid.prev_snap_point(playhead.ticks);
    let on_point = (playhead.ticks - prev).abs() < 1e-6;
    let just_past = rolling
        && playhead.frames - tempo.ticks_to_frames(prev)
            < tempo.ms_to_frames(REPEATED_BACKWARD_MS);
    if (on_point || just_past) && prev > 0.0 {
        grid.prev_snap_point((prev - 1e-3).max(0.0)).max(0.0)
    } else {
        prev.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::TimeSignature;
    use crate::snap_grid::{NoteLength, NoteType};

    // 120 BPM at 48 kHz: 25 frames per tick, 96_000 frames per 4/4 bar.
    const BAR_FRAMES: i64 = 96_000;

    fn transport() -> Transport {
        Transport::new(
            Tempo::new(120.0, 48_000),
            TimeSignatureMap::default(),
            TransportSettings::default(),
        )
    }

    fn drain(t: &Transport) -> Vec<TransportEvent> {
        let q = t.events();
        std::iter::from_fn(|| q.pop()).collect()
    }

    #[test]
    fn default_markers() {
        let t = transport();
        assert_eq!(t.loop_range().1.frames, 4 * BAR_FRAMES);
        assert_eq!(t.punch_range().0.frames, 2 * BAR_FRAMES);
        assert_eq!(t.play_state(), PlayState::Stopped);
    }

    #[test]
    fn roll_is_only_accepted_from_stopped_or_paused() {
        let mut t = transport();
        assert!(t.request_roll());
        assert!(!t.request_roll());
        assert!(t.promote());
        assert!(t.is_rolling());
        assert!(t.request_pause());
        assert!(!t.request_pause());
        assert!(!t.promote());
        assert_eq!(t.play_state(), PlayState::Paused);
        assert!(t.request_roll());
    }

    #[test]
    fn countin_holds_roll_requested() {
        let mut t = transport();
        t.set_settings(TransportSettings {
            countin_bars: 1,
            ..Default::default()
        });
        t.request_roll();
        assert_eq!(t.countin_frames_remaining(), BAR_FRAMES);
        assert!(!t.promote());
        t.consume_countin(BAR_FRAMES);
        assert!(t.promote());
    }

    #[test]
    fn preroll_moves_back_but_not_before_zero() {
        let mut t = transport();
        t.set_recording(true);
        t.move_playhead(3840.0, false);
        t.request_roll();
        assert_eq!(t.playhead().frames, 0);
        assert_eq!(t.preroll_frames_remaining(), BAR_FRAMES);
    }

    #[test]
    fn recording_and_rolling_refuse_manual_moves() {
        let mut t = transport();
        t.set_recording(true);
        t.request_roll();
        t.promote();
        let before = t.playhead();
        assert!(!t.can_user_move_playhead());
        assert!(!t.move_playhead(7680.0, true));
        assert_eq!(t.playhead(), before);
        t.set_recording(false);
        assert!(t.move_playhead(7680.0, true));
    }

    #[test]
    fn loop_wrap_carries_overshoot() {
        let mut t = transport();
        t.set_loop_range(0.0, 3840.0);
        t.set_loop(true);
        t.move_playhead(3800.0, false);
        let before = t.playhead().frames;
        t.add_to_playhead(2_000);
        assert_eq!(t.playhead().frames, before + 2_000 - BAR_FRAMES);

        t.move_playhead(3800.0, false);
        assert_eq!(t.frames_to_loop_end(2_000), Some(1_000));
        assert_eq!(t.frames_to_loop_end(1_000), None);
        t.add_to_playhead(1_000);
        assert_eq!(t.playhead().frames, 0);
    }

    #[test]
    fn punch_range_is_half_open() {
        let t = transport();
        assert!(!t.is_inside_punch_range(2 * BAR_FRAMES - 1));
        assert!(t.is_inside_punch_range(2 * BAR_FRAMES));
        assert!(!t.is_inside_punch_range(4 * BAR_FRAMES));
    }

    #[test]
    fn backward_repeats_when_on_a_point() {
        let grid = SnapGrid::default().with_length(NoteLength::Bar, NoteType::Normal);
        let mut t = transport();
        t.move_playhead(3840.0 * 2.0 + 100.0, false);
        assert!(t.move_backward(&grid));
        assert_eq!(t.playhead().ticks, 7680.0);
        assert!(t.move_backward(&grid));
        assert_eq!(t.playhead().ticks, 3840.0);
        assert_eq!(t.cue().ticks, 3840.0);
        assert!(t.move_forward(&grid));
        assert_eq!(t.playhead().ticks, 7680.0);
    }

    #[test]
    fn backward_while_rolling_skips_recent_point() {
        let grid = SnapGrid::default();
        let tempo = Tempo::new(120.0, 48_000);
        // 100 ticks past bar 2 is 2_500 frames, well inside 240 ms.
        let near = Position::from_ticks(7780.0, &tempo);
        assert_eq!(backward_target(&grid, near, true, &tempo), 3840.0);
        assert_eq!(backward_target(&grid, near, false, &tempo), 7680.0);
        let far = Position::from_ticks(7680.0 + 960.0, &tempo);
        assert_eq!(backward_target(&grid, far, true, &tempo), 7680.0);
    }

    #[test]
    fn toggles_emit_events_once() {
        let mut t = transport();
        drain(&t);
        t.set_loop(true);
        t.set_loop(true);
        t.set_recording(true);
        assert_eq!(
            drain(&t),
            vec![
                TransportEvent::LoopToggled(true),
                TransportEvent::RecordingToggled(true)
            ]
        );
    }

    #[test]
    fn positions_round_trip() {
        let mut t = transport();
        t.move_playhead(1234.0, true);
        t.set_loop_range(960.0, 7680.0);
        t.set_range(false, 100.0);
        t.set_range(true, 500.0);
        let saved = t.positions();
        let mut other = transport();
        other.apply_positions(&saved);
        assert_eq!(other.positions(), saved);
        assert_eq!(saved.range, Some((100.0, 500.0)));
    }

    fn markers() -> Markers {
        Markers {
            start: 3840.0,
            end: 3840.0 * 16.0,
            markers: vec![3840.0 * 6.0, 3840.0 * 10.0],
        }
    }

    #[test]
    fn marker_stops_include_loop_cue_and_zero() {
        let mut t = transport();
        t.move_playhead(3840.0 * 5.0, true);
        let stops = markers().stops(&t.positions());
        let bars: Vec<f64> = stops.iter().map(|s| s / 3840.0).collect();
        assert_eq!(bars, vec![0.0, 1.0, 4.0, 5.0, 6.0, 10.0, 16.0]);
    }

    #[test]
    fn next_and_previous_marker_set_the_cue() {
        let mut t = transport();
        t.move_playhead(3840.0 * 7.0, false);
        assert!(t.goto_marker(&markers(), MarkerJump::Next));
        assert_eq!(t.playhead().ticks, 3840.0 * 10.0);
        assert_eq!(t.cue().ticks, 3840.0 * 10.0);
        assert!(t.goto_marker(&markers(), MarkerJump::Previous));
        assert_eq!(t.playhead().ticks, 3840.0 * 6.0);
        assert!(t.goto_marker(&markers(), MarkerJump::Previous));
        // Bar 4 is the loop end.
        assert_eq!(t.playhead().ticks, 3840.0 * 4.0);

        assert!(t.goto_marker(&markers(), MarkerJump::End));
        assert!(!t.goto_marker(&markers(), MarkerJump::Next));
        assert_eq!(t.playhead().ticks, 3840.0 * 16.0);
        assert!(t.goto_marker(&markers(), MarkerJump::Start));
        assert_eq!(t.cue().ticks, 3840.0);
    }

    #[test]
    fn previous_marker_while_rolling_skips_one_just_passed() {
        let tempo = Tempo::new(120.0, 48_000);
        let positions = TransportPositions::default();
        // 100 ticks past bar 6 is 2_500 frames, inside the 240 ms window.
        let near = Position::from_ticks(3840.0 * 6.0 + 100.0, &tempo);
        let m = markers();
        assert_eq!(
            m.target(MarkerJump::Previous, &positions, near, true, &tempo),
            Some(3840.0 * 4.0)
        );
        assert_eq!(
            m.target(MarkerJump::Previous, &positions, near, false, &tempo),
            Some(3840.0 * 6.0)
        );
        // Zero is never skipped.
        let start = Position::from_ticks(100.0, &tempo);
        assert_eq!(
            m.target(MarkerJump::Previous, &positions, start, true, &tempo),
            Some(0.0)
        );
        assert_eq!(
            m.target(MarkerJump::Previous, &positions, Position::default(), false, &tempo),
            None
        );
    }

    #[test]
    fn playhead_to_bar_leaves_the_cue() {
        let mut t = transport();
        let mut map = TimeSignatureMap::default();
        map.insert(3840.0, TimeSignature::new(3, 4));
        t.set_time_signatures(map);
        assert!(t.set_playhead_to_bar(3));
        assert_eq!(t.playhead().ticks, 3840.0 + 2880.0);
        assert_eq!(t.cue().ticks, 0.0);
    }

    #[test]
    fn midi_input_rolls_only_when_enabled() {
        let mut t = transport();
        assert!(!t.midi_input_received());
        assert_eq!(t.play_state(), PlayState::Stopped);
        t.set_start_playback_on_midi_input(true);
        assert!(t.midi_input_received());
        assert_eq!(t.play_state(), PlayState::RollRequested);
        assert!(!t.midi_input_received());
    }

    #[test]
    fn metronome_and_recording_mode_emit_on_change() {
        let mut t = transport();
        drain(&t);
        assert_eq!(t.recording_mode(), RecordingMode::Takes);
        t.set_metronome_enabled(true);
        t.set_metronome_enabled(true);
        t.set_recording_mode(RecordingMode::MergeEvents);
        t.set_recording_mode(RecordingMode::MergeEvents);
        assert!(t.metronome_enabled());
        assert_eq!(t.settings().recording_mode, RecordingMode::MergeEvents);
        assert_eq!(
            drain(&t),
            vec![
                TransportEvent::MetronomeToggled(true),
                TransportEvent::RecordingModeChanged(RecordingMode::MergeEvents)
            ]
        );
    }
}
