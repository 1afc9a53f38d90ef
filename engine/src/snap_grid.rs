use crate::position::{PPQN, TimeSignatureMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Narrowest grid cell the adaptive mode will draw, in pixels.
const ADAPTIVE_MIN_PIXELS: f64 = 16.0;
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteLength {
    Bar,
    Beat,
    Note2_1,
    Note1_1,
    Note1_2,
    Note1_4,
    Note1_8,
    Note1_16,
    Note1_32,
    Note1_64,
    Note1_128,
}

impl NoteLength {
    /// Fixed lengths, finest first.
    const FINEST_FIRST: [NoteLength; 9] = [
        NoteLength::Note1_128,
        NoteLength::Note1_64,
        NoteLength::Note1_32,
        NoteLength::Note1_16,
        NoteLength::Note1_8,
        NoteLength::Note1_4,
        NoteLength::Note1_2,
        NoteLength::Note1_1,
        NoteLength::Note2_1,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NoteType {
    #[default]
    Normal,
    Dotted,
    Triplet,
}

pub fn ticks_per(length: NoteLength, note_type: NoteType, ticks_per_bar: f64, ticks_per_beat: f64) -> f64 {
    let quarter = PPQN as f64;
    let base = match length {
        NoteLength::Bar => ticks_per_bar,
        NoteLength::Beat => ticks_per_beat,
        NoteLength::Note2_1 => quarter * 8.0,
        NoteLength::Note1_1 => quarter * 4.0,
        NoteLength::Note1_2 => quarter * 2.0,
        NoteLength::Note1_4 => quarter,
        NoteLength::Note1_8 => quarter / 2.0,
        NoteLength::Note1_16 => quarter / 4.0,
        NoteLength::Note1_32 => quarter / 8.0,
        NoteLength::Note1_64 => quarter / 16.0,
        NoteLength::Note1_128 => quarter / 32.0,
    };
    match note_type {
        NoteType::Normal => base,
        NoteType::Dotted => base * 1.5,
        NoteType::Triplet => base * 2.0 / 3.0,
    }
}

/// Source of object positions (region edges, note starts) to snap to.
pub trait SnapEventProvider: Send + Sync {
    /// Tick positions inside `[start, end]`, in any order.
    fn positions_between(&self, start: f64, end: f64) -> Vec<f64>;
}

/// Quantizes tick positions to the musical grid and, optionally, to nearby
/// events.
#[derive(Clone)]
pub struct SnapGrid {
    pub snap_note_length: NoteLength,
    pub snap_note_type: NoteType,
    pub snap_adaptive: bool,
    pub snap_to_grid: bool,
    pub snap_to_events: bool,
    pub keep_offset: bool,
    pub pixels_per_tick: f64,
    time_signatures: TimeSignatureMap,
    provider: Option<Arc<dyn SnapEventProvider>>,
}

impl fmt::Debug for SnapGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapGrid")
            .field("snap_note_length", &self.snap_note_length)
            .field("snap_note_type", &self.snap_note_type)
            .field("snap_adaptive", &self.snap_adaptive)
            .field("snap_to_grid", &self.snap_to_grid)
            .field("snap_to_events", &self.snap_to_events)
            .field("keep_offset", &self.keep_offset)
            .field("pixels_per_tick", &self.pixels_per_tick)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

impl Default for SnapGrid {
    fn default() -> Self {
        Self::new(TimeSignatureMap::default())
    }
}

impl SnapGrid {
    pub fn new(time_signatures: TimeSignatureMap) -> Self {
        Self {
            snap_note_length: NoteLength::Bar,
            snap_note_type: NoteType::Normal,
            snap_adaptive: false,
            snap_to_grid: true,
            snap_to_events: false,
            keep_offset: false,
            pixels_per_tick: 0.1,
            time_signatures,
            provider: None,
        }
    }

    pub fn with_length(mut self, length: NoteLength, note_type: NoteType) -> Self {
        self.snap_note_length = length;
        self.snap_note_type = note_type;
        self
    }

    pub fn set_time_signatures(&mut self, map: TimeSignatureMap) {
        self.time_signatures = map;
    }

    pub fn set_event_provider(&mut self, provider: Option<Arc<dyn SnapEventProvider>>) {
        self.provider = provider;
    }

    /// Resolved grid cell at `tick`.
    pub fn snap_ticks_at(&self, tick: f64) -> f64 {
        let sig = self.time_signatures.at(tick);
        let (bar, beat) = (sig.ticks_per_bar(), sig.ticks_per_beat());
        if self.snap_adaptive && self.pixels_per_tick > 0.0 {
            let finest = NoteLength::FINEST_FIRST
                .iter()
                .map(|len| ticks_per(*len, NoteType::Normal, bar, beat))
                .find(|ticks| ticks * self.pixels_per_tick >= ADAPTIVE_MIN_PIXELS);
            return finest.unwrap_or(bar * 4.0);
        }
        ticks_per(self.snap_note_length, self.snap_note_type, bar, beat)
    }

    fn grid_prev(&self, pivot: f64) -> f64 {
        let segment = self.time_signatures.segment_at(pivot);
        let len = self.snap_ticks_at(pivot);
        let mut cells = ((pivot - segment.start_tick) / len + EPSILON).floor();
        // The tolerance may round a pivot just below a line up onto it.
        if segment.start_tick + cells * len > pivot {
            cells -= 1.0;
        }
        segment.start_tick + cells.max(0.0) * len
    }

    fn grid_next(&self, pivot: f64) -> f64 {
        let segment = self.time_signatures.segment_at(pivot);
        let len = self.snap_ticks_at(pivot);
        let mut cells = ((pivot - segment.start_tick) / len + EPSILON).floor() + 1.0;
        if segment.start_tick + (cells - 1.0) * len > pivot {
            cells -= 1.0;
        }
        let next = segment.start_tick + cells * len;
        match self.time_signatures.next_boundary(pivot) {
            Some(boundary) if boundary < next => boundary,
            _ => next,
        }
    }

    fn events_in(&self, start: f64, end: f64) -> Vec<f64> {
        match (&self.provider, self.snap_to_events) {
            (Some(provider), true) => provider.positions_between(start, end),
            _ => Vec::new(),
        }
    }

    fn prev_candidate(&self, pivot: f64) -> Option<f64> {
        let mut best = self.snap_to_grid.then(|| self.grid_prev(pivot));
        let window = self.snap_ticks_at(pivot);
        for pos in self.events_in(pivot - window, pivot) {
            if pos <= pivot && pos >= pivot - window && best.is_none_or(|b| pos > b) {
                best = Some(pos);
            }
        }
        best
    }

    fn next_candidate(&self, pivot: f64) -> Option<f64> {
        let mut best = self.snap_to_grid.then(|| self.grid_next(pivot));
        let window = self.snap_ticks_at(pivot);
        for pos in self.events_in(pivot, pivot + window) {
            if pos > pivot && pos <= pivot + window && best.is_none_or(|b| pos < b) {
                best = Some(pos);
            }
        }
        best
    }

    /// Closest snap point at or before `pivot`. Returns `pivot` itself when
    /// nothing is enabled or found.
    pub fn prev_snap_point(&self, pivot: f64) -> f64 {
        self.prev_candidate(pivot).unwrap_or(pivot)
    }

    /// Closest snap point strictly after `pivot`. Returns `pivot` itself
    /// when nothing is enabled or found.
    pub fn next_snap_point(&self, pivot: f64) -> f64 {
        self.next_candidate(pivot).unwrap_or(pivot)
    }

    /// Nearer of the previous and next snap points; ties go to the previous.
    pub fn closest_snap_point(&self, pivot: f64) -> f64 {
        match (self.prev_candidate(pivot), self.next_candidate(pivot)) {
            (Some(prev), Some(next)) => {
                if pivot - prev <= next - pivot {
                    prev
                } else {
                    next
                }
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => pivot,
        }
    }

    /// Snaps `target`. With `keep_offset`, the distance between `start` and
    /// its own previous snap point is carried over to the result.
    pub fn snap(&self, start: Option<f64>, target: f64) -> f64 {
        match start {
            Some(start) if self.keep_offset => {
                let offset = start - self.prev_snap_point(start);
                self.closest_snap_point(target - offset) + offset
            }
            _ => self.closest_snap_point(target),
        }
    }
}
