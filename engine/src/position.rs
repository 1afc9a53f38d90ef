use serde::{Deserialize, Serialize};

/// Ticks per quarter note.
pub const PPQN: u32 = 960;
const TICKS_PER_WHOLE_NOTE: f64 = (PPQN * 4) as f64;

/// Timeline position kept in both musical and sample time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticks: f64,
    pub frames: i64,
}

impl Position {
    pub fn from_ticks(ticks: f64, tempo: &Tempo) -> Self {
        Self {
            ticks,
            frames: tempo.ticks_to_frames(ticks),
        }
    }

    pub fn from_frames(frames: i64, tempo: &Tempo) -> Self {
        Self {
            ticks: tempo.frames_to_ticks(frames),
            frames,
        }
    }

    /// Recomputes frames after a tempo or sample-rate change.
    pub fn update_frames(&mut self, tempo: &Tempo) {
        self.frames = tempo.ticks_to_frames(self.ticks);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    pub bpm: f64,
    pub sample_rate: u32,
}

impl Tempo {
    pub fn new(bpm: f64, sample_rate: u32) -> Self {
        Self {
            bpm: if bpm > 0.0 { bpm } else { 120.0 },
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn frames_per_tick(&self) -> f64 {
        self.sample_rate as f64 * 60.0 / (self.bpm * PPQN as f64)
    }

    pub fn ticks_to_frames(&self, ticks: f64) -> i64 {
        (ticks * self.frames_per_tick()).round() as i64
    }

    pub fn frames_to_ticks(&self, frames: i64) -> f64 {
        frames as f64 / self.frames_per_tick()
    }

    pub fn ms_to_frames(&self, ms: u64) -> i64 {
        (self.sample_rate as u64 * ms / 1000) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats_per_bar: u32,
    pub beat_unit: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            beat_unit: 4,
        }
    }
}

impl TimeSignature {
    pub fn new(beats_per_bar: u32, beat_unit: u32) -> Self {
        Self {
            beats_per_bar: beats_per_bar.max(1),
            beat_unit: beat_unit.max(1),
        }
    }

    pub fn ticks_per_beat(&self) -> f64 {
        TICKS_PER_WHOLE_NOTE / self.beat_unit as f64
    }

    pub fn ticks_per_bar(&self) -> f64 {
        self.ticks_per_beat() * self.beats_per_bar as f64
    }
}

/// A time signature taking effect at `start_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignatureSegment {
    pub start_tick: f64,
    pub signature: TimeSignature,
}

/// Sorted signature changes. The first segment always starts at tick 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSignatureMap {
    segments: Vec<SignatureSegment>,
}

impl Default for TimeSignatureMap {
    fn default() -> Self {
        Self::new(TimeSignature::default())
    }
}

impl TimeSignatureMap {
    pub fn new(signature: TimeSignature) -> Self {
        Self {
            segments: vec![SignatureSegment {
                start_tick: 0.0,
                signature,
            }],
        }
    }

    pub fn from_segments(mut segments: Vec<SignatureSegment>) -> Self {
        segments.retain(|s| s.start_tick >= 0.0 && s.start_tick.is_finite());
        segments.sort_by(|a, b| a.start_tick.total_cmp(&b.start_tick));
        segments.dedup_by(|later, earlier| later.start_tick == earlier.start_tick);
        match segments.first() {
            Some(first) if first.start_tick == 0.0 => {}
            Some(first) => {
                let signature = first.signature;
                segments.insert(
                    0,
                    SignatureSegment {
                        start_tick: 0.0,
                        signature,
                    },
                );
            }
            None => return Self::default(),
        }
        Self { segments }
    }

    /// Adds or replaces the change at `start_tick`.
    pub fn insert(&mut self, start_tick: f64, signature: TimeSignature) {
        let mut segments = self.segments.clone();
        segments.retain(|s| s.start_tick != start_tick);
        segments.push(SignatureSegment {
            start_tick,
            signature,
        });
        *self = Self::from_segments(segments);
    }

    pub fn segments(&self) -> &[SignatureSegment] {
        &self.segments
    }

    fn segment_index(&self, tick: f64) -> usize {
        self.segments
            .partition_point(|s| s.start_tick <= tick)
            .saturating_sub(1)
    }

    pub fn segment_at(&self, tick: f64) -> SignatureSegment {
        self.segments[self.segment_index(tick)]
    }

    pub fn at(&self, tick: f64) -> TimeSignature {
        self.segment_at(tick).signature
    }

    /// Start of the segment following the one containing `tick`.
    pub fn next_boundary(&self, tick: f64) -> Option<f64> {
        self.segments
            .get(self.segment_index(tick) + 1)
            .map(|s| s.start_tick)
    }

    /// Tick distance of `bars` bars ending at `tick`, honoring any signature
    /// changes crossed on the way back.
    pub fn ticks_of_bars_before(&self, tick: f64, bars: u32) -> f64 {
        let mut cursor = tick;
        for _ in 0..bars {
            if cursor <= 0.0 {
                break;
            }
            let segment = self.segment_at((cursor - 1e-6).max(0.0));
            cursor = (cursor - segment.signature.ticks_per_bar()).max(0.0);
        }
        tick - cursor
    }

    /// Start of the 1-based `bar`. Bars restart at every signature change;
    /// a short bar cut off by a change still counts as one.
    pub fn bar_start(&self, bar: u32) -> f64 {
        let mut remaining = bar.saturating_sub(1) as f64;
        for (i, segment) in self.segments.iter().enumerate() {
            let per_bar = segment.signature.ticks_per_bar();
            let Some(next) = self.segments.get(i + 1) else {
                return segment.start_tick + remaining * per_bar;
            };
            let bars = ((next.start_tick - segment.start_tick) / per_bar - 1e-9).ceil();
            if remaining < bars {
                return segment.start_tick + remaining * per_bar;
            }
            remaining -= bars;
        }
        0.0
    }
}
