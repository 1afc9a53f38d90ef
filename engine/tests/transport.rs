use cadenza_engine::config::EngineConfig;
use cadenza_engine::context::{AudioContext, TransportCommand};
use cadenza_engine::position::{PPQN, TimeSignature};
use cadenza_engine::transport::{PlayState, TransportEvent, TransportSettings};

const BLOCK: usize = 512;
// 4/4 at 120 BPM and 48 kHz.
const BAR_TICKS: f64 = 3840.0;
const BAR_FRAMES: i64 = 96_000;

fn context(settings: TransportSettings) -> AudioContext {
    let (context, _) = AudioContext::new(&EngineConfig {
        block_size: BLOCK,
        transport: settings,
        ..Default::default()
    });
    context
}

#[test]
fn quarter_note_is_ppqn_ticks() {
    assert_eq!(TimeSignature::new(4, 4).ticks_per_beat(), PPQN as f64);
    assert_eq!(TimeSignature::new(4, 4).ticks_per_bar(), BAR_TICKS);
}

#[test]
fn two_bar_preroll_from_bar_four() {
    let mut ctx = context(TransportSettings::default());
    let t = ctx.transport_mut();
    assert!(t.move_playhead(4.0 * BAR_TICKS, false));
    t.set_recording(true);
    assert!(t.request_roll());
    assert_eq!(t.playhead().frames, 2 * BAR_FRAMES);
    assert_eq!(t.preroll_frames_remaining(), 2 * BAR_FRAMES);

    let blocks = (2 * BAR_FRAMES) as usize / BLOCK;
    for _ in 0..blocks {
        let report = ctx.process(BLOCK);
        assert_eq!(report.rolled_frames, BLOCK);
    }
    let t = ctx.transport();
    assert_eq!(t.play_state(), PlayState::Rolling);
    assert_eq!(t.preroll_frames_remaining(), 0);
    assert_eq!(t.playhead().frames, 4 * BAR_FRAMES);
}

#[test]
fn preroll_end_splits_the_block() {
    let mut ctx = context(TransportSettings::default());
    let t = ctx.transport_mut();
    // Half a bar in, so the pre-roll is not a whole number of blocks.
    t.move_playhead(BAR_TICKS / 2.0 + 10.0, false);
    t.set_recording(true);
    t.request_roll();
    let preroll = t.preroll_frames_remaining() as usize;
    assert_eq!(preroll, 48_000 + 250);

    let mut saw_split = false;
    let mut rolled = 0;
    while rolled < preroll + BLOCK {
        let report = ctx.process(BLOCK);
        assert_eq!(report.rolled_frames, BLOCK);
        saw_split |= report.sub_cycles == 2;
        rolled += report.rolled_frames;
    }
    assert!(saw_split);
}

#[test]
fn pause_returns_to_cue() {
    let mut ctx = context(TransportSettings {
        return_to_cue: true,
        ..Default::default()
    });
    let handle_events = ctx.transport().events();
    ctx.transport_mut().move_playhead(960.0, true);
    ctx.transport_mut().request_roll();
    for _ in 0..4 {
        ctx.process(BLOCK);
    }
    let rolled_to = ctx.transport().playhead();
    assert_eq!(rolled_to.frames, 24_000 + 4 * BLOCK as i64);

    assert!(ctx.transport_mut().request_pause());
    assert_eq!(ctx.transport().play_state(), PlayState::PauseRequested);
    assert_eq!(ctx.transport().playhead().ticks, 960.0);
    assert_eq!(ctx.transport().playhead_before_pause(), rolled_to);

    let report = ctx.process(BLOCK);
    assert_eq!(report.rolled_frames, 0);
    assert_eq!(ctx.transport().play_state(), PlayState::Paused);
    assert_eq!(ctx.transport().playhead().ticks, 960.0);

    let events: Vec<TransportEvent> = std::iter::from_fn(|| handle_events.pop()).collect();
    assert!(events.contains(&TransportEvent::PlayStateChanged(PlayState::Paused)));
}

#[test]
fn countin_delays_rolling() {
    let (mut ctx, handle) = AudioContext::new(&EngineConfig {
        block_size: BLOCK,
        transport: TransportSettings {
            countin_bars: 1,
            ..Default::default()
        },
        ..Default::default()
    });
    handle.send(TransportCommand::Roll);
    let mut counted = 0;
    let mut blocks = 0;
    while handle.snapshot().play_state != PlayState::Rolling {
        assert!(blocks < 1_000, "count-in never finished");
        let report = ctx.process(BLOCK);
        counted += BLOCK - report.rolled_frames;
        blocks += 1;
    }
    assert_eq!(counted, BAR_FRAMES as usize);
    // The bar is 187.5 blocks long; rolling starts mid-block.
    assert_eq!(blocks, 188);
    assert_eq!(handle.snapshot().playhead.frames, (BLOCK / 2) as i64);
}

#[test]
fn loop_end_wraps_mid_block() {
    let (mut ctx, handle) = AudioContext::new(&EngineConfig {
        block_size: BLOCK,
        ..Default::default()
    });
    handle.send(TransportCommand::SetLoopRange {
        start: 0.0,
        end: BAR_TICKS,
    });
    handle.send(TransportCommand::SetLoop(true));
    handle.send(TransportCommand::MovePlayhead {
        ticks: BAR_TICKS - 10.0,
        set_cue: false,
    });
    handle.send(TransportCommand::Roll);
    let report = ctx.process(BLOCK);
    assert_eq!(report.sub_cycles, 2);
    assert_eq!(report.rolled_frames, BLOCK);
    // 10 ticks = 250 frames before the wrap, the rest after it.
    assert_eq!(handle.snapshot().playhead.frames, BLOCK as i64 - 250);
}
