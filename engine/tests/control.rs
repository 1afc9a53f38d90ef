use cadenza_engine::client::Client;
use cadenza_engine::config::EngineConfig;
use cadenza_engine::message::{Action, Message};
use cadenza_engine::port::PortId;
use cadenza_engine::transport::{MarkerJump, Markers, PlayState, TransportEvent};
use cadenza_engine::unit::UnitUid;
use cadenza_engine::units::UnitDescriptor;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

async fn next_response(rx: &mut Receiver<Message>) -> Result<Action, String> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("engine did not answer")
            .expect("engine hung up");
        if let Message::Response(result) = message {
            return result;
        }
    }
}

async fn wait_for<F>(rx: &mut Receiver<Message>, mut pred: F) -> Vec<Result<Action, String>>
where
    F: FnMut(&Result<Action, String>) -> bool,
{
    let mut seen = vec![];
    loop {
        let response = next_response(rx).await;
        let done = pred(&response);
        seen.push(response);
        if done {
            return seen;
        }
    }
}

fn track(uid: u64, name: &str) -> UnitDescriptor {
    UnitDescriptor::Track {
        uid: UnitUid(uid),
        name: name.to_string(),
        audio_ins: 1,
        audio_outs: 1,
        midi: false,
    }
}

#[tokio::test]
async fn edits_rebuild_the_graph_and_transport_reports_back() {
    let (tx, handle, mut context) = cadenza_engine::init(EngineConfig::default());
    let client = Client::new(tx);
    let mut rx = client.subscribe().await.unwrap();

    client.add_unit(track(1, "lead")).await.unwrap();
    client
        .add_unit(UnitDescriptor::Fader {
            uid: UnitUid(2),
            name: "bus".to_string(),
            channels: 1,
        })
        .await
        .unwrap();
    client
        .connect(PortId::new(UnitUid(1), 1), PortId::new(UnitUid(2), 0))
        .await
        .unwrap();

    let seen = wait_for(&mut rx, |r| matches!(r, Ok(Action::Connect { .. }))).await;
    let added: Vec<UnitUid> = seen
        .iter()
        .filter_map(|r| match r {
            Ok(Action::UnitAdded { uid, ports, .. }) => {
                assert_eq!(ports.len(), 2);
                Some(*uid)
            }
            _ => None,
        })
        .collect();
    assert_eq!(added, vec![UnitUid(1), UnitUid(2)]);

    wait_for(&mut rx, |r| matches!(r, Ok(Action::GraphRebuilt))).await;
    // A burst may be split over two builds; wait for the one with the edge.
    for attempt in 0.. {
        let live = context.router().graph().live_full();
        if live.len() == 2 && live.init_trigger_list().len() == 1 {
            break;
        }
        assert!(attempt < 500, "graph with the connection never went live");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    context.process(256);

    client.play().await.unwrap();
    wait_for(&mut rx, |r| matches!(r, Ok(Action::Play))).await;
    context.process(256);
    let seen = wait_for(&mut rx, |r| {
        matches!(
            r,
            Ok(Action::Transport(TransportEvent::PlayStateChanged(PlayState::Rolling)))
        )
    })
    .await;
    assert!(seen.iter().any(|r| matches!(
        r,
        Ok(Action::Transport(TransportEvent::PlayStateChanged(PlayState::RollRequested)))
    )));
    assert_eq!(context.transport().playhead().frames, 256);

    client.quit().await.unwrap();
    wait_for(&mut rx, |r| matches!(r, Ok(Action::Quit))).await;
    handle.await.unwrap();
}

#[tokio::test]
async fn rejected_edits_come_back_as_errors() {
    let (tx, handle, _context) = cadenza_engine::init(EngineConfig::default());
    let client = Client::new(tx);
    let mut rx = client.subscribe().await.unwrap();

    client.add_unit(track(1, "a")).await.unwrap();
    client.add_unit(track(1, "again")).await.unwrap();
    client.add_unit(track(2, "b")).await.unwrap();
    // Input to input.
    client
        .connect(PortId::new(UnitUid(1), 0), PortId::new(UnitUid(2), 0))
        .await
        .unwrap();
    client
        .send(Action::TrackLevel(UnitUid(7), -6.0))
        .await
        .unwrap();

    let expected = ["Track not found", "already exists", "incompatible"];
    let mut errors: Vec<String> = vec![];
    while !expected
        .iter()
        .all(|needle| errors.iter().any(|e| e.contains(needle)))
    {
        if let Err(e) = next_response(&mut rx).await {
            errors.push(e);
        }
    }
    assert_eq!(errors.len(), 3);

    client.quit().await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn marker_jumps_move_the_playhead_and_cue() {
    let (tx, handle, mut context) = cadenza_engine::init(EngineConfig::default());
    let client = Client::new(tx);
    let mut rx = client.subscribe().await.unwrap();

    let bar = 3840.0;
    client
        .send(Action::SetMarkers(Markers {
            start: 0.0,
            end: bar * 32.0,
            markers: vec![bar * 8.0, bar * 12.0],
        }))
        .await
        .unwrap();
    wait_for(&mut rx, |r| matches!(r, Ok(Action::SetMarkers(_)))).await;

    client.send(Action::SetPlayheadToBar(6)).await.unwrap();
    wait_for(&mut rx, |r| matches!(r, Ok(Action::SetPlayheadToBar(6)))).await;
    context.process(256);
    assert_eq!(context.transport().playhead().ticks, bar * 5.0);

    client
        .send(Action::GotoMarker(MarkerJump::Next))
        .await
        .unwrap();
    wait_for(&mut rx, |r| matches!(r, Ok(Action::GotoMarker(_)))).await;
    context.process(256);
    assert_eq!(context.transport().playhead().ticks, bar * 8.0);
    assert_eq!(context.transport().cue().ticks, bar * 8.0);

    client
        .send(Action::GotoMarker(MarkerJump::End))
        .await
        .unwrap();
    wait_for(&mut rx, |r| matches!(r, Ok(Action::GotoMarker(_)))).await;
    context.process(256);
    assert_eq!(context.transport().playhead().ticks, bar * 32.0);

    client
        .send(Action::SetMarkers(Markers {
            start: bar * 4.0,
            end: bar,
            markers: vec![],
        }))
        .await
        .unwrap();
    let seen = wait_for(&mut rx, |r| r.is_err()).await;
    assert!(matches!(seen.last(), Some(Err(e)) if e.contains("before start")));

    client.send(Action::SetMetronome(true)).await.unwrap();
    wait_for(&mut rx, |r| matches!(r, Ok(Action::SetMetronome(true)))).await;
    context.process(256);
    wait_for(&mut rx, |r| {
        matches!(r, Ok(Action::Transport(TransportEvent::MetronomeToggled(true))))
    })
    .await;
    assert!(context.transport().metronome_enabled());

    client.quit().await.unwrap();
    handle.await.unwrap();
}
