use crate::config::{self, EngineConfig};
use crate::error::EngineError;
use crate::graph::{Graph, GraphSetup, NodeSet};
use crate::topology::Topology;
use crate::transport::{PlayState, Transport};
use crate::unit::EngineProcessTimeInfo;
use crate::worker::{self, CycleInfo, WorkerPool};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PROFILE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct CycleProfiler {
    report_at: Instant,
    cycle_count: u64,
    sub_cycle_count: u64,
    cycle_time_ns: u128,
    max_cycle_ns: u128,
}

impl CycleProfiler {
    fn new() -> Self {
        Self {
            report_at: Instant::now() + PROFILE_INTERVAL,
            cycle_count: 0,
            sub_cycle_count: 0,
            cycle_time_ns: 0,
            max_cycle_ns: 0,
        }
    }

    fn record(&mut self, elapsed: Duration, sub_cycles: usize) {
        let ns = elapsed.as_nanos();
        self.cycle_count += 1;
        self.sub_cycle_count += sub_cycles as u64;
        self.cycle_time_ns += ns;
        self.max_cycle_ns = self.max_cycle_ns.max(ns);
    }

    fn maybe_report(&mut self, cycle_samples: usize, sample_rate: u32, nodes: usize) {
        let now = Instant::now();
        if now < self.report_at {
            return;
        }
        let cycle_avg_us = if self.cycle_count > 0 {
            (self.cycle_time_ns / self.cycle_count as u128) as f64 / 1_000.0
        } else {
            0.0
        };
        let budget_us = if sample_rate > 0 {
            cycle_samples as f64 * 1_000_000.0 / sample_rate as f64
        } else {
            0.0
        };
        info!(
            "graph profile: nodes={} cycles={} sub_cycles={} cycle_avg_us={:.1} cycle_max_us={:.1} budget_us={:.1}",
            nodes,
            self.cycle_count,
            self.sub_cycle_count,
            cycle_avg_us,
            self.max_cycle_ns as f64 / 1_000.0,
            budget_us
        );
        self.report_at = now + PROFILE_INTERVAL;
        self.cycle_count = 0;
        self.sub_cycle_count = 0;
        self.cycle_time_ns = 0;
        self.max_cycle_ns = 0;
    }
}

/// What one call to [`Router::process`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sub_cycles: usize,
    pub rolled_frames: usize,
    pub nodes: usize,
}

/// Whether the router is running cycles. Flipped by `start`/`terminate` and
/// held by `publish` across its decision, so a set is never installed
/// directly once a cycle may be using the live one.
#[derive(Debug, Default)]
struct StartGate(Mutex<bool>);

impl StartGate {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct HandleInner {
    graph: Arc<Graph>,
    started: Arc<StartGate>,
    /// Every published set stays referenced here until nothing else holds
    /// it, so the audio thread only ever decrements reference counts.
    retired: Mutex<Vec<Arc<NodeSet>>>,
    drop_unconnected_hw: bool,
}

impl HandleInner {
    fn publish(&self, set: Arc<NodeSet>) {
        let nodes = set.len();
        let max_latency = set.max_route_latency();
        {
            let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
            retired.retain(|s| Arc::strong_count(s) > 1);
            retired.push(set.clone());
        }
        let started = self.started.lock();
        if *started {
            self.graph.set_pending(set);
            debug!(
                "Queued graph for rechain: nodes={} max_route_latency={}",
                nodes, max_latency
            );
        } else {
            self.graph.install(set);
            info!(
                "Installed graph: nodes={} max_route_latency={}",
                nodes, max_latency
            );
        }
    }
}

/// Control-side access to the router: builds graphs and publishes them.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    inner: Arc<HandleInner>,
}

/// Completion of a graph build started by [`RouterHandle::recalc_graph`].
#[derive(Debug)]
pub struct RecalcHandle {
    thread: Option<JoinHandle<()>>,
}

impl RecalcHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Blocks until the graph has been published.
    pub fn join(mut self) -> Result<(), EngineError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| {
                EngineError::Io(std::io::Error::other("graph build thread panicked"))
            }),
            None => Ok(()),
        }
    }

    /// Async [`RecalcHandle::join`]: the wait happens on tokio's blocking
    /// pool so the calling task's runtime thread stays free.
    pub async fn wait(self) -> Result<(), EngineError> {
        if self.is_finished() {
            return self.join();
        }
        tokio::task::spawn_blocking(move || self.join())
            .await
            .unwrap_or_else(|e| Err(EngineError::Io(std::io::Error::other(e.to_string()))))
    }
}

impl RouterHandle {
    pub fn graph(&self) -> Arc<Graph> {
        self.inner.graph.clone()
    }

    pub fn is_started(&self) -> bool {
        *self.inner.started.lock()
    }

    /// Snapshots `topology` and builds the next graph, on a helper thread
    /// when `in_background` is set. The result goes live at the start of the
    /// next cycle, or immediately when the router is not running.
    pub fn recalc_graph(
        &self,
        topology: &Topology,
        in_background: bool,
    ) -> Result<RecalcHandle, EngineError> {
        let setup = topology.snapshot(self.inner.drop_unconnected_hw);
        if !in_background {
            self.inner.publish(Arc::new(NodeSet::build(&setup)));
            return Ok(RecalcHandle { thread: None });
        }
        let inner = self.inner.clone();
        let name = "cadenza-graph-build".to_string();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || build_and_publish(&inner, &setup))
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;
        Ok(RecalcHandle {
            thread: Some(thread),
        })
    }

    pub fn live_nodes(&self) -> usize {
        self.inner.graph.live().len()
    }

    pub fn retired_sets(&self) -> usize {
        self.inner
            .retired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn build_and_publish(inner: &HandleInner, setup: &GraphSetup) {
    inner.publish(Arc::new(NodeSet::build(setup)));
}

/// Audio-side half: swaps in new graphs, splits blocks and runs cycles.
#[derive(Debug)]
pub struct Router {
    graph: Arc<Graph>,
    started: Arc<StartGate>,
    pool: Option<WorkerPool>,
    threads: usize,
    rt_priority: Option<i32>,
    max_block: usize,
    sample_rate: u32,
    remaining_latency_preroll: usize,
    profiler: Option<CycleProfiler>,
}

impl Router {
    pub fn new(config: &EngineConfig) -> (Self, RouterHandle) {
        let graph = Arc::new(Graph::new());
        let started = Arc::new(StartGate::default());
        let handle = RouterHandle {
            inner: Arc::new(HandleInner {
                graph: graph.clone(),
                started: started.clone(),
                retired: Mutex::new(vec![graph.live_full()]),
                drop_unconnected_hw: config.drop_unconnected_hw,
            }),
        };
        let router = Self {
            graph,
            started,
            pool: None,
            threads: config.worker_threads(),
            rt_priority: config.realtime_priority,
            max_block: config.block_size.max(1),
            sample_rate: config.sample_rate,
            remaining_latency_preroll: 0,
            profiler: config::env_flag(config::GRAPH_PROFILE_ENV).then(CycleProfiler::new),
        };
        (router, handle)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.pool.is_some() {
            return Ok(());
        }
        // Once the gate reads true, builds queue instead of swapping the
        // live set; a publish in progress finishes before this returns.
        *self.started.lock() = true;
        let pool = match WorkerPool::spawn(self.threads, self.rt_priority) {
            Ok(pool) => pool,
            Err(e) => {
                *self.started.lock() = false;
                return Err(e);
            }
        };
        info!("Router started with {} worker thread(s)", pool.threads());
        self.pool = Some(pool);
        Ok(())
    }

    pub fn terminate(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.terminate();
            info!("Router terminated");
        }
        let mut started = self.started.lock();
        *started = false;
        // Anything still pending would otherwise wait for a cycle that never comes.
        self.graph.rechain();
    }

    pub fn is_started(&self) -> bool {
        self.pool.is_some()
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.as_ref().map(|p| p.threads()).unwrap_or(0)
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn remaining_latency_preroll(&self) -> usize {
        self.remaining_latency_preroll
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    fn run(&self, set: &Arc<NodeSet>, info: CycleInfo) {
        match &self.pool {
            Some(pool) => pool.run_cycle(set, info),
            None => worker::run_inline(set, info),
        }
    }

    /// Runs one callback's worth of processing. The block is cut so that no
    /// sub-cycle spans a latency pre-roll end, a count-in end, a recording
    /// pre-roll end or the loop end.
    pub fn process(&mut self, transport: &mut Transport, n_frames: usize) -> CycleReport {
        let started_at = self.profiler.as_ref().map(|_| Instant::now());
        let n_frames = n_frames.min(self.max_block);
        // The superseded set is still referenced by the router handle.
        if let Some(old) = self.graph.rechain() {
            let live = self.graph.live();
            info!(
                "Rechained graph: nodes={} (was {}) max_route_latency={}",
                live.len(),
                old.len(),
                live.max_route_latency()
            );
        }
        let set = self.graph.live_full();

        if transport.promote() {
            self.remaining_latency_preroll = set.max_route_latency();
        }
        if !transport.is_rolling() {
            self.remaining_latency_preroll = 0;
        }

        let g_start_frame = transport.playhead().frames;
        let mut report = CycleReport {
            nodes: set.len(),
            ..Default::default()
        };
        let mut offset = 0;
        let mut remaining = n_frames;
        while remaining > 0 {
            let rolling = transport.is_rolling();
            let mut info = CycleInfo {
                time: EngineProcessTimeInfo {
                    g_start_frame,
                    g_start_frame_w_offset: transport.playhead().frames,
                    local_offset: offset,
                    nframes: remaining,
                    noroll: false,
                    rolling,
                },
                remaining_latency_preroll: 0,
            };
            let chunk = if rolling && self.remaining_latency_preroll > 0 {
                let chunk = remaining.min(self.remaining_latency_preroll);
                info.time.nframes = chunk;
                info.remaining_latency_preroll = self.remaining_latency_preroll;
                self.run(&set, info);
                self.remaining_latency_preroll -= chunk;
                chunk
            } else if transport.play_state() == PlayState::RollRequested
                && transport.countin_frames_remaining() > 0
            {
                let chunk = remaining.min(transport.countin_frames_remaining() as usize);
                info.time.nframes = chunk;
                self.run(&set, info);
                transport.consume_countin(chunk as i64);
                if transport.promote() {
                    self.remaining_latency_preroll = set.max_route_latency();
                }
                chunk
            } else if rolling {
                let mut chunk = remaining;
                let preroll = transport.preroll_frames_remaining();
                if preroll > 0 {
                    chunk = chunk.min(preroll as usize);
                }
                if let Some(to_loop_end) = transport.frames_to_loop_end(chunk as i64) {
                    chunk = to_loop_end as usize;
                }
                info.time.nframes = chunk;
                self.run(&set, info);
                transport.add_to_playhead(chunk as i64);
                transport.consume_preroll(chunk as i64);
                report.rolled_frames += chunk;
                chunk
            } else {
                self.run(&set, info);
                remaining
            };
            report.sub_cycles += 1;
            offset += chunk;
            remaining -= chunk;
        }

        if let (Some(profiler), Some(started_at)) = (self.profiler.as_mut(), started_at) {
            profiler.record(started_at.elapsed(), report.sub_cycles);
            profiler.maybe_report(n_frames, self.sample_rate, report.nodes);
        }
        report
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if self.pool.is_some() {
            self.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortId;
    use crate::units::Track;

    fn chain() -> Topology {
        let mut topology = Topology::new(48_000, 64);
        let uids: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| topology.add_unit(Box::new(Track::new(*name, 1, 1, false))).unwrap())
            .collect();
        for pair in uids.windows(2) {
            topology
                .connect(PortId::new(pair[0], 1), PortId::new(pair[1], 0), 1.0, false, true)
                .unwrap();
        }
        topology
    }

    fn config() -> EngineConfig {
        EngineConfig {
            block_size: 64,
            max_threads: Some(2),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn waiting_for_a_build_leaves_the_runtime_running() {
        let (release, released) = std::sync::mpsc::channel::<()>();
        let build = RecalcHandle {
            thread: Some(std::thread::spawn(move || {
                let _ = released.recv();
            })),
        };
        // Only runs if `wait` yields the single runtime thread.
        let releaser = tokio::spawn(async move {
            release.send(()).unwrap();
        });
        build.wait().await.unwrap();
        releaser.await.unwrap();
    }

    #[test]
    fn builds_racing_start_and_terminate_never_stall_a_cycle() {
        let topology = chain();
        let config = config();
        let (mut router, handle) = Router::new(&config);
        let mut transport =
            Transport::new(config.tempo(), config.time_signatures(), config.transport);
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    handle.recalc_graph(&topology, false).unwrap().join().unwrap();
                }
            });
            for _ in 0..50 {
                router.start().unwrap();
                for _ in 0..4 {
                    router.process(&mut transport, 64);
                }
                router.terminate();
            }
        });
        assert!(!handle.is_started());
        assert!(!handle.graph().has_pending());
        assert_eq!(handle.live_nodes(), 3);
    }

    #[test]
    fn started_router_only_takes_new_graphs_between_cycles() {
        let topology = chain();
        let config = config();
        let (mut router, handle) = Router::new(&config);
        router.start().unwrap();
        assert!(handle.is_started());
        let before = handle.graph().live_full();
        handle.recalc_graph(&topology, false).unwrap().join().unwrap();
        assert!(Arc::ptr_eq(&before, &handle.graph().live_full()));

        let mut transport =
            Transport::new(config.tempo(), config.time_signatures(), config.transport);
        let report = router.process(&mut transport, 64);
        assert_eq!(report.nodes, 3);
        router.terminate();
        assert!(!handle.is_started());

        // Stopped: a build goes live at once.
        handle.recalc_graph(&Topology::new(48_000, 64), false).unwrap().join().unwrap();
        assert_eq!(handle.live_nodes(), 0);
    }
}
