use crate::error::EngineError;
use crate::graph::NodeSet;
use crate::semaphore::Semaphore;
use crate::unit::EngineProcessTimeInfo;
use arc_swap::ArcSwapOption;
#[cfg(unix)]
use nix::libc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error};

#[cfg(unix)]
const RT_POLICY: i32 = libc::SCHED_FIFO;

/// Everything a worker needs to run one node of the current cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleInfo {
    pub time: EngineProcessTimeInfo,
    pub remaining_latency_preroll: usize,
}

/// Per-cycle parameters, written by the coordinator before the first
/// trigger is posted. The semaphore handoff orders these stores before any
/// worker load.
#[derive(Debug, Default)]
struct CycleSlot {
    g_start_frame: AtomicI64,
    g_start_frame_w_offset: AtomicI64,
    local_offset: AtomicUsize,
    nframes: AtomicUsize,
    noroll: AtomicBool,
    rolling: AtomicBool,
    remaining_latency_preroll: AtomicUsize,
}

impl CycleSlot {
    fn store(&self, info: &CycleInfo) {
        let t = &info.time;
        self.g_start_frame.store(t.g_start_frame, Ordering::Relaxed);
        self.g_start_frame_w_offset
            .store(t.g_start_frame_w_offset, Ordering::Relaxed);
        self.local_offset.store(t.local_offset, Ordering::Relaxed);
        self.nframes.store(t.nframes, Ordering::Relaxed);
        self.noroll.store(t.noroll, Ordering::Relaxed);
        self.rolling.store(t.rolling, Ordering::Relaxed);
        self.remaining_latency_preroll
            .store(info.remaining_latency_preroll, Ordering::Relaxed);
    }

    fn load(&self) -> CycleInfo {
        CycleInfo {
            time: EngineProcessTimeInfo {
                g_start_frame: self.g_start_frame.load(Ordering::Relaxed),
                g_start_frame_w_offset: self.g_start_frame_w_offset.load(Ordering::Relaxed),
                local_offset: self.local_offset.load(Ordering::Relaxed),
                nframes: self.nframes.load(Ordering::Relaxed),
                noroll: self.noroll.load(Ordering::Relaxed),
                rolling: self.rolling.load(Ordering::Relaxed),
            },
            remaining_latency_preroll: self.remaining_latency_preroll.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Shared {
    /// Set of the cycle in flight, published by the coordinator before the
    /// first trigger.
    current: ArcSwapOption<NodeSet>,
    trigger: Semaphore,
    cycle_done: Semaphore,
    terminate: AtomicBool,
    cycle: CycleSlot,
}

impl Shared {
    fn work(&self) {
        loop {
            self.trigger.wait();
            if self.terminate.load(Ordering::Acquire) {
                return;
            }
            let current = self.current.load();
            let Some(set) = current.as_ref() else {
                continue;
            };
            if let Some(index) = set.pop() {
                self.run_node(set, index);
            }
        }
    }

    fn run_node(&self, set: &NodeSet, index: usize) {
        let Some(node) = set.node(index) else {
            return;
        };
        let info = self.cycle.load();
        node.run(&info.time, info.remaining_latency_preroll);
        for &child in node.outgoing() {
            let runnable = set.node(child).is_some_and(|c| c.upstream_done());
            if runnable && set.push(child) {
                self.trigger.post();
            }
        }
        if node.is_terminal() && set.terminal_done() {
            self.cycle_done.post();
        }
    }
}

/// Fixed pool of OS threads executing graph nodes. Workers park on the
/// trigger semaphore between nodes and never allocate while running one.
#[derive(Debug)]
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(threads: usize, rt_priority: Option<i32>) -> Result<Self, EngineError> {
        let shared = Arc::new(Shared {
            current: ArcSwapOption::empty(),
            trigger: Semaphore::new(0),
            cycle_done: Semaphore::new(0),
            terminate: AtomicBool::new(false),
            cycle: CycleSlot::default(),
        });
        let mut pool = Self {
            shared,
            handles: Vec::with_capacity(threads.max(1)),
        };
        for id in 0..threads.max(1) {
            let name = format!("cadenza-graph-{id}");
            let shared = pool.shared.clone();
            let thread_name = name.clone();
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    if let Some(priority) = rt_priority {
                        if let Err(e) = configure_rt_thread(&thread_name, priority) {
                            error!("{}", e);
                        }
                    }
                    shared.work();
                })
                .map_err(|source| EngineError::ThreadSpawn { name, source })?;
            pool.handles.push(handle);
        }
        debug!("Started {} graph worker(s)", pool.handles.len());
        Ok(pool)
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Runs every node of `set` exactly once and returns when the last
    /// terminal node has finished. Workers only ever touch this set, whatever
    /// the graph's live set is meanwhile.
    pub fn run_cycle(&self, set: &Arc<NodeSet>, info: CycleInfo) {
        if set.is_empty() {
            return;
        }
        self.shared.current.store(Some(set.clone()));
        self.shared.cycle.store(&info);
        set.reset();
        for &index in set.init_trigger_list() {
            if set.push(index) {
                self.shared.trigger.post();
            }
        }
        self.shared.cycle_done.wait();
    }

    pub fn terminate(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.shared.terminate.store(true, Ordering::Release);
        self.shared.trigger.post_n(self.handles.len());
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Graph worker exited with a panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Runs a cycle on the calling thread, in refcount order. Used while no
/// worker pool is running.
pub fn run_inline(set: &NodeSet, info: CycleInfo) {
    if set.is_empty() {
        return;
    }
    set.reset();
    for &index in set.init_trigger_list() {
        set.push(index);
    }
    while let Some(index) = set.pop() {
        let Some(node) = set.node(index) else {
            continue;
        };
        node.run(&info.time, info.remaining_latency_preroll);
        for &child in node.outgoing() {
            if set.node(child).is_some_and(|c| c.upstream_done()) {
                set.push(child);
            }
        }
        if node.is_terminal() {
            set.terminal_done();
        }
    }
}

fn configure_rt_thread(name: &str, priority: i32) -> Result<(), String> {
    #[cfg(unix)]
    {
        let thread = unsafe { libc::pthread_self() };
        let param = unsafe {
            let mut p = std::mem::zeroed::<libc::sched_param>();
            p.sched_priority = priority;
            p
        };
        let rc = unsafe { libc::pthread_setschedparam(thread, RT_POLICY, &param) };
        if rc != 0 {
            return Err(format!(
                "pthread_setschedparam({}, prio {}) failed with errno {}",
                name, priority, rc
            ));
        }
        let mut actual_policy = 0_i32;
        let mut actual_param = unsafe { std::mem::zeroed::<libc::sched_param>() };
        let rc =
            unsafe { libc::pthread_getschedparam(thread, &mut actual_policy, &mut actual_param) };
        if rc != 0 {
            return Err(format!(
                "pthread_getschedparam({}) failed with errno {}",
                name, rc
            ));
        }
        if actual_policy != RT_POLICY || actual_param.sched_priority != priority {
            return Err(format!(
                "realtime verification failed for {}: policy {}, prio {}",
                name, actual_policy, actual_param.sched_priority
            ));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = name;
        let _ = priority;
        Err("Realtime thread priority is not supported on this platform".to_string())
    }
}
