use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

use log::{info, warn};
use rivet::{EventLoop, EventLoopPool};

use crate::event_loop::SingleThreadEventLoop;

const DEFAULT_NAME: &str = "rivet-loop";

/// Configures an [`EventLoopGroup`].
#[derive(Debug, Clone)]
pub struct EventLoopGroupBuilder {
    threads: Option<usize>,
    name: String,
    pin_cores: bool,
}

impl Default for EventLoopGroupBuilder {
    fn default() -> Self {
        Self {
            threads: None,
            name: DEFAULT_NAME.to_owned(),
            pin_cores: false,
        }
    }
}

impl EventLoopGroupBuilder {
    /// Number of loop threads. Defaults to the number of available cores.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    /// Prefix of the loop thread names; loops are named `<prefix>-<index>`.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Pins loop `i` to the `i`-th available core.
    pub fn pin_cores(mut self, pin_cores: bool) -> Self {
        self.pin_cores = pin_cores;
        self
    }

    pub fn build(self) -> io::Result<Arc<EventLoopGroup>> {
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let threads = self.threads.unwrap_or_else(|| core_ids.len().max(1));
        if self.pin_cores && core_ids.is_empty() {
            warn!("core pinning requested but no core ids are available");
        }

        let mut loops = Vec::with_capacity(threads);
        for i in 0..threads {
            let core_id = if self.pin_cores {
                core_ids.get(i % core_ids.len().max(1)).copied()
            } else {
                None
            };
            let name = format!("{}-{}", self.name, i);
            match SingleThreadEventLoop::start(&name, core_id) {
                Ok(event_loop) => loops.push(event_loop),
                Err(err) => {
                    for started in &loops {
                        started.shutdown();
                    }
                    return Err(err);
                }
            }
        }

        let group = Arc::new(EventLoopGroup {
            loops,
            next: AtomicUsize::new(0),
            main_thread: std::thread::current().id(),
        });
        let pool: Arc<dyn EventLoopPool> = group.clone();
        for event_loop in &group.loops {
            event_loop.set_pool(Arc::downgrade(&pool));
        }
        info!("started {} event loops named {}-*", threads, self.name);
        Ok(group)
    }
}

/// A fixed set of [`SingleThreadEventLoop`]s handing out loops round robin.
pub struct EventLoopGroup {
    loops: Vec<Arc<SingleThreadEventLoop>>,
    next: AtomicUsize,
    main_thread: ThreadId,
}

impl EventLoopGroup {
    pub fn builder() -> EventLoopGroupBuilder {
        EventLoopGroupBuilder::default()
    }

    /// The next loop, round robin.
    pub fn next(&self) -> Arc<SingleThreadEventLoop> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        Arc::clone(&self.loops[i])
    }

    pub fn loops(&self) -> &[Arc<SingleThreadEventLoop>] {
        &self.loops
    }

    /// True if the calling thread belongs to one of the group's loops.
    pub fn in_any_loop(&self) -> bool {
        self.loops.iter().any(|event_loop| event_loop.in_loop_thread())
    }

    /// Shuts every loop down, letting queued tasks finish first.
    pub fn shutdown_gracefully(&self) {
        for event_loop in &self.loops {
            event_loop.shutdown();
        }
    }
}

impl EventLoopPool for EventLoopGroup {
    fn next_loop(&self) -> Arc<dyn EventLoop> {
        self.next()
    }

    fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.main_thread
    }

    fn len(&self) -> usize {
        self.loops.len()
    }
}

impl std::fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopGroup").field("loops", &self.loops).finish()
    }
}
