//! The threaded polling work manager.

use std::any::Any;
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::WorkConfig;
use crate::error::{Result, WorkError};
use crate::stats::WorkStats;
use crate::traits::{Manager, Worker};

/// What travels on the work queue and the master's control channel.
#[derive(Debug, PartialEq, Eq)]
pub enum Message<T> {
    Work(T),
    Shutdown,
}

type Queue<T> = Arc<Mutex<Receiver<Message<T>>>>;

struct Running<T> {
    work_tx: Sender<Message<T>>,
    control_tx: Sender<Message<Infallible>>,
    master: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// One master thread polling a [`Manager`] and a pool of threads feeding a
/// [`Worker`].
///
/// Dropping a running manager stops it.
pub struct PollingWorkManager<M, W>
where
    M: Manager,
    W: Worker<WorkId = M::WorkId>,
{
    config: WorkConfig,
    manager: Arc<Mutex<M>>,
    worker: Arc<W>,
    stats: WorkStats,
    running: Option<Running<M::WorkId>>,
}

impl<M, W> PollingWorkManager<M, W>
where
    M: Manager,
    W: Worker<WorkId = M::WorkId>,
{
    pub fn new(manager: M, worker: W, config: WorkConfig) -> Self {
        Self {
            config,
            manager: Arc::new(Mutex::new(manager)),
            worker: Arc::new(worker),
            stats: WorkStats::default(),
            running: None,
        }
    }

    pub fn config(&self) -> &WorkConfig {
        &self.config
    }

    /// Counters, live while running.
    pub fn stats(&self) -> WorkStats {
        self.stats.clone()
    }

    pub fn worker(&self) -> &Arc<W> {
        &self.worker
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Launch the worker pool, then the master.
    pub fn start(&mut self) -> Result<()> {
        let name = self.config.name.clone();
        if self.running.is_some() {
            return Err(WorkError::AlreadyRunning(name));
        }

        let (work_tx, work_rx) = mpsc::channel();
        let queue: Queue<M::WorkId> = Arc::new(Mutex::new(work_rx));
        let count = self.config.workers.max(1);

        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let thread_name = format!("{name}-worker-{i}");
            let worker = self.worker.clone();
            let queue = queue.clone();
            let stats = self.stats.clone();
            let label = thread_name.clone();
            let spawned = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&label, worker.as_ref(), &queue, &stats));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(source) => {
                    shutdown_workers(&work_tx, workers, &name);
                    return Err(WorkError::Spawn {
                        name: thread_name,
                        source,
                    });
                }
            }
        }

        let (control_tx, control_rx) = mpsc::channel();
        let master_name = format!("{name}-master");
        let manager = self.manager.clone();
        let master_tx = work_tx.clone();
        let stats = self.stats.clone();
        let interval = self.config.poll_interval;
        let label = name.clone();
        let spawned = thread::Builder::new()
            .name(master_name.clone())
            .spawn(move || master_loop(&label, &manager, &control_rx, &master_tx, interval, &stats));
        let master = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                shutdown_workers(&work_tx, workers, &name);
                return Err(WorkError::Spawn {
                    name: master_name,
                    source,
                });
            }
        };

        info!(name = %name, workers = count, poll_interval_ms = interval.as_millis() as u64, "work manager started");
        self.running = Some(Running {
            work_tx,
            control_tx,
            master,
            workers,
        });
        Ok(())
    }

    /// Stop the master, then send one shutdown per worker and join them all.
    ///
    /// Work already queued is processed before the workers exit.
    pub fn stop(&mut self) -> Result<()> {
        let name = self.config.name.clone();
        let Some(running) = self.running.take() else {
            return Err(WorkError::NotRunning(name));
        };

        // The master may be mid-tick; it sees the shutdown on its next wait.
        let _ = running.control_tx.send(Message::Shutdown);
        if running.master.join().is_err() {
            warn!(name = %name, "Unclean master exit");
        }
        shutdown_workers(&running.work_tx, running.workers, &name);

        info!(name = %name, stats = ?self.stats.snapshot(), "work manager stopped");
        Ok(())
    }
}

impl<M, W> Drop for PollingWorkManager<M, W>
where
    M: Manager,
    W: Worker<WorkId = M::WorkId>,
{
    fn drop(&mut self) {
        if self.running.is_some() {
            let _ = self.stop();
        }
    }
}

fn shutdown_workers<T>(work_tx: &Sender<Message<T>>, workers: Vec<JoinHandle<()>>, name: &str) {
    for _ in &workers {
        let _ = work_tx.send(Message::Shutdown);
    }
    for handle in workers {
        if handle.join().is_err() {
            warn!(name = %name, "Unclean worker exit");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn master_loop<M: Manager>(
    name: &str,
    manager: &Mutex<M>,
    control: &Receiver<Message<Infallible>>,
    work_tx: &Sender<Message<M::WorkId>>,
    interval: Duration,
    stats: &WorkStats,
) {
    loop {
        match control.recv_timeout(interval) {
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Message::Work(never)) => match never {},
            Err(RecvTimeoutError::Timeout) => {}
        }

        let generated = panic::catch_unwind(AssertUnwindSafe(|| {
            manager
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .generate_work_ids()
        }));
        let ids = match generated {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                error!(name = %name, error = %e, "failed to generate work");
                continue;
            }
            Err(payload) => {
                error!(name = %name, panic = %panic_message(payload.as_ref()), "work generation panicked");
                continue;
            }
        };

        if !ids.is_empty() {
            debug!(name = %name, count = ids.len(), "enqueueing work");
        }
        for id in ids {
            if work_tx.send(Message::Work(id)).is_err() {
                return;
            }
            stats.record_generated();
        }
    }
    debug!(name = %name, "master exited");
}

fn worker_loop<W: Worker>(name: &str, worker: &W, queue: &Queue<W::WorkId>, stats: &WorkStats) {
    loop {
        let message = match queue.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let id = match message {
            Ok(Message::Work(id)) => id,
            Ok(Message::Shutdown) | Err(_) => break,
        };

        let label = format!("{id:?}");
        match panic::catch_unwind(AssertUnwindSafe(|| worker.process(id))) {
            Ok(Ok(())) => {
                stats.record_processed();
                debug!(worker = %name, work_id = %label, "processed");
            }
            Ok(Err(e)) => {
                stats.record_failed();
                error!(worker = %name, work_id = %label, error = %e, "work item failed");
            }
            Err(payload) => {
                stats.record_failed();
                error!(worker = %name, work_id = %label, panic = %panic_message(payload.as_ref()), "work item panicked");
            }
        }
    }
    debug!(worker = %name, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Hands out each batch once, one batch per tick.
    struct Batches {
        batches: VecDeque<std::result::Result<Vec<u32>, String>>,
    }

    impl Batches {
        fn new(batches: Vec<std::result::Result<Vec<u32>, String>>) -> Self {
            Self {
                batches: batches.into(),
            }
        }
    }

    impl Manager for Batches {
        type WorkId = u32;
        type Error = String;

        fn generate_work_ids(&mut self) -> std::result::Result<Vec<u32>, String> {
            self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
        delay: Duration,
    }

    impl Worker for Recorder {
        type WorkId = u32;
        type Error = String;

        fn process(&self, id: u32) -> std::result::Result<(), String> {
            thread::sleep(self.delay);
            if id % 10 == 3 {
                panic!("item {id} explodes");
            }
            if id % 10 == 7 {
                return Err(format!("item {id} refused"));
            }
            self.seen.lock().unwrap().push(id);
            Ok(())
        }
    }

    fn config(workers: usize) -> WorkConfig {
        WorkConfig::new("test")
            .with_workers(workers)
            .with_poll_interval(Duration::from_millis(5))
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn processes_every_generated_id() {
        let ids: Vec<u32> = vec![0, 1, 2, 4, 5, 6, 8, 9];
        let mut pool = PollingWorkManager::new(
            Batches::new(vec![Ok(ids.clone())]),
            Recorder::default(),
            config(3),
        );
        pool.start().unwrap();
        let stats = pool.stats();
        wait_until(|| stats.processed() == 8);
        pool.stop().unwrap();

        let mut seen = pool.worker().seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ids);
        assert_eq!(stats.generated(), 8);
        assert_eq!(stats.failed(), 0);
    }

    #[test]
    fn failures_and_panics_do_not_kill_the_worker() {
        let mut pool = PollingWorkManager::new(
            Batches::new(vec![Ok(vec![1, 3, 5, 7, 9])]),
            Recorder::default(),
            config(1),
        );
        pool.start().unwrap();
        let stats = pool.stats();
        wait_until(|| stats.completed() == 5);
        pool.stop().unwrap();

        assert_eq!(*pool.worker().seen.lock().unwrap(), vec![1, 5, 9]);
        assert_eq!(
            stats.snapshot(),
            crate::StatsSnapshot {
                generated: 5,
                processed: 3,
                failed: 2
            }
        );
    }

    #[test]
    fn generation_errors_skip_a_tick() {
        let mut pool = PollingWorkManager::new(
            Batches::new(vec![Err("store offline".into()), Ok(vec![1, 2])]),
            Recorder::default(),
            config(2),
        );
        pool.start().unwrap();
        let stats = pool.stats();
        wait_until(|| stats.processed() == 2);
        pool.stop().unwrap();
    }

    #[test]
    fn stop_drains_queued_work() {
        let ids: Vec<u32> = (0..20).filter(|i| i % 10 != 3 && i % 10 != 7).collect();
        let recorder = Recorder {
            delay: Duration::from_millis(5),
            ..Recorder::default()
        };
        let mut pool = PollingWorkManager::new(Batches::new(vec![Ok(ids.clone())]), recorder, config(2));
        pool.start().unwrap();
        let stats = pool.stats();
        wait_until(|| stats.generated() == ids.len() as u64);
        pool.stop().unwrap();

        assert_eq!(stats.processed(), ids.len() as u64);
        assert_eq!(pool.worker().seen.lock().unwrap().len(), ids.len());
    }

    #[test]
    fn start_and_stop_are_guarded() {
        let mut pool = PollingWorkManager::new(Batches::new(vec![]), Recorder::default(), config(1));
        assert!(matches!(pool.stop(), Err(WorkError::NotRunning(_))));
        pool.start().unwrap();
        assert!(pool.is_running());
        assert!(matches!(pool.start(), Err(WorkError::AlreadyRunning(_))));
        pool.stop().unwrap();
        assert!(!pool.is_running());

        // Restartable.
        pool.start().unwrap();
        pool.stop().unwrap();
    }

    #[test]
    fn drop_stops_a_running_manager() {
        let stats = {
            let mut pool = PollingWorkManager::new(
                Batches::new(vec![Ok(vec![1, 2])]),
                Recorder::default(),
                config(2),
            );
            pool.start().unwrap();
            let stats = pool.stats();
            wait_until(|| stats.processed() == 2);
            stats
        };
        assert_eq!(stats.processed(), 2);
    }
}
