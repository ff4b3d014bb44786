//! Playback clock and the thread that drives it.

use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::time::MetricTime;

/// Monotonic time since an arbitrary origin.
pub trait TimeSource: Debug + Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Time that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    nanos: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(by.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.nanos
            .store(to.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// `current = start + elapsed * speed`, sampled on every tick.
#[derive(Debug)]
pub(crate) struct Clock {
    source: Arc<dyn TimeSource>,
    running: bool,
    started_at: Duration,
    start_time: MetricTime,
    current: MetricTime,
    speed: f64,
}

impl Clock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            running: false,
            started_at: Duration::ZERO,
            start_time: MetricTime::ZERO,
            current: MetricTime::ZERO,
            speed: 1.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_time(&self) -> MetricTime {
        self.current
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.started_at = self.source.now();
        self.running = true;
    }

    /// Freezes the clock at its current reading.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.current = self.reading();
        self.start_time = self.current;
        self.running = false;
    }

    pub fn set_current_time(&mut self, time: MetricTime) {
        self.start_time = time;
        self.current = time;
        self.started_at = self.source.now();
    }

    pub fn set_speed(&mut self, speed: f64) {
        if self.running {
            self.current = self.reading();
            self.start_time = self.current;
            self.started_at = self.source.now();
        }
        self.speed = speed;
    }

    /// Samples the time source. `None` while stopped.
    pub fn tick(&mut self) -> Option<MetricTime> {
        if !self.running {
            return None;
        }
        self.current = self.reading();
        Some(self.current)
    }

    fn reading(&self) -> MetricTime {
        let elapsed = self.source.now().saturating_sub(self.started_at);
        let units = (MetricTime::from_duration(elapsed).units() as f64 * self.speed).round();
        self.start_time + MetricTime::from_units(units as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickCommand {
    Start,
    Stop,
    Shutdown,
}

/// Background thread calling `on_tick` every interval while started.
#[derive(Debug)]
pub(crate) struct TickThread {
    commands: Sender<TickCommand>,
    thread_id: ThreadId,
}

impl TickThread {
    /// Spawns the thread paused. It exits when `on_tick` returns `false`,
    /// on shutdown, or when every sender is gone.
    pub fn spawn(
        interval: Duration,
        on_tick: impl Fn() -> bool + Send + 'static,
    ) -> io::Result<(Self, JoinHandle<()>)> {
        let (commands, receiver) = crossbeam::channel::unbounded();
        let handle = thread::Builder::new()
            .name("cueline-tick".to_string())
            .spawn(move || tick_thread(receiver, interval, on_tick))?;

        let thread_id = handle.thread().id();
        Ok((
            Self {
                commands,
                thread_id,
            },
            handle,
        ))
    }

    pub fn start(&self) {
        let _ = self.commands.send(TickCommand::Start);
    }

    pub fn stop(&self) {
        let _ = self.commands.send(TickCommand::Stop);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(TickCommand::Shutdown);
    }

    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

fn tick_thread(receiver: Receiver<TickCommand>, interval: Duration, on_tick: impl Fn() -> bool) {
    debug!(?interval, "tick thread started");
    let mut active = false;

    loop {
        let command = if active {
            match receiver.recv_timeout(interval) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    if !on_tick() {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            }
        };

        match command {
            TickCommand::Start => active = true,
            TickCommand::Stop => active = false,
            TickCommand::Shutdown => break,
        }
    }

    debug!("tick thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn clock() -> (Clock, ManualTimeSource) {
        let source = ManualTimeSource::new();
        (Clock::new(Arc::new(source.clone())), source)
    }

    #[test]
    fn reading_follows_source_while_running() {
        let (mut clock, source) = clock();
        assert_eq!(clock.tick(), None);

        clock.start();
        source.advance(Duration::from_millis(250));
        assert_eq!(clock.tick(), Some(MetricTime::from_millis(250)));

        clock.stop();
        source.advance(Duration::from_millis(250));
        assert_eq!(clock.tick(), None);
        assert_eq!(clock.current_time(), MetricTime::from_millis(250));

        clock.start();
        source.advance(Duration::from_millis(100));
        assert_eq!(clock.tick(), Some(MetricTime::from_millis(350)));
    }

    #[test]
    fn speed_change_rebases() {
        let (mut clock, source) = clock();
        clock.start();
        source.advance(Duration::from_millis(100));
        clock.set_speed(2.0);
        source.advance(Duration::from_millis(100));
        assert_eq!(clock.tick(), Some(MetricTime::from_millis(300)));
    }

    #[test]
    fn set_current_time_restarts_elapsed() {
        let (mut clock, source) = clock();
        clock.start();
        source.advance(Duration::from_millis(100));
        clock.set_current_time(MetricTime::from_millis(1000));
        source.advance(Duration::from_millis(10));
        assert_eq!(clock.tick(), Some(MetricTime::from_millis(1010)));
    }

    #[test]
    fn tick_thread_ticks_only_while_started() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let (thread, handle) = TickThread::spawn(Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        thread.start();
        std::thread::sleep(Duration::from_millis(50));
        thread.stop();
        assert!(ticks.load(Ordering::SeqCst) > 0);

        thread.shutdown();
        handle.join().unwrap();
        assert!(!thread.is_current_thread());
    }
}
