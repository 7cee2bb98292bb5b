//! Real-time scheduling of one unit's transitions against the wall clock.
//!
//! The scheduler runs on a dedicated thread. It sleeps until the wall-clock
//! instant of the next internal event, or until external input is announced,
//! whichever comes first. Input is applied at the simulated time of the
//! instant it is announced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::error::{lock_poisoned, SimError, SimResult};
use crate::time::{RealTimeClock, SimTime};
use crate::uri::ModelUri;

/// Longest single sleep of a scheduler thread.
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// What a real-time scheduler drives.
///
/// Every call is made from the scheduler thread.
pub trait RealTimeDriver: Send + Sync + 'static {
    /// Time of the next internal event.
    ///
    /// # Errors
    ///
    /// Ends the run with this error.
    fn next_event_time(&self) -> SimResult<SimTime>;

    /// Produces outputs and performs the internal transition due at `time`.
    ///
    /// # Errors
    ///
    /// Ends the run with this error.
    fn fire_internal(&self, time: SimTime) -> SimResult<()>;

    /// Applies the input received so far at `time`.
    ///
    /// # Errors
    ///
    /// Ends the run with this error.
    fn apply_external(&self, time: SimTime) -> SimResult<()>;

    /// Called once when the run ends at `time`, with how it ended.
    fn finish(&self, time: SimTime, outcome: SimResult<()>);
}

enum Command {
    External,
    Stop,
}

/// Handle on a running real-time scheduler thread.
#[derive(Debug)]
pub struct RealTimeScheduler {
    uri: ModelUri,
    commands: Sender<Command>,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RealTimeScheduler {
    /// Starts a scheduler for the unit of `uri` that runs until `end`.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the thread cannot be spawned.
    pub fn spawn(
        uri: ModelUri,
        clock: RealTimeClock,
        end: SimTime,
        command_queue_capacity: usize,
        driver: Arc<dyn RealTimeDriver>,
    ) -> SimResult<Self> {
        let (commands, rx) = bounded::<Command>(command_queue_capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let thread_uri = uri.clone();
        let thread_stop = Arc::clone(&stop);
        let thread_finished = Arc::clone(&finished);
        let join = thread::Builder::new()
            .name(format!("distdevs-rt-{uri}"))
            .spawn(move || {
                let outcome = scheduler_loop(&thread_uri, &clock, end, &rx, &thread_stop, driver.as_ref());
                if let Err(e) = &outcome {
                    warn!(uri = %thread_uri, error = %e, "Real-time run failed");
                }
                let at = clock.sim_now().min(end);
                driver.finish(at, outcome);
                thread_finished.store(true, Ordering::Release);
                info!(uri = %thread_uri, time = %at, "Real-time run finished");
            })
            .map_err(|e| SimError::internal(format!("failed to spawn real-time scheduler for {uri}: {e}")))?;

        Ok(Self {
            uri,
            commands,
            stop,
            finished,
            join: Mutex::new(Some(join)),
        })
    }

    /// URI of the scheduled unit.
    #[must_use]
    pub const fn uri(&self) -> &ModelUri {
        &self.uri
    }

    /// Wakes the scheduler to apply newly stored input.
    ///
    /// Non-blocking; when the queue is full a wake-up is already pending.
    pub fn notify_external(&self) {
        match self.commands.try_send(Command::External) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!(uri = %self.uri, "External input after the real-time run ended");
            }
        }
    }

    /// Asks the scheduler to end the run at the current instant.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.commands.try_send(Command::Stop);
    }

    /// Returns true once the run has ended and `finish` has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Waits for the scheduler thread.
    ///
    /// Called from the scheduler thread itself (from within `finish`), this
    /// returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Internal` if the thread panicked.
    pub fn join(&self) -> SimResult<()> {
        let handle = self.join.lock().map_err(|_| lock_poisoned("real-time scheduler"))?.take();
        let Some(handle) = handle else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        handle
            .join()
            .map_err(|_| SimError::internal(format!("real-time scheduler of {} panicked", self.uri)))
    }
}

impl Drop for RealTimeScheduler {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            warn!(uri = %self.uri, error = %e, "Real-time scheduler did not shut down cleanly");
        }
    }
}

fn scheduler_loop(
    uri: &ModelUri,
    clock: &RealTimeClock,
    end: SimTime,
    rx: &Receiver<Command>,
    stop: &AtomicBool,
    driver: &dyn RealTimeDriver,
) -> SimResult<()> {
    loop {
        if stop.load(Ordering::Acquire) {
            return Ok(());
        }
        let next = driver.next_event_time()?;
        let target = if next <= end { next } else { end };
        let wait = clock.until(target).min(MAX_WAIT);

        select! {
            recv(rx) -> msg => match msg {
                Ok(Command::External) => {
                    let now = clock.sim_now();
                    let due = now.min(end);
                    let mut next = driver.next_event_time()?;
                    while next <= due {
                        driver.fire_internal(next)?;
                        next = driver.next_event_time()?;
                    }
                    if now > end {
                        return Ok(());
                    }
                    debug!(uri = %uri, time = %now, "Applying external input");
                    driver.apply_external(now)?;
                }
                Ok(Command::Stop) | Err(_) => return Ok(()),
            },
            default(wait) => {
                if next <= end {
                    if clock.until(next).is_zero() {
                        driver.fire_internal(next)?;
                    }
                } else if clock.until(end).is_zero() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::Utc;
    use crossbeam_channel::Sender as ReportSender;

    use super::*;
    use crate::time::{SimDuration, TimeUnit};

    struct Ticker {
        period: f64,
        next: StdMutex<SimTime>,
        fired: StdMutex<Vec<SimTime>>,
        applied: StdMutex<Vec<SimTime>>,
        done: ReportSender<(SimTime, bool)>,
    }

    impl RealTimeDriver for Ticker {
        fn next_event_time(&self) -> SimResult<SimTime> {
            Ok(*self.next.lock().unwrap())
        }

        fn fire_internal(&self, time: SimTime) -> SimResult<()> {
            self.fired.lock().unwrap().push(time);
            *self.next.lock().unwrap() = time + SimDuration::new(self.period);
            Ok(())
        }

        fn apply_external(&self, time: SimTime) -> SimResult<()> {
            self.applied.lock().unwrap().push(time);
            Ok(())
        }

        fn finish(&self, time: SimTime, outcome: SimResult<()>) {
            let _ = self.done.send((time, outcome.is_ok()));
        }
    }

    fn ticker(period: f64) -> (Arc<Ticker>, Receiver<(SimTime, bool)>) {
        let (done, rx) = bounded(1);
        let driver = Arc::new(Ticker {
            period,
            next: StdMutex::new(SimTime::new(period)),
            fired: StdMutex::new(Vec::new()),
            applied: StdMutex::new(Vec::new()),
            done,
        });
        (driver, rx)
    }

    #[test]
    fn fires_every_event_up_to_the_end() {
        let (driver, done) = ticker(1.0);
        // One simulated second lasts ten wall-clock milliseconds.
        let clock = RealTimeClock::new(Utc::now(), SimTime::ZERO, TimeUnit::Seconds, 100.0).unwrap();
        let scheduler = RealTimeScheduler::spawn(
            ModelUri::new("ac"),
            clock,
            SimTime::new(5.5),
            16,
            Arc::clone(&driver) as Arc<dyn RealTimeDriver>,
        )
        .unwrap();

        let (at, ok) = done.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(ok);
        assert_eq!(at, SimTime::new(5.5));
        scheduler.join().unwrap();
        assert!(scheduler.is_finished());
        let fired = driver.fired.lock().unwrap().clone();
        assert_eq!(fired, (1..=5).map(|i| SimTime::new(f64::from(i))).collect::<Vec<_>>());
    }

    #[test]
    fn external_input_is_applied_at_the_current_instant() {
        let (driver, done) = ticker(1000.0);
        let clock = RealTimeClock::new(Utc::now(), SimTime::ZERO, TimeUnit::Seconds, 100.0).unwrap();
        let scheduler = RealTimeScheduler::spawn(
            ModelUri::new("meter"),
            clock,
            SimTime::new(100.0),
            16,
            Arc::clone(&driver) as Arc<dyn RealTimeDriver>,
        )
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        scheduler.notify_external();
        thread::sleep(Duration::from_millis(30));
        scheduler.stop();

        let (at, ok) = done.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(ok);
        assert!(at < SimTime::new(100.0));
        scheduler.join().unwrap();
        let applied = driver.applied.lock().unwrap().clone();
        assert_eq!(applied.len(), 1);
        assert!(applied[0] > SimTime::ZERO && applied[0] <= at);
        assert!(driver.fired.lock().unwrap().is_empty());
    }

    #[test]
    fn input_announced_after_the_end_keeps_due_events() {
        let (driver, done) = ticker(1.0);
        // The run's end is already a second of wall clock in the past.
        let wall_start = Utc::now() - chrono::Duration::seconds(1);
        let clock = RealTimeClock::new(wall_start, SimTime::ZERO, TimeUnit::Seconds, 100.0).unwrap();
        let scheduler = RealTimeScheduler::spawn(
            ModelUri::new("ac"),
            clock,
            SimTime::new(5.5),
            16,
            Arc::clone(&driver) as Arc<dyn RealTimeDriver>,
        )
        .unwrap();
        scheduler.notify_external();

        let (at, ok) = done.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(ok);
        assert_eq!(at, SimTime::new(5.5));
        scheduler.join().unwrap();
        let fired = driver.fired.lock().unwrap().clone();
        assert_eq!(fired, (1..=5).map(|i| SimTime::new(f64::from(i))).collect::<Vec<_>>());
        assert!(driver.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn dropping_the_handle_stops_the_run() {
        let (driver, done) = ticker(1.0);
        let clock = RealTimeClock::new(Utc::now(), SimTime::ZERO, TimeUnit::Hours, 1.0).unwrap();
        let scheduler = RealTimeScheduler::spawn(
            ModelUri::new("slow"),
            clock,
            SimTime::new(24.0),
            16,
            driver as Arc<dyn RealTimeDriver>,
        )
        .unwrap();
        drop(scheduler);
        let (_, ok) = done.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(ok);
    }
}
