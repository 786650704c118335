//! Module `periodic` implement the process's periodic multiplexer.
//!
//! A single scheduler thread fans ticks from a time source out to a
//! bounded pool of workers. Background chores, stats aggregation,
//! expiry sweeps, flush triggers, all register here instead of owning
//! ad-hoc timers, so ticks, cancellation and backpressure interact in
//! exactly one place.
//!
//! A registration is keyed by its [StopSignal]. It goes away three ways:
//!
//! * [Periodic::unregister] with the same signal.
//! * closing the signal, the scheduler notices on a later tick.
//! * the callback returning `false`.
//!
//! With W workers at most W callbacks execute concurrently. A tick that
//! arrives while a registration's callback is still running is dropped
//! for that registration, there is no queuing.

use log::debug;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        mpsc, Arc, Mutex,
    },
    thread, time,
};

use crate::{Error, Result};

/// Callback invoked on each tick, argument is the tick time. Return
/// `false` to drop the registration.
pub type Callback = Box<dyn FnMut(time::SystemTime) -> bool + Send>;

/// Cancellation handle for one registration in [Periodic].
///
/// Clones observe the same underlying signal. Closing the signal is a
/// passive unregister, the scheduler drops the registration on or before
/// the next tick.
#[derive(Clone)]
pub struct StopSignal {
    fired: Arc<AtomicBool>,
}

impl Default for StopSignal {
    fn default() -> StopSignal {
        StopSignal::new()
    }
}

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal {
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Close the signal. Idempotent.
    pub fn close(&self) {
        self.fired.store(true, SeqCst)
    }

    /// Return whether the signal is closed.
    pub fn is_closed(&self) -> bool {
        self.fired.load(SeqCst)
    }

    // registrations are keyed by signal identity, not value.
    fn to_key(&self) -> usize {
        Arc::as_ptr(&self.fired) as usize
    }
}

enum Msg {
    Tick(time::SystemTime),
    Register { stop: StopSignal, callback: Callback },
    Unregister { stop: StopSignal },
    Remove { key: usize },
    Stop,
}

struct Work {
    key: usize,
    callback: Arc<Mutex<Callback>>,
    busy: Arc<AtomicBool>,
    tick: time::SystemTime,
}

/// Periodic multiplexer, drives registered callbacks from a time source
/// across a bounded set of worker threads.
pub struct Periodic {
    name: String,
    tx: mpsc::Sender<Msg>,
    ticker: Option<thread::JoinHandle<()>>,
    ticker_stop: Arc<AtomicBool>,
    scheduler: Option<thread::JoinHandle<()>>,
}

impl Periodic {
    /// Create a multiplexer ticking every `period` with `workers` worker
    /// threads. Both must be non-zero.
    pub fn new(name: &str, period: time::Duration, workers: usize) -> Result<Periodic> {
        if period.is_zero() {
            return err_at!(InvalidInput, msg: "period must be non-zero");
        }

        let (tx, rx) = mpsc::channel();

        let ticker_stop = Arc::new(AtomicBool::new(false));
        let ticker = {
            let (tx, stop) = (tx.clone(), Arc::clone(&ticker_stop));
            // sleep in small slices so close() is never stuck waiting
            // out a long period.
            let step = time::Duration::from_millis(10).min(period);
            thread::spawn(move || {
                let mut slept = time::Duration::ZERO;
                loop {
                    thread::sleep(step);
                    if stop.load(SeqCst) {
                        break;
                    }
                    slept += step;
                    if slept >= period {
                        slept = time::Duration::ZERO;
                        if tx.send(Msg::Tick(time::SystemTime::now())).is_err() {
                            break;
                        }
                    }
                }
            })
        };

        let mut val = Periodic::new_with_scheduler(name, tx, rx, workers)?;
        val.ticker = Some(ticker);
        val.ticker_stop = ticker_stop;
        Ok(val)
    }

    /// Create a multiplexer driven by an external tick source, instead of
    /// wall-clock time. Useful for simulated-time testing.
    pub fn new_with_ticks(
        name: &str,
        ticks: mpsc::Receiver<time::SystemTime>,
        workers: usize,
    ) -> Result<Periodic> {
        let (tx, rx) = mpsc::channel();

        let pump = {
            let tx = tx.clone();
            thread::spawn(move || {
                for t in ticks.iter() {
                    if tx.send(Msg::Tick(t)).is_err() {
                        break;
                    }
                }
            })
        };

        let mut val = Periodic::new_with_scheduler(name, tx, rx, workers)?;
        val.ticker = Some(pump);
        Ok(val)
    }

    fn new_with_scheduler(
        name: &str,
        tx: mpsc::Sender<Msg>,
        rx: mpsc::Receiver<Msg>,
        workers: usize,
    ) -> Result<Periodic> {
        if workers == 0 {
            return err_at!(InvalidInput, msg: "workers must be non-zero");
        }

        let scheduler = {
            let (name, tx) = (name.to_string(), tx.clone());
            thread::spawn(move || scheduler_loop(name, tx, rx, workers))
        };

        Ok(Periodic {
            name: name.to_string(),
            tx,
            ticker: None,
            ticker_stop: Arc::new(AtomicBool::new(false)),
            scheduler: Some(scheduler),
        })
    }

    /// Return name of this multiplexer.
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Add `callback` to the set, keyed by `stop`. Each tick the
    /// scheduler shall attempt to dispatch the callback to a free worker.
    pub fn register(&self, stop: &StopSignal, callback: Callback) -> Result<()> {
        let msg = Msg::Register {
            stop: stop.clone(),
            callback,
        };
        err_at!(IPCFail, self.tx.send(msg))
    }

    /// Remove the registration keyed by `stop`.
    pub fn unregister(&self, stop: &StopSignal) -> Result<()> {
        let msg = Msg::Unregister { stop: stop.clone() };
        err_at!(IPCFail, self.tx.send(msg))
    }

    /// Close the time source, drain the workers and wait for them to exit.
    pub fn close(mut self) -> Result<()> {
        self.do_close()
    }

    fn do_close(&mut self) -> Result<()> {
        self.ticker_stop.store(true, SeqCst);
        self.tx.send(Msg::Stop).ok();
        match self.scheduler.take() {
            Some(handle) => match handle.join() {
                Ok(_) => Ok(()),
                Err(err) => err_at!(ThreadFail, msg: "scheduler {:?}", err),
            },
            None => Ok(()),
        }
        // NOTE: the ticker thread wakes up once more and exits on its own,
        // joining it here would block close() for up to one period.
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.do_close().ok();
        if let Some(handle) = self.ticker.take() {
            handle.join().ok();
        }
    }
}

struct Reg {
    stop: StopSignal,
    callback: Arc<Mutex<Callback>>,
    busy: Arc<AtomicBool>,
}

fn scheduler_loop(
    name: String,
    tx: mpsc::Sender<Msg>,
    rx: mpsc::Receiver<Msg>,
    workers: usize,
) {
    let (work_tx, work_rx) = mpsc::sync_channel::<Work>(0);
    let work_rx = Arc::new(Mutex::new(work_rx));

    let mut handles = vec![];
    for _i in 0..workers {
        let (tx, work_rx) = (tx.clone(), Arc::clone(&work_rx));
        handles.push(thread::spawn(move || worker_loop(tx, work_rx)));
    }

    let mut regs: HashMap<usize, Reg> = HashMap::new();

    for msg in rx.iter() {
        match msg {
            Msg::Tick(tick) => {
                let stopped: Vec<usize> = regs
                    .iter()
                    .filter(|(_, reg)| reg.stop.is_closed())
                    .map(|(key, _)| *key)
                    .collect();
                for key in stopped {
                    regs.remove(&key);
                }

                for (key, reg) in regs.iter() {
                    // a registration whose callback is still running
                    // drops this tick, no queuing.
                    if reg.busy.swap(true, SeqCst) {
                        continue;
                    }
                    let work = Work {
                        key: *key,
                        callback: Arc::clone(&reg.callback),
                        busy: Arc::clone(&reg.busy),
                        tick,
                    };
                    if work_tx.send(work).is_err() {
                        return;
                    }
                }
            }
            Msg::Register { stop, callback } => {
                let reg = Reg {
                    stop: stop.clone(),
                    callback: Arc::new(Mutex::new(callback)),
                    busy: Arc::new(AtomicBool::new(false)),
                };
                regs.insert(stop.to_key(), reg);
            }
            Msg::Unregister { stop } => {
                regs.remove(&stop.to_key());
            }
            Msg::Remove { key } => {
                regs.remove(&key);
            }
            Msg::Stop => break,
        }
    }

    debug!(target: "periodic", "{} shutting down {} workers", name, workers);

    std::mem::drop(work_tx);
    for handle in handles {
        handle.join().ok();
    }
}

fn worker_loop(tx: mpsc::Sender<Msg>, work_rx: Arc<Mutex<mpsc::Receiver<Work>>>) {
    loop {
        let work = {
            let rx = work_rx.lock().unwrap();
            match rx.recv() {
                Ok(work) => work,
                Err(_) => break,
            }
        };

        let cont = {
            let mut callback = work.callback.lock().unwrap();
            (*callback)(work.tick)
        };
        if cont {
            work.busy.store(false, SeqCst);
        } else {
            // leave the busy flag raised, the registration is done for,
            // further ticks must not dispatch it.
            tx.send(Msg::Remove { key: work.key }).ok();
        }
    }
}

#[cfg(test)]
#[path = "periodic_test.rs"]
mod periodic_test;
