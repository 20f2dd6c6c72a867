//! Handing calls over between recorded threads.
//!
//! In multi-thread mode, each recorded thread id gets an OS thread of its own,
//! so that each keeps its own GL context current the way the recorded thread
//! did. Only one of them ever runs at a time: the `Retracer` itself is the
//! baton. The dispatcher sends it, together with the job to run, down the
//! worker's resume channel, and waits for the worker to send it back before
//! dispatching the next call. Since nothing else can touch the retracer while
//! a worker holds it, none of the state it owns needs locking, and calls run
//! in exactly the order they were recorded.
//!
//! Parked workers wake every `WAKE_INTERVAL`, but only exit when `shutdown`
//! tells them to or the scheduler is dropped. A worker that quit on its own
//! could do so just as the dispatcher sent it the retracer, taking the
//! retracer down with its channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender};
use log::{debug, warn};

use crate::engine::Retracer;
use crate::error::{Result, RetraceError};

/// How long a parked worker waits before rechecking the finish flag.
pub const WAKE_INTERVAL: Duration = Duration::from_millis(20);

/// Work to run with the retracer, on a particular recorded thread.
pub type Job = Box<dyn FnOnce(&mut Retracer) -> Result<()> + Send>;

type Returned = (Box<Retracer>, Result<()>);

enum Token {
    Resume(Box<Retracer>, Job),
    Finish,
}

struct Worker {
    resume: Sender<Token>,
    returned: Receiver<Returned>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    finish: Arc<AtomicBool>,
    workers: HashMap<u32, Worker>,
}

fn worker_loop(
    tid: u32,
    resume: Receiver<Token>,
    returned: Sender<Returned>,
    finish: Arc<AtomicBool>,
) {
    debug!("worker for tid {} started", tid);
    loop {
        match resume.recv_timeout(WAKE_INTERVAL) {
            Ok(Token::Resume(mut retracer, job)) => {
                let result = job(&mut *retracer);
                if returned.send((retracer, result)).is_err() {
                    break;
                }
            }
            Ok(Token::Finish) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if finish.load(Ordering::SeqCst) {
                    debug!("worker for tid {} parked after finish", tid);
                }
            }
        }
    }
    debug!("worker for tid {} exiting", tid);
}

impl Scheduler {
    pub fn new(finish: Arc<AtomicBool>) -> Scheduler {
        Scheduler {
            finish,
            workers: HashMap::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finish.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn spawn(&mut self, tid: u32) -> Result<()> {
        let (resume_tx, resume_rx) = bounded(1);
        let (returned_tx, returned_rx) = bounded(1);
        let finish = self.finish.clone();
        let handle = thread::Builder::new()
            .name(format!("retrace-{}", tid))
            .spawn(move || worker_loop(tid, resume_rx, returned_tx, finish))?;
        self.workers.insert(
            tid,
            Worker {
                resume: resume_tx,
                returned: returned_rx,
                handle,
            },
        );
        Ok(())
    }

    fn retire(&mut self, tid: u32) {
        if let Some(worker) = self.workers.remove(&tid) {
            if worker.handle.join().is_err() {
                warn!("worker for tid {} panicked", tid);
            }
        }
    }

    /// Run `job` on the worker for `tid`, starting one if there is none yet,
    /// and wait for it to hand the retracer back.
    pub fn run_on(&mut self, tid: u32, retracer: Box<Retracer>, job: Job) -> Result<Returned> {
        let mut token = Token::Resume(retracer, job);
        // A worker that panicked has dropped its channel; start a fresh one.
        for _ in 0..2 {
            if !self.workers.contains_key(&tid) {
                self.spawn(tid)?;
            }
            let sent = match self.workers.get(&tid) {
                Some(worker) => worker.resume.send(token),
                None => break,
            };
            match sent {
                Ok(()) => return self.wait_for(tid),
                Err(SendError(unsent)) => {
                    debug!("worker for tid {} has exited; restarting it", tid);
                    self.retire(tid);
                    token = unsent;
                }
            }
        }
        Err(RetraceError::Platform(format!(
            "could not start a worker thread for tid {}",
            tid
        )))
    }

    fn wait_for(&mut self, tid: u32) -> Result<Returned> {
        loop {
            let received = match self.workers.get(&tid) {
                Some(worker) => worker.returned.recv_timeout(WAKE_INTERVAL),
                None => Err(RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(returned) => return Ok(returned),
                // The job is still running. A hung driver call hangs us too.
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.retire(tid);
                    return Err(RetraceError::Platform(format!(
                        "worker thread for tid {} died while replaying",
                        tid
                    )));
                }
            }
        }
    }

    /// Set the finish flag, and stop and join every worker.
    pub fn shutdown(&mut self) {
        self.finish.store(true, Ordering::SeqCst);
        let mut tids: Vec<_> = self.workers.keys().cloned().collect();
        tids.sort_unstable();
        for tid in tids {
            if let Some(worker) = self.workers.get(&tid) {
                let _ = worker.resume.send(Token::Finish);
            }
            self.retire(tid);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetraceOptions;
    use crate::testing::fake_retracer;

    #[test]
    fn test_parked_workers_outlive_finish_flag() {
        let (retracer, _, _) = fake_retracer(RetraceOptions::default());
        let finish = retracer.finish_flag();
        let mut scheduler = Scheduler::new(finish.clone());
        let mut retracer = Box::new(retracer);

        let job = |call_no: u32| -> Job {
            Box::new(move |r: &mut Retracer| {
                assert_eq!(thread::current().name(), Some("retrace-1"));
                r.cur_call_no = call_no;
                Ok(())
            })
        };
        let (back, result) = scheduler.run_on(1, retracer, job(1)).unwrap();
        result.unwrap();
        retracer = back;

        // Each resume lands after the worker has seen the flag at least once.
        finish.store(true, Ordering::SeqCst);
        for call_no in 2..6 {
            thread::sleep(WAKE_INTERVAL + Duration::from_millis(5));
            let (back, result) = scheduler.run_on(1, retracer, job(call_no)).unwrap();
            result.unwrap();
            assert_eq!(back.cur_call_no, call_no);
            assert_eq!(scheduler.worker_count(), 1);
            retracer = back;
        }

        scheduler.shutdown();
        assert_eq!(scheduler.worker_count(), 0);
    }
}
