use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use log::{debug, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of threads, one connection per worker at a time.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
}

impl ThreadPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = mpsc::channel();

        let receiver = Arc::new(Mutex::new(receiver));
        for i in 0..size {
            workers.push(Worker::new(i, Arc::clone(&receiver)));
        }

        Self {
            workers,
            sender: Some(sender),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(Box::new(f)).is_err() {
            warn!("every worker has exited, dropping job");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);
            if worker.thread.join().is_err() {
                warn!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) -> Self {
        let thread = thread::spawn(move || {
            // A job serves one client until it disconnects, so the pool size
            // bounds the number of live sessions. Later connections queue in
            // the channel until a worker frees up.
            loop {
                let msg = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => break,
                };
                match msg {
                    Ok(job) => {
                        debug!("worker {id} handling a connection");
                        job();
                    }
                    Err(_) => {
                        debug!("worker {id} disconnected");
                        break;
                    }
                }
            }
        });

        Self { id, thread }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[test]
    fn runs_every_job_before_drop_returns() {
        let done = Arc::new(AtomicUsize::new(0));
        let pool = ThreadPool::new(3);
        assert_eq!(pool.size(), 3);

        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.execute(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);

        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn queued_connection_waits_for_free_worker() {
        let pool = ThreadPool::new(1);
        let (release, held) = mpsc::channel::<()>();
        let (started, starts) = mpsc::channel();

        let first = started.clone();
        pool.execute(move || {
            first.send(1).unwrap();
            held.recv().unwrap();
        });
        pool.execute(move || started.send(2).unwrap());

        assert_eq!(starts.recv().unwrap(), 1);
        assert!(starts.recv_timeout(Duration::from_millis(50)).is_err());

        release.send(()).unwrap();
        assert_eq!(starts.recv().unwrap(), 2);
    }

    #[test]
    fn zero_size_gets_one_worker() {
        assert_eq!(ThreadPool::new(0).size(), 1);
    }
}
