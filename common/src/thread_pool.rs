use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{JoinHandle, panicking, spawn};

/// A unit of work that can run on a pool thread.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// Messages a worker thread can receive.
enum Message {
    /// New work to execute.
    NewJob(Job),
    /// Tells the worker to stop.
    Terminate,
}

/// Errors that can occur while operating a `ThreadPool`.
#[derive(Debug, PartialEq)]
pub enum ThreadPoolError {
    /// Failed to hand a job to a worker thread.
    SendError,
    /// Failed to acquire a lock on shared pool state.
    LockError,
}

impl fmt::Display for ThreadPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadPoolError::SendError => write!(f, "Failed to send message to worker thread"),
            ThreadPoolError::LockError => write!(f, "Failed to acquire lock"),
        }
    }
}

/// Worker guard.
///
/// Lives for the duration of the worker thread. When the thread exits
/// (normally or via panic), `Drop` runs and:
/// 1. Decrements the live-worker counter.
/// 2. If the thread died from a panic, immediately spawns a replacement so
///    the pool's size stays constant.
struct Sentinel {
    shared: Arc<Shared>,
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);

        if panicking() {
            self.shared.spawn_worker();
        }
    }
}

/// State shared by every worker in the pool.
struct Shared {
    /// Work queue, guarded by a `Mutex` so workers can take turns receiving.
    receiver: Mutex<Receiver<Message>>,
    /// Number of workers currently alive.
    live: AtomicUsize,
    /// Target number of workers the pool maintains.
    max: usize,
}

impl Shared {
    /// Spawns one worker thread.
    ///
    /// The thread installs a [`Sentinel`] before entering its receive loop,
    /// runs jobs as they arrive, and exits on `Message::Terminate` or when
    /// the channel closes. A panic inside a job is caught by unwinding past
    /// `job()`; the `Sentinel`'s `Drop` then respawns the worker.
    fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::clone(self);

        spawn(move || {
            let _sentinel_guard = Sentinel {
                shared: Arc::clone(&shared),
            };

            loop {
                let msg = {
                    let rx = match shared.receiver.lock() {
                        Ok(guard) => guard,
                        Err(_) => break,
                    };
                    rx.recv()
                };

                match msg {
                    Ok(Message::NewJob(job)) => {
                        job();
                    }
                    Ok(Message::Terminate) | Err(_) => break,
                }
            }
        })
    }
}

/// A fixed-size pool of worker threads.
///
/// Jobs are submitted with [`execute`](Self::execute) and pulled from a
/// shared queue by whichever worker is free. A job that panics takes down
/// only its own worker, which is immediately replaced so pool capacity never
/// shrinks. Dropping the `ThreadPool` signals every worker to terminate and
/// joins them before returning.
///
/// # Example
///
/// ```
/// use common::thread_pool::ThreadPool;
/// let pool = ThreadPool::new(4);
///
/// pool.execute(|| {
///     println!("running on a pool thread");
/// }).expect("pool accepted the job");
/// ```
pub struct ThreadPool {
    handles: Vec<Option<JoinHandle<()>>>,
    sender: Sender<Message>,
    shared: Arc<Shared>,
}

impl ThreadPool {
    /// Creates a new `ThreadPool` with the given number of worker threads.
    /// A size of zero is rounded up to one.
    pub fn new(mut size: usize) -> ThreadPool {
        if size == 0 {
            size += 1
        }

        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            receiver: Mutex::new(rx),
            live: AtomicUsize::new(0),
            max: size,
        });

        let mut handles = Vec::with_capacity(size);
        for _ in 0..size {
            handles.push(Some(shared.spawn_worker()));
        }

        ThreadPool {
            handles,
            sender: tx,
            shared,
        }
    }

    /// Submits a job to run on one of the pool's worker threads.
    pub fn execute<F>(&self, f: F) -> Result<(), ThreadPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Message::NewJob(Box::new(f)))
            .map_err(|_| ThreadPoolError::SendError)
    }

    /// The configured pool capacity (the number of workers it maintains).
    pub fn cant_workers(&self) -> usize {
        self.shared.max
    }

    /// The number of workers currently alive. May momentarily dip below
    /// `cant_workers()` between a panic and its replacement spawning.
    pub fn cant_lives_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }
}

impl Drop for ThreadPool {
    /// Tells every worker to terminate, then joins them so no thread is
    /// left running after the pool goes out of scope.
    fn drop(&mut self) {
        for _ in 0..self.shared.max {
            let _ = self.sender.send(Message::Terminate);
        }

        for handle_opt in &mut self.handles {
            if let Some(handle) = handle_opt.take() {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.shared.max)
            .field("lives workers", &self.shared.live.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test01_thread_pool_creation() {
        let pool = ThreadPool::new(4);
        assert_eq!(pool.cant_workers(), 4);
    }

    #[test]
    fn test02_thread_pool_creation_with_zero_workers_default_one() {
        let pool = ThreadPool::new(0);
        assert_eq!(pool.cant_workers(), 1);
    }

    #[test]
    fn test03_execute_job() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(Mutex::new(0));

        let counter_clone = Arc::clone(&counter);

        pool.execute(move || {
            let mut count = counter_clone.lock().unwrap();
            *count += 1;
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));

        let count = counter.lock().unwrap();
        assert_eq!(*count, 1);
    }

    #[test]
    fn test04_execute_multiple_job1() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(Mutex::new(0));

        let counter_clone = Arc::clone(&counter);
        pool.execute(move || {
            let mut count = counter_clone.lock().unwrap();
            *count += 1;
        })
        .unwrap();

        let counter_clone = Arc::clone(&counter);
        pool.execute(move || {
            let mut count = counter_clone.lock().unwrap();
            *count += 1;
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));

        let count = counter.lock().unwrap();
        assert_eq!(*count, 2);
    }

    #[test]
    fn test05_execute_multiple_job2() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(Mutex::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                let mut count = counter.lock().unwrap();
                *count += 1;
            })
            .unwrap();
        }

        thread::sleep(Duration::from_millis(500));

        let count = counter.lock().unwrap();
        assert_eq!(*count, 10);
    }

    #[test]
    fn test06_worker_panic_handling() {
        let pool = ThreadPool::new(4);

        pool.execute(|| {
            panic!("This is a panic!");
        })
        .unwrap();
        thread::sleep(Duration::from_millis(100));
        pool.execute(|| println!("printing from the other thread"))
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.cant_workers(), 4);
        assert_eq!(pool.cant_lives_workers(), 4);
    }

    #[test]
    fn test07_worker_panic_does_not_affect_pool() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(Mutex::new(0));

        pool.execute(|| {
            panic!("This worker panicked");
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));

        let counter_clone = Arc::clone(&counter);
        pool.execute(move || {
            let mut count = counter_clone.lock().unwrap();
            *count += 1;
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));

        let count = counter.lock().unwrap();
        assert_eq!(pool.cant_workers(), 4);
        assert_eq!(pool.cant_lives_workers(), 4);
        assert_eq!(*count, 1);
    }

    #[test]
    fn test08_thread_pool_print_debug() {
        let pool = ThreadPool::new(4);
        let debug_str = format!("{pool:?}");
        assert_eq!(debug_str, "ThreadPool { workers: 4, lives workers: 4 }");
    }
}
