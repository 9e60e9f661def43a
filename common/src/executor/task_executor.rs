use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct ExecutorState {
    is_running: bool,
    tasks: VecDeque<Task>,
}

struct ExecutorShared {
    state: Mutex<ExecutorState>,
    condvar: Condvar,
}

/// 固定大小的工作线程池。任务通过 `post` 进入 FIFO 队列，
/// 返回的 one-shot receiver 在任务完成后可取到结果。
pub struct TaskExecutor {
    shared: Arc<ExecutorShared>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskExecutor {
    pub fn new(size: usize) -> Self {
        let shared = Arc::new(ExecutorShared {
            state: Mutex::new(ExecutorState {
                is_running: true,
                tasks: VecDeque::new(),
            }),
            condvar: Condvar::new(),
        });

        let workers = (0..size.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || Self::worker_loop(shared))
            })
            .collect();

        TaskExecutor { shared, workers }
    }

    pub fn post<T, F>(&self, worker_fn: F) -> Receiver<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();

        {
            let mut state = self.shared.state.lock().unwrap();
            state.tasks.push_back(Box::new(move || {
                // receiver 可能已被丢弃，发送失败可以忽略
                let _ = sender.send(worker_fn());
            }));
        }
        self.shared.condvar.notify_one();

        receiver
    }

    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.is_running {
                return;
            }
            state.is_running = false;
        }
        self.shared.condvar.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    fn worker_loop(shared: Arc<ExecutorShared>) {
        loop {
            let task = {
                let mut state = shared.state.lock().unwrap();

                while state.tasks.is_empty() && state.is_running {
                    state = shared.condvar.wait(state).unwrap();
                }

                if state.tasks.is_empty() && !state.is_running {
                    return;
                }

                state.tasks.pop_front().unwrap()
            };

            task();
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::TaskExecutor;

    #[test]
    fn test_post_returns_result() {
        let executor = TaskExecutor::new(2);

        let receiver = executor.post(|| 21 * 2);
        assert_eq!(receiver.recv().unwrap(), 42);
    }

    #[test]
    fn test_runs_all_tasks() {
        let mut executor = TaskExecutor::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        let receivers: Vec<_> = (0..64)
            .map(|_| {
                let counter = Arc::clone(&counter);
                executor.post(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for receiver in receivers {
            receiver.recv().unwrap();
        }

        executor.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let mut executor = TaskExecutor::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            executor.post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        executor.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
