use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

use common::err::{UltError, UltResult};

use crate::db::handle::DbHandle;

type HandleFactory = Box<dyn Fn() -> UltResult<Box<dyn DbHandle>> + Send + Sync>;

struct PoolState {
    idle: Vec<Box<dyn DbHandle>>,
    created: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    condvar: Condvar,
    capacity: usize,
    factory: HandleFactory,
}

/// 固定容量的连接池。`take()` 借出 handle, lease drop 时归还。
/// 每个重放 worker 拿一个 lease, 一个事务用一条连接。
#[derive(Clone)]
pub struct DbHandlePool {
    shared: Arc<PoolShared>,
}

impl DbHandlePool {
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> UltResult<Box<dyn DbHandle>> + Send + Sync + 'static,
    {
        DbHandlePool {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    idle: vec![],
                    created: 0,
                }),
                condvar: Condvar::new(),
                capacity: capacity.max(1),
                factory: Box::new(factory),
            }),
        }
    }

    pub fn take(&self) -> UltResult<DbHandleLease> {
        let mut state = self.shared.state.lock().unwrap();

        loop {
            if let Some(handle) = state.idle.pop() {
                return Ok(DbHandleLease {
                    handle: Some(handle),
                    pool: Arc::clone(&self.shared),
                });
            }

            if state.created < self.shared.capacity {
                state.created += 1;
                drop(state);

                // 连接建立放在锁外
                let handle = match (self.shared.factory)() {
                    Ok(handle) => handle,
                    Err(e) => {
                        let mut state = self.shared.state.lock().unwrap();
                        state.created -= 1;
                        self.shared.condvar.notify_one();
                        return Err(UltError::Db(format!("cannot create database handle: {}", e)));
                    }
                };

                return Ok(DbHandleLease {
                    handle: Some(handle),
                    pool: Arc::clone(&self.shared),
                });
            }

            state = self.shared.condvar.wait(state).unwrap();
        }
    }
}

pub struct DbHandleLease {
    handle: Option<Box<dyn DbHandle>>,
    pool: Arc<PoolShared>,
}

impl Deref for DbHandleLease {
    type Target = Box<dyn DbHandle>;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref().expect("lease is live until drop")
    }
}

impl DerefMut for DbHandleLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle.as_mut().expect("lease is live until drop")
    }
}

impl Drop for DbHandleLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let mut state = self.pool.state.lock().unwrap();
            state.idle.push(handle);
        }
        self.pool.condvar.notify_one();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use common::err::UltResult;

    use crate::db::handle::DbHandle;

    use super::DbHandlePool;

    struct NullHandle;

    impl DbHandle for NullHandle {
        fn execute(&mut self, _query: &str) -> UltResult<()> {
            Ok(())
        }

        fn query_rows(&mut self, _query: &str) -> UltResult<Vec<Vec<String>>> {
            Ok(vec![])
        }

        fn consume_results(&mut self) -> UltResult<()> {
            Ok(())
        }

        fn set_autocommit(&mut self, _enabled: bool) -> UltResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_pool_reuses_handles() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);

        let pool = DbHandlePool::new(2, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullHandle) as Box<dyn DbHandle>)
        });

        {
            let mut lease = pool.take().unwrap();
            lease.execute("SELECT 1").unwrap();
        }
        {
            let _lease = pool.take().unwrap();
        }

        // 归还后复用, 不新建
        assert_eq!(created.load(Ordering::SeqCst), 1);

        let _a = pool.take().unwrap();
        let _b = pool.take().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
