//! # Pool
//!
//! Bounded multiplexer of control connections. Callers borrow an idle
//! connection (opening a fresh one while capacity allows), use it for
//! exactly one command sequence at a time, and return it on drop. Broken
//! connections are filtered out on the consumer side and replaced.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::conn::{PersistentConn, SocketHandles};
use crate::types::{Config, FtpError, FtpResult};

pub(crate) struct Pool {
    config: Arc<Config>,
    endpoints: Vec<SocketAddr>,
    /// maximum number of live connections: connections_per_host × endpoints
    cap: usize,
    t0: Instant,
    inner: Mutex<PoolInner>,
    cond: Condvar,
}

struct PoolInner {
    idle: VecDeque<PersistentConn>,
    /// socket handles of every live connection, loaned ones included, for
    /// forced teardown
    handles: HashMap<usize, Arc<Mutex<SocketHandles>>>,
    open_count: usize,
    next_idx: usize,
    closed: bool,
}

impl Pool {
    pub(crate) fn new(config: Config, endpoints: Vec<SocketAddr>) -> Self {
        let cap = config.connections_per_host * endpoints.len();
        Self {
            config: Arc::new(config),
            endpoints,
            cap,
            t0: Instant::now(),
            inner: Mutex::new(PoolInner {
                idle: VecDeque::with_capacity(cap),
                handles: HashMap::new(),
                open_count: 0,
                next_idx: 0,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn single_endpoint(&self) -> bool {
        self.endpoints.len() == 1
    }

    /// Borrow an idle connection, opening a new one while under capacity,
    /// or blocking until one is returned. Broken entries found in the idle
    /// queue are discarded and their capacity reclaimed.
    pub(crate) fn acquire(&self) -> FtpResult<ConnGuard<'_>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(FtpError::ClientClosed);
            }

            while let Some(conn) = inner.idle.pop_front() {
                if conn.is_broken() {
                    self.debug(format_args!("#{} was ready (broken)", conn.idx()));
                    inner.open_count -= 1;
                    inner.handles.remove(&conn.idx());
                    conn.close();
                } else {
                    self.debug(format_args!("#{} was ready", conn.idx()));
                    return Ok(ConnGuard {
                        pool: self,
                        conn: Some(conn),
                    });
                }
            }

            if inner.open_count < self.cap {
                inner.open_count += 1;
                inner.next_idx += 1;
                let idx = inner.next_idx;
                drop(inner);

                match self.open_conn(idx) {
                    Ok(conn) => {
                        let mut inner = self.inner.lock();
                        if inner.closed {
                            inner.open_count -= 1;
                            drop(inner);
                            conn.close();
                            return Err(FtpError::ClientClosed);
                        }
                        inner.handles.insert(idx, conn.handles());
                        return Ok(ConnGuard {
                            pool: self,
                            conn: Some(conn),
                        });
                    }
                    Err(err) => {
                        self.debug(format_args!("#{idx} error connecting: {err}"));
                        self.inner.lock().open_count -= 1;
                        // the reservation is free again
                        self.cond.notify_one();
                        return Err(err);
                    }
                }
            }

            // at capacity: wait for a connection to be returned or discarded
            self.cond.wait(&mut inner);
        }
    }

    /// Return a loaned connection. Never blocks: queue capacity equals the
    /// maximum number of live connections. Returning a broken connection
    /// discards it instead.
    pub(crate) fn release(&self, conn: PersistentConn) {
        if conn.is_broken() {
            self.discard(conn);
            return;
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            inner.open_count -= 1;
            inner.handles.remove(&conn.idx());
            drop(inner);
            conn.close();
            return;
        }
        inner.idle.push_back(conn);
        drop(inner);
        self.cond.notify_one();
    }

    /// Remove a connection from the pool and close it.
    pub(crate) fn discard(&self, conn: PersistentConn) {
        self.debug(format_args!("#{} discarded", conn.idx()));
        let mut inner = self.inner.lock();
        inner.open_count -= 1;
        inner.handles.remove(&conn.idx());
        drop(inner);
        conn.close();
        // capacity freed
        self.cond.notify_one();
    }

    /// Tear the pool down: close idle connections and force-shutdown the
    /// sockets of loaned ones, interrupting transfers in progress. A second
    /// close is an error; blocked acquirers wake with `ClientClosed`.
    pub(crate) fn close(&self) -> FtpResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(FtpError::ClientClosed);
        }
        inner.closed = true;
        let idle: Vec<PersistentConn> = inner.idle.drain(..).collect();
        inner.open_count -= idle.len();
        for conn in &idle {
            inner.handles.remove(&conn.idx());
        }
        let handles: Vec<Arc<Mutex<SocketHandles>>> = inner.handles.drain().map(|(_, h)| h).collect();
        drop(inner);

        for conn in idle {
            conn.close();
        }
        for handle in handles {
            handle.lock().shutdown_all();
        }
        self.cond.notify_all();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn open_count(&self) -> usize {
        self.inner.lock().open_count
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Shut down every live socket without closing the pool. Simulates the
    /// server cutting all connections; only used to exercise resumption.
    #[cfg(test)]
    pub(crate) fn shutdown_sockets(&self) {
        let handles: Vec<Arc<Mutex<SocketHandles>>> =
            self.inner.lock().handles.values().cloned().collect();
        for handle in handles {
            handle.lock().shutdown_all();
        }
    }

    fn open_conn(&self, idx: usize) -> FtpResult<PersistentConn> {
        let addr = self.endpoints[idx % self.endpoints.len()];
        PersistentConn::open(idx, addr, Arc::clone(&self.config), self.t0)
    }

    /// Client-scoped debug line (no connection context).
    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        debug!("{args}");
        if let Some(logger) = &self.config.logger {
            let mut sink = logger.lock();
            let _ = writeln!(
                &mut *sink,
                "muxftp: {:.3} {}",
                self.t0.elapsed().as_secs_f64(),
                args
            );
        }
    }
}

/// Scoped loan of a connection. Deref gives the connection; dropping the
/// guard returns it to the pool (or discards it when broken), so every exit
/// path releases.
pub(crate) struct ConnGuard<'a> {
    pool: &'a Pool,
    conn: Option<PersistentConn>,
}

impl Deref for ConnGuard<'_> {
    type Target = PersistentConn;

    fn deref(&self) -> &PersistentConn {
        self.conn.as_ref().expect("connection guard already released")
    }
}

impl DerefMut for ConnGuard<'_> {
    fn deref_mut(&mut self) -> &mut PersistentConn {
        self.conn.as_mut().expect("connection guard already released")
    }
}

impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod test {

    use std::thread;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::hosts::lookup_hosts;
    use crate::test_server::StubServer;

    fn pool_for(server: &StubServer, connections_per_host: usize) -> Pool {
        let config = Config {
            connections_per_host,
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
        .normalized();
        let endpoints = lookup_hosts(&[server.addr().to_string()], false).unwrap();
        Pool::new(config, endpoints)
    }

    #[test]
    fn should_reuse_released_connections() {
        crate::log_init();
        let server = StubServer::start();
        let pool = pool_for(&server, 2);

        let first_idx = {
            let conn = pool.acquire().unwrap();
            conn.idx()
        };
        assert_eq!(pool.open_count(), 1);
        assert_eq!(pool.idle_count(), 1);

        let conn = pool.acquire().unwrap();
        assert_eq!(conn.idx(), first_idx);
        drop(conn);
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn should_discard_broken_connections_on_return() {
        crate::log_init();
        let server = StubServer::start();
        let pool = pool_for(&server, 2);

        {
            let mut conn = pool.acquire().unwrap();
            conn.set_broken();
        }
        assert_eq!(pool.open_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        // the pool opens a replacement on the next acquire
        let conn = pool.acquire().unwrap();
        assert!(!conn.is_broken());
        drop(conn);
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn should_block_at_capacity_until_release() {
        crate::log_init();
        let server = StubServer::start();
        let pool = Arc::new(pool_for(&server, 1));

        let held = pool.acquire().unwrap();
        assert_eq!(pool.open_count(), 1);

        let pool_t = Arc::clone(&pool);
        let waiter = thread::spawn(move || {
            let conn = pool_t.acquire().unwrap();
            conn.idx()
        });

        // give the waiter time to block, then hand the connection back
        thread::sleep(Duration::from_millis(100));
        drop(held);

        let idx = waiter.join().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(pool.open_count(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn should_refuse_acquire_after_close() {
        crate::log_init();
        let server = StubServer::start();
        let pool = pool_for(&server, 2);

        let conn = pool.acquire().unwrap();
        drop(conn);
        assert!(pool.close().is_ok());
        assert!(matches!(pool.close(), Err(FtpError::ClientClosed)));
        assert!(matches!(pool.acquire(), Err(FtpError::ClientClosed)));
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn should_wake_blocked_acquirers_on_close() {
        crate::log_init();
        let server = StubServer::start();
        let pool = Arc::new(pool_for(&server, 1));

        let held = pool.acquire().unwrap();
        let pool_t = Arc::clone(&pool);
        let waiter = thread::spawn(move || pool_t.acquire().map(|_| ()));

        thread::sleep(Duration::from_millis(100));
        pool.close().unwrap();

        assert!(matches!(waiter.join().unwrap(), Err(FtpError::ClientClosed)));
        drop(held);
        assert_eq!(pool.open_count(), 0);
    }
}
