//! Nested transactions and savepoints.
//!
//! Each connection owns one [`TransactionManager`]: a stack of frames. The
//! first frame opens a real transaction (`BEGIN`); every deeper frame opens
//! a savepoint with a process-unique name. Frames close strictly in LIFO
//! order, and closing anything but the top frame is a `ProtocolError` that
//! leaves the stack untouched.
//!
//! | frame | commit | rollback |
//! |---|---|---|
//! | root | `COMMIT` | `ROLLBACK` |
//! | savepoint | `RELEASE SAVEPOINT sp` | `ROLLBACK TO SAVEPOINT sp` then `RELEASE SAVEPOINT sp` |
//!
//! [`atomic`] is the scoped entry point: it opens a frame, runs a closure,
//! and commits on `Ok` or rolls back on `Err`.
//!
//! # Examples
//!
//! ```ignore
//! use tessera_db::transactions::atomic;
//!
//! atomic(&manager, |txn| async move {
//!     txn.execute_sql("INSERT INTO \"user\" (\"username\") VALUES (?)", &["ada".into()]).await?;
//!     txn.atomic(|inner| async move {
//!         inner.execute_sql("DELETE FROM \"tweet\"", &[]).await?;
//!         inner.rollback().await
//!     })
//!     .await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessera_core::{TesseraError, TesseraResult};
use tokio::sync::Mutex;
use tracing::{debug, warn, Instrument, Span};

use crate::executor::{Cursor, DatabaseBackendType, DbExecutor};
use crate::row::Row;
use crate::value::Value;

/// Counter for savepoint names, shared by every connection in the process.
static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Counter for connection ids.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a fresh connection id.
pub fn next_connection_id() -> u64 {
    CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn next_savepoint_name() -> String {
    let id = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sp_{id}")
}

/// Identifies one frame on one connection's stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHandle {
    connection_id: u64,
    frame_id: u64,
    depth: usize,
    savepoint: Option<String>,
}

impl FrameHandle {
    pub const fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub const fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// 1 for the root frame, 2 for the first savepoint, and so on.
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// The savepoint name, `None` for the root frame.
    pub fn savepoint(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }

    pub const fn is_root(&self) -> bool {
        self.savepoint.is_none()
    }
}

#[derive(Debug)]
struct Frame {
    id: u64,
    savepoint: Option<String>,
}

/// The transaction-frame stack of one connection.
pub struct TransactionManager {
    connection_id: u64,
    db: Arc<dyn DbExecutor>,
    frames: Mutex<Vec<Frame>>,
    next_frame: AtomicU64,
    span: Span,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("connection_id", &self.connection_id)
            .field("backend", &self.db.backend_type())
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a manager with a fresh connection id.
    pub fn new(db: Arc<dyn DbExecutor>) -> Self {
        Self::with_connection_id(db, next_connection_id())
    }

    pub fn with_connection_id(db: Arc<dyn DbExecutor>, connection_id: u64) -> Self {
        Self {
            connection_id,
            db,
            frames: Mutex::new(Vec::new()),
            next_frame: AtomicU64::new(1),
            span: tessera_core::logging::connection_span(connection_id),
        }
    }

    pub const fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// The span every statement on this connection runs under.
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// The executor statements run on.
    pub fn executor(&self) -> &Arc<dyn DbExecutor> {
        &self.db
    }

    /// Number of open frames.
    pub async fn depth(&self) -> usize {
        self.frames.lock().await.len()
    }

    pub async fn in_transaction(&self) -> bool {
        !self.frames.lock().await.is_empty()
    }

    /// Returns `true` while `handle`'s frame is on this connection's stack.
    pub async fn is_open(&self, handle: &FrameHandle) -> bool {
        handle.connection_id == self.connection_id
            && self
                .frames
                .lock()
                .await
                .iter()
                .any(|f| f.id == handle.frame_id)
    }

    /// The handle of the innermost open frame.
    pub async fn top(&self) -> Option<FrameHandle> {
        let frames = self.frames.lock().await;
        frames.last().map(|f| self.handle_for(f, frames.len()))
    }

    fn handle_for(&self, frame: &Frame, depth: usize) -> FrameHandle {
        FrameHandle {
            connection_id: self.connection_id,
            frame_id: frame.id,
            depth,
            savepoint: frame.savepoint.clone(),
        }
    }

    async fn run(&self, sql: &str, depth: usize) -> TesseraResult<()> {
        async {
            debug!(target: "tessera::sql", depth, "{sql}");
            self.db.execute_sql(sql, &[]).await.map(|_| ())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Pushes a frame: `BEGIN` at depth 0, a new savepoint otherwise.
    ///
    /// If the statement fails, nothing is pushed.
    pub async fn begin(&self) -> TesseraResult<FrameHandle> {
        let mut frames = self.frames.lock().await;
        let savepoint = if frames.is_empty() {
            self.run("BEGIN", 1).await?;
            None
        } else {
            let name = next_savepoint_name();
            self.run(&format!("SAVEPOINT {name}"), frames.len() + 1).await?;
            Some(name)
        };
        let frame = Frame {
            id: self.next_frame.fetch_add(1, Ordering::Relaxed),
            savepoint,
        };
        let handle = self.handle_for(&frame, frames.len() + 1);
        frames.push(frame);
        Ok(handle)
    }

    /// Fails with `ProtocolError` unless `handle` is the top frame.
    fn check_top(&self, frames: &[Frame], handle: &FrameHandle) -> TesseraResult<()> {
        if handle.connection_id != self.connection_id {
            return Err(TesseraError::ProtocolError(format!(
                "Frame belongs to connection {}, not {}",
                handle.connection_id, self.connection_id
            )));
        }
        match frames.last() {
            Some(top) if top.id == handle.frame_id => Ok(()),
            Some(top) if frames.iter().any(|f| f.id == handle.frame_id) => {
                Err(TesseraError::ProtocolError(format!(
                    "Frame {} at depth {} is not the innermost frame; frame {} must be closed first",
                    handle.frame_id, handle.depth, top.id
                )))
            }
            _ => Err(TesseraError::ProtocolError(format!(
                "Frame {} is not open on connection {}",
                handle.frame_id, self.connection_id
            ))),
        }
    }

    /// Commits the top frame: `COMMIT` for the root, `RELEASE SAVEPOINT`
    /// otherwise.
    ///
    /// A failed root `COMMIT` is followed by a best-effort `ROLLBACK` and
    /// the frame is popped. A failed `RELEASE` leaves the frame open.
    pub async fn commit(&self, handle: &FrameHandle) -> TesseraResult<()> {
        let mut frames = self.frames.lock().await;
        self.check_top(&frames, handle)?;
        let depth = frames.len();
        match &handle.savepoint {
            None => {
                let result = self.run("COMMIT", depth).await;
                if let Err(e) = &result {
                    warn!(connection = self.connection_id, error = %e, "COMMIT failed, rolling back");
                    if let Err(rb) = self.run("ROLLBACK", depth).await {
                        warn!(connection = self.connection_id, error = %rb, "ROLLBACK after failed COMMIT failed");
                    }
                }
                frames.pop();
                result
            }
            Some(name) => {
                self.run(&format!("RELEASE SAVEPOINT {name}"), depth).await?;
                frames.pop();
                Ok(())
            }
        }
    }

    /// Rolls back the top frame.
    ///
    /// The root frame issues `ROLLBACK`. A savepoint frame issues
    /// `ROLLBACK TO SAVEPOINT` and then `RELEASE SAVEPOINT`, undoing only its
    /// own changes. The frame is popped even if a statement fails.
    pub async fn rollback(&self, handle: &FrameHandle) -> TesseraResult<()> {
        let mut frames = self.frames.lock().await;
        self.check_top(&frames, handle)?;
        self.rollback_top(&mut frames).await
    }

    async fn rollback_top(&self, frames: &mut Vec<Frame>) -> TesseraResult<()> {
        let depth = frames.len();
        let Some(frame) = frames.pop() else {
            return Ok(());
        };
        match &frame.savepoint {
            None => self.run("ROLLBACK", depth).await,
            Some(name) => {
                self.run(&format!("ROLLBACK TO SAVEPOINT {name}"), depth)
                    .await?;
                self.run(&format!("RELEASE SAVEPOINT {name}"), depth).await
            }
        }
    }

    /// Rolls back every frame above `handle`, leaving `handle` on top.
    ///
    /// Returns how many frames were unwound. Does nothing if `handle` is
    /// not open.
    pub async fn unwind_to(&self, handle: &FrameHandle) -> usize {
        let mut frames = self.frames.lock().await;
        if handle.connection_id != self.connection_id
            || !frames.iter().any(|f| f.id == handle.frame_id)
        {
            return 0;
        }
        let mut unwound = 0;
        while frames.last().is_some_and(|top| top.id != handle.frame_id) {
            if let Err(e) = self.rollback_top(&mut frames).await {
                warn!(connection = self.connection_id, error = %e, "Failed to roll back a leaked frame");
            }
            unwound += 1;
        }
        unwound
    }
}

/// A scoped view of one open frame.
///
/// Statements run through a `Transaction` go to the connection; the frame
/// only decides where they commit or roll back to. Cloning yields another
/// view of the same frame.
#[derive(Clone)]
pub struct Transaction {
    manager: Arc<TransactionManager>,
    handle: FrameHandle,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub fn new(manager: Arc<TransactionManager>, handle: FrameHandle) -> Self {
        Self { manager, handle }
    }

    pub const fn handle(&self) -> &FrameHandle {
        &self.handle
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Commits this frame early. The enclosing scope then does nothing.
    pub async fn commit(&self) -> TesseraResult<()> {
        self.manager.commit(&self.handle).await
    }

    /// Rolls this frame back early. The enclosing scope then does nothing.
    pub async fn rollback(&self) -> TesseraResult<()> {
        self.manager.rollback(&self.handle).await
    }

    pub async fn is_open(&self) -> bool {
        self.manager.is_open(&self.handle).await
    }

    /// Opens a nested frame that the caller must close explicitly.
    pub async fn begin(&self) -> TesseraResult<Self> {
        let handle = self.manager.begin().await?;
        Ok(Self::new(Arc::clone(&self.manager), handle))
    }

    /// Runs `f` in a nested savepoint scope.
    pub async fn atomic<F, Fut, T>(&self, f: F) -> TesseraResult<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = TesseraResult<T>>,
    {
        atomic(&self.manager, f).await
    }
}

#[async_trait::async_trait]
impl DbExecutor for Transaction {
    fn backend_type(&self) -> DatabaseBackendType {
        self.manager.db.backend_type()
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TesseraResult<u64> {
        self.manager
            .db
            .execute_sql(sql, params)
            .instrument(self.manager.span.clone())
            .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> TesseraResult<Vec<Row>> {
        self.manager
            .db
            .query(sql, params)
            .instrument(self.manager.span.clone())
            .await
    }

    async fn query_one(&self, sql: &str, params: &[Value]) -> TesseraResult<Row> {
        self.manager
            .db
            .query_one(sql, params)
            .instrument(self.manager.span.clone())
            .await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TesseraResult<Value> {
        self.manager
            .db
            .insert_returning_id(sql, params)
            .instrument(self.manager.span.clone())
            .await
    }

    async fn cursor(&self, sql: &str, params: &[Value]) -> TesseraResult<Cursor> {
        self.manager
            .db
            .cursor(sql, params)
            .instrument(self.manager.span.clone())
            .await
    }
}

/// Runs `f` inside a new frame on `manager`'s stack.
///
/// - `Ok` with the frame still open: the frame commits (or releases).
/// - `Err`: the frame rolls back to its checkpoint and the error is
///   returned.
/// - The closure closed the frame itself: nothing more happens.
/// - Frames the closure left open above its own are rolled back first; on
///   the `Ok` path the scope then rolls back too and reports a
///   `ProtocolError`.
pub async fn atomic<F, Fut, T>(manager: &Arc<TransactionManager>, f: F) -> TesseraResult<T>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = TesseraResult<T>>,
{
    let span = manager.span.clone();
    run_atomic(manager, f).instrument(span).await
}

async fn run_atomic<F, Fut, T>(manager: &Arc<TransactionManager>, f: F) -> TesseraResult<T>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = TesseraResult<T>>,
{
    let handle = manager.begin().await?;
    let result = f(Transaction::new(Arc::clone(manager), handle.clone())).await;

    if !manager.is_open(&handle).await {
        return result;
    }

    let leaked = manager.unwind_to(&handle).await;
    match result {
        Ok(value) if leaked == 0 => {
            manager.commit(&handle).await?;
            Ok(value)
        }
        Ok(_) => {
            manager.rollback(&handle).await?;
            Err(TesseraError::ProtocolError(format!(
                "{leaked} frame(s) were left open inside an atomic block at depth {}",
                handle.depth
            )))
        }
        Err(e) => {
            if let Err(rb) = manager.rollback(&handle).await {
                warn!(connection = manager.connection_id, error = %rb, "Rollback after failed atomic block failed");
            }
            Err(e)
        }
    }
}
