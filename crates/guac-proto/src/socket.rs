//! Socket abstraction over which instructions are written.
//!
//! A [`GuacSocket`] is a write-only, thread-safe sink of protocol bytes.
//! Writers bracket each instruction with [`GuacSocket::instruction_begin`] /
//! [`GuacSocket::instruction_end`]; within that bracket the socket guarantees
//! that no bytes from any other producer interleave, which is what makes
//! fan-out and tee composition safe under multi-producer load.
//!
//! Lock order is session before user: a broadcast socket first takes its own
//! session-wide lock and only then the per-user socket locks. The per-user
//! instruction lock is reentrant so that a user-specific write nested inside
//! a broadcast bracket does not deadlock.

use crate::error::ProtocolError;
use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Number of buffered bytes after which completed instructions are flushed
/// to the underlying transport.
pub const SOCKET_OUTPUT_BUFFER_SIZE: usize = 8192;

/// Write-only protocol sink. All methods take `&self`; implementations are
/// internally synchronized.
pub trait GuacSocket: Send + Sync {
    /// Appends raw bytes to the current instruction.
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Flushes completed instructions to the transport.
    fn flush(&self) -> Result<(), ProtocolError>;

    /// Opens an atomic instruction bracket. Reentrant on the same thread.
    fn instruction_begin(&self);

    /// Closes the bracket opened by [`GuacSocket::instruction_begin`].
    fn instruction_end(&self);

    /// Marks the socket closed. Subsequent writes fail with
    /// [`ProtocolError::Closed`]; failures after close are silent at the
    /// call sites that require best-effort teardown writes.
    fn close(&self);
}

/// Reentrant lock guarding an instruction bracket. Thin wrapper so the raw
/// lock/unlock pair can span separate method calls, which a guard-returning
/// mutex cannot express.
pub struct InstructionLock {
    raw: RawReentrantMutex<parking_lot::RawMutex, parking_lot::RawThreadId>,
}

impl InstructionLock {
    pub fn new() -> Self {
        Self {
            raw: RawReentrantMutex::INIT,
        }
    }

    pub fn acquire(&self) {
        self.raw.lock();
    }

    pub fn release(&self) {
        // Safety: callers pair every release() with a prior acquire() on the
        // same thread, which is enforced by the begin/end discipline of
        // GuacSocket implementations.
        unsafe { self.raw.unlock() };
    }
}

impl Default for InstructionLock {
    fn default() -> Self {
        Self::new()
    }
}

struct Buffered<W> {
    out: W,
    /// Completed instructions awaiting a transport flush.
    queued: Vec<u8>,
    /// The instruction currently inside a begin/end bracket.
    pending: Vec<u8>,
    depth: usize,
    open: bool,
}

impl<W: Write> Buffered<W> {
    fn flush_queued(&mut self) -> Result<(), ProtocolError> {
        if !self.queued.is_empty() {
            let result = self
                .out
                .write_all(&self.queued)
                .and_then(|_| self.out.flush());
            self.queued.clear();
            if let Err(e) = result {
                self.open = false;
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// [`GuacSocket`] implementation over any `Write` transport (TCP streams,
/// recording files, in-memory test sinks). Instructions written inside a
/// begin/end bracket become visible to the transport only once the bracket
/// closes, so a partially-written instruction can never reach a reader.
pub struct BufferedSocket<W: Write + Send> {
    txn: InstructionLock,
    inner: Mutex<Buffered<W>>,
}

impl<W: Write + Send> BufferedSocket<W> {
    pub fn new(out: W) -> Self {
        Self {
            txn: InstructionLock::new(),
            inner: Mutex::new(Buffered {
                out,
                queued: Vec::with_capacity(SOCKET_OUTPUT_BUFFER_SIZE),
                pending: Vec::new(),
                depth: 0,
                open: true,
            }),
        }
    }

    /// Consumes the socket and returns the transport, flushing what remains.
    pub fn into_inner(self) -> W {
        let mut inner = self.inner.into_inner();
        let _ = inner.flush_queued();
        inner.out
    }
}

impl<W: Write + Send> GuacSocket for BufferedSocket<W> {
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(ProtocolError::Closed);
        }
        if inner.depth > 0 {
            inner.pending.extend_from_slice(data);
            return Ok(());
        }
        inner.queued.extend_from_slice(data);
        if inner.queued.len() >= SOCKET_OUTPUT_BUFFER_SIZE {
            inner.flush_queued()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(ProtocolError::Closed);
        }
        inner.flush_queued()
    }

    fn instruction_begin(&self) {
        self.txn.acquire();
        self.inner.lock().depth += 1;
    }

    fn instruction_end(&self) {
        {
            let mut inner = self.inner.lock();
            inner.depth = inner.depth.saturating_sub(1);
            if inner.depth == 0 && !inner.pending.is_empty() {
                let pending = std::mem::take(&mut inner.pending);
                inner.queued.extend_from_slice(&pending);
                inner.pending = pending;
                inner.pending.clear();
                if inner.queued.len() >= SOCKET_OUTPUT_BUFFER_SIZE && inner.open {
                    // Teardown writes are best effort; errors surface on the
                    // next explicit write or flush.
                    let _ = inner.flush_queued();
                }
            }
        }
        self.txn.release();
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        let _ = inner.flush_queued();
        inner.open = false;
    }
}

/// Socket which forks every write to a primary and a secondary socket, used
/// to tee session output into a recording file. Failures of the secondary
/// are logged and swallowed so a full recording disk cannot take down the
/// session itself.
pub struct TeeSocket {
    primary: Arc<dyn GuacSocket>,
    secondary: Arc<dyn GuacSocket>,
}

impl TeeSocket {
    pub fn new(primary: Arc<dyn GuacSocket>, secondary: Arc<dyn GuacSocket>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &Arc<dyn GuacSocket> {
        &self.primary
    }
}

impl GuacSocket for TeeSocket {
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        if let Err(e) = self.secondary.write(data) {
            debug!(target: "proto.socket", error = %e, "tee secondary write failed");
        }
        self.primary.write(data)
    }

    fn flush(&self) -> Result<(), ProtocolError> {
        if let Err(e) = self.secondary.flush() {
            debug!(target: "proto.socket", error = %e, "tee secondary flush failed");
        }
        self.primary.flush()
    }

    fn instruction_begin(&self) {
        self.primary.instruction_begin();
        self.secondary.instruction_begin();
    }

    fn instruction_end(&self) {
        self.secondary.instruction_end();
        self.primary.instruction_end();
    }

    fn close(&self) {
        self.secondary.close();
        self.primary.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Write sink shared with the test so buffered output can be inspected.
    #[derive(Clone, Default)]
    pub(crate) struct SharedSink(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn bracket_defers_bytes_until_end() {
        let sink = SharedSink::default();
        let socket = BufferedSocket::new(sink.clone());
        socket.instruction_begin();
        socket.write(b"4.sync,").unwrap();
        socket.flush().unwrap();
        assert!(sink.0.lock().is_empty());
        socket.write(b"1.0;").unwrap();
        socket.instruction_end();
        socket.flush().unwrap();
        assert_eq!(&*sink.0.lock(), b"4.sync,1.0;");
    }

    #[test]
    fn writes_fail_after_close() {
        let socket = BufferedSocket::new(std::io::sink());
        socket.close();
        assert!(matches!(
            socket.write(b"x"),
            Err(ProtocolError::Closed)
        ));
    }

    #[test]
    fn concurrent_brackets_never_interleave() {
        let sink = SharedSink::default();
        let socket = Arc::new(BufferedSocket::new(sink.clone()));
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for id in 0..4u8 {
            let socket = Arc::clone(&socket);
            let stop = Arc::clone(&stop);
            handles.push(std::thread::spawn(move || {
                let marker = [b'a' + id; 8];
                while !stop.load(Ordering::Relaxed) {
                    socket.instruction_begin();
                    for chunk in marker.chunks(2) {
                        socket.write(chunk).unwrap();
                    }
                    socket.write(b";").unwrap();
                    socket.instruction_end();
                }
            }));
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
        stop.store(true, Ordering::Relaxed);
        for handle in handles {
            handle.join().unwrap();
        }
        socket.flush().unwrap();

        let bytes = sink.0.lock();
        for instruction in bytes.split(|&b| b == b';') {
            if instruction.is_empty() {
                continue;
            }
            assert!(
                instruction.iter().all(|&b| b == instruction[0]),
                "interleaved instruction: {:?}",
                String::from_utf8_lossy(instruction)
            );
        }
    }

    #[test]
    fn tee_forks_writes() {
        let a = SharedSink::default();
        let b = SharedSink::default();
        let tee = TeeSocket::new(
            Arc::new(BufferedSocket::new(a.clone())),
            Arc::new(BufferedSocket::new(b.clone())),
        );
        tee.instruction_begin();
        tee.write(b"3.nop;").unwrap();
        tee.instruction_end();
        tee.flush().unwrap();
        assert_eq!(&*a.0.lock(), b"3.nop;");
        assert_eq!(&*b.0.lock(), b"3.nop;");
    }
}
