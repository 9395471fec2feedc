//! Async (Tokio) transport for peerdrop listener and connector.
//!
//! `server` accepts connections and runs one receive session per
//! connection; `client` dials a peer and runs one send session.

use crate::error::{IoContext, Result, TransferError};
use crate::logger::Logger;
use crate::protocol_core::{copy_exact, Frame, SessionEnd};
use std::time::Instant;

pub mod server {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::protocol_core::{read_header, Decoded, OutputRoot};
    use std::future::Future;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;
    use tokio::fs::File;
    use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Semaphore;
    use tokio::task::JoinSet;
    use tokio::time::{sleep, Duration};
    use tracing::{debug, info, trace, warn};

    // Pause after a failed accept so fd exhaustion does not spin the loop
    const ACCEPT_BACKOFF_MS: u64 = 50;

    /// What a completed receive session produced
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionSummary {
        pub files: u64,
        pub bytes: u64,
        pub end: SessionEnd,
    }

    #[derive(Debug)]
    enum SessionState {
        AwaitingFrame,
        StreamingPayload(Frame),
        Complete(SessionEnd),
    }

    /// Decode frames from `stream` and materialize them under `root`
    /// until the peer sends `DONE` or closes between frames.
    ///
    /// Any error ends the session; files already completed stay on disk
    /// and a partially written file is left truncated.
    pub async fn receive_session<R>(
        stream: R,
        root: &OutputRoot,
        logger: &dyn Logger,
        peer: &str,
        buffer_size: usize,
    ) -> Result<SessionSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::with_capacity(buffer_size, stream);
        let mut buf = vec![0u8; buffer_size];
        let mut files = 0u64;
        let mut bytes = 0u64;
        let mut state = SessionState::AwaitingFrame;

        loop {
            trace!(peer, ?state, "receive state");
            state = match state {
                SessionState::AwaitingFrame => match read_header(&mut reader).await? {
                    Decoded::Frame(frame) => SessionState::StreamingPayload(frame),
                    Decoded::End(end) => SessionState::Complete(end),
                },
                SessionState::StreamingPayload(frame) => {
                    let written = receive_payload(&mut reader, root, &frame, &mut buf).await?;
                    files += 1;
                    bytes += written;
                    logger.file_received(peer, &frame.path, written);
                    SessionState::AwaitingFrame
                }
                SessionState::Complete(end) => {
                    debug!(peer, files, bytes, ?end, "receive session complete");
                    return Ok(SessionSummary { files, bytes, end });
                }
            };
        }
    }

    async fn receive_payload<R>(
        reader: &mut BufReader<R>,
        root: &OutputRoot,
        frame: &Frame,
        buf: &mut [u8],
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let dest = root.prepare_destination(&frame.path).await?;
        let mut file = File::create(&dest)
            .await
            .io_context(|| format!("create file {}", dest.display()))?;
        let write_context = format!("write {}", dest.display());
        let copied = copy_exact(
            reader,
            &mut file,
            frame.len,
            buf,
            "read payload",
            &write_context,
        )
        .await;
        // Close before anything else happens, success or failure
        let flushed = file.flush().await.io_context(|| write_context.clone());
        drop(file);

        let copied = copied?;
        flushed?;
        if copied < frame.len {
            return Err(TransferError::ShortPayload {
                path: frame.path.clone(),
                expected: frame.len,
                received: copied,
            });
        }
        Ok(copied)
    }

    /// Run one receive session on an accepted connection and report it.
    pub async fn handle_conn<S>(
        stream: S,
        root: &OutputRoot,
        logger: &dyn Logger,
        peer: &str,
        buffer_size: usize,
    ) -> Result<SessionSummary>
    where
        S: AsyncRead + Unpin,
    {
        logger.session_start(peer);
        let started = Instant::now();
        let result = receive_session(stream, root, logger, peer, buffer_size).await;
        match &result {
            Ok(summary) => logger.session_done(
                peer,
                summary.files,
                summary.bytes,
                started.elapsed().as_secs_f64(),
            ),
            Err(e) => {
                warn!(peer, error = %e, "receive session failed");
                logger.error(peer, e);
            }
        }
        result
    }

    /// Accept loop bound to a configured address and output root
    pub struct Listener {
        listener: TcpListener,
        root: OutputRoot,
        config: ListenerConfig,
        logger: Arc<dyn Logger>,
    }

    impl Listener {
        /// Prepare the output root and bind the listening socket.
        pub async fn bind(config: ListenerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
            let root = OutputRoot::prepare(&config.output_root).await?;
            let listener =
                TcpListener::bind(&config.bind)
                    .await
                    .map_err(|source| TransferError::Bind {
                        addr: config.bind.clone(),
                        source,
                    })?;
            info!(bind = %config.bind, root = %root.path().display(), "listener bound");
            Ok(Self {
                listener,
                root,
                config,
                logger,
            })
        }

        pub fn local_addr(&self) -> Result<SocketAddr> {
            self.listener
                .local_addr()
                .io_context(|| "listener address")
        }

        /// Canonical output root
        pub fn output_root(&self) -> &Path {
            self.root.path()
        }

        /// Accept connections forever.
        pub async fn serve(self) -> Result<()> {
            self.serve_until(std::future::pending()).await
        }

        /// Accept connections until `shutdown` resolves, then wait for
        /// in-flight sessions to finish.
        pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
        where
            F: Future<Output = ()>,
        {
            let limiter = self
                .config
                .max_sessions
                .map(|n| Arc::new(Semaphore::new(n)));
            let mut sessions = JoinSet::new();
            tokio::pin!(shutdown);

            loop {
                while let Some(done) = sessions.try_join_next() {
                    log_join(done);
                }
                tokio::select! {
                    _ = &mut shutdown => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            self.dispatch(&mut sessions, limiter.clone(), stream, peer);
                        }
                        Err(e) => {
                            let err = TransferError::Accept(e);
                            self.logger.error("listener", &err);
                            sleep(Duration::from_millis(ACCEPT_BACKOFF_MS)).await;
                        }
                    },
                }
            }

            debug!(in_flight = sessions.len(), "listener shutting down");
            while let Some(done) = sessions.join_next().await {
                log_join(done);
            }
            Ok(())
        }

        fn dispatch(
            &self,
            sessions: &mut JoinSet<()>,
            limiter: Option<Arc<Semaphore>>,
            stream: TcpStream,
            peer: SocketAddr,
        ) {
            let _ = stream.set_nodelay(true);
            let root = self.root.clone();
            let logger = Arc::clone(&self.logger);
            let buffer_size = self.config.buffer_size;
            debug!(%peer, "dispatching receive session");
            sessions.spawn(async move {
                // Bounded pool: wait for a free slot before touching the stream
                let _permit = match limiter {
                    Some(sem) => match sem.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                    None => None,
                };
                let peer = peer.to_string();
                let _ = handle_conn(stream, &root, logger.as_ref(), &peer, buffer_size).await;
            });
        }
    }

    fn log_join(done: std::result::Result<(), tokio::task::JoinError>) {
        if let Err(e) = done {
            warn!(error = %e, "receive session task aborted");
        }
    }
}

pub mod client {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::fs_enum::{enumerate_source, SourceFile};
    use crate::protocol_core::{write_header, write_terminator};
    use std::path::Path;
    use std::sync::Arc;
    use tokio::fs::File;
    use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
    use tokio::net::TcpStream;
    use tracing::{debug, info};

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SendSummary {
        pub files: u64,
        pub bytes: u64,
    }

    /// Stream `files` to `stream` as frames, then the `DONE` terminator.
    ///
    /// Stops at the first failure; nothing after the failing file is sent.
    pub async fn send_session<W>(
        stream: W,
        files: &[SourceFile],
        logger: &dyn Logger,
        peer: &str,
        buffer_size: usize,
    ) -> Result<SendSummary>
    where
        W: AsyncWrite + Unpin,
    {
        let mut writer = BufWriter::with_capacity(buffer_size, stream);
        let mut buf = vec![0u8; buffer_size];
        let mut summary = SendSummary::default();

        for file in files {
            let sent = match send_file(&mut writer, file, &mut buf).await {
                Ok(sent) => sent,
                Err(e) => {
                    // Frames already reported as sent still go out
                    let _ = writer.flush().await;
                    return Err(e);
                }
            };
            summary.files += 1;
            summary.bytes += sent;
            logger.file_sent(peer, &file.rel, sent);
        }

        write_terminator(&mut writer).await?;
        writer
            .shutdown()
            .await
            .io_context(|| "close connection")?;
        debug!(peer, files = summary.files, bytes = summary.bytes, "send session complete");
        Ok(summary)
    }

    async fn send_file<W>(writer: &mut W, file: &SourceFile, buf: &mut [u8]) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut src = File::open(&file.path)
            .await
            .io_context(|| format!("open {}", file.path.display()))?;
        // Length comes from the open handle so header and payload agree
        let len = src
            .metadata()
            .await
            .io_context(|| format!("stat {}", file.path.display()))?
            .len();
        let frame = Frame {
            path: file.rel.clone(),
            len,
        };
        write_header(writer, &frame).await?;

        let read_context = format!("read {}", file.path.display());
        let sent = copy_exact(&mut src, writer, len, buf, &read_context, "send payload").await?;
        if sent < len {
            // File shrank while being sent
            return Err(TransferError::ShortPayload {
                path: file.rel.clone(),
                expected: len,
                received: sent,
            });
        }
        Ok(sent)
    }

    /// Dials one peer per send
    pub struct Connector {
        config: ConnectorConfig,
        logger: Arc<dyn Logger>,
    }

    impl Connector {
        pub fn new(config: ConnectorConfig, logger: Arc<dyn Logger>) -> Self {
            Self { config, logger }
        }

        pub fn peer(&self) -> &str {
            &self.config.peer
        }

        /// Send a file, or every non-hidden file under a directory.
        pub async fn send(&self, source: &Path) -> Result<SendSummary> {
            let peer = self.config.peer.as_str();
            let started = Instant::now();
            let result = self.send_inner(source).await;
            match &result {
                Ok(summary) => self.logger.send_done(
                    peer,
                    summary.files,
                    summary.bytes,
                    started.elapsed().as_secs_f64(),
                ),
                Err(e) => self.logger.error(peer, e),
            }
            result
        }

        async fn send_inner(&self, source: &Path) -> Result<SendSummary> {
            let files = enumerate_source(source)?;
            info!(source = %source.display(), files = files.len(), peer = %self.config.peer, "sending");

            let stream = TcpStream::connect(&self.config.peer)
                .await
                .map_err(|source| TransferError::Connect {
                    addr: self.config.peer.clone(),
                    source,
                })?;
            let _ = stream.set_nodelay(true);
            send_session(
                stream,
                &files,
                self.logger.as_ref(),
                &self.config.peer,
                self.config.buffer_size,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::client::send_session;
    use super::server::{receive_session, SessionSummary};
    use super::*;
    use crate::error::ErrorCategory;
    use crate::fs_enum::enumerate_source;
    use crate::logger::NoopLogger;
    use crate::protocol_core::OutputRoot;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct RecordingLogger {
        received: Mutex<Vec<(String, u64)>>,
        sent: Mutex<Vec<(String, u64)>>,
        errors: Mutex<Vec<ErrorCategory>>,
    }

    impl Logger for RecordingLogger {
        fn file_received(&self, _peer: &str, rel: &str, bytes: u64) {
            self.received.lock().unwrap().push((rel.to_string(), bytes));
        }
        fn file_sent(&self, _peer: &str, rel: &str, bytes: u64) {
            self.sent.lock().unwrap().push((rel.to_string(), bytes));
        }
        fn error(&self, _peer: &str, err: &TransferError) {
            self.errors.lock().unwrap().push(err.category());
        }
    }

    async fn receive_bytes(bytes: &[u8], root: &OutputRoot) -> Result<SessionSummary> {
        receive_session(bytes, root, &NoopLogger, "test", 16).await
    }

    #[tokio::test]
    async fn concrete_two_file_scenario() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path().join("out")).await.unwrap();
        let logger = RecordingLogger::default();

        let wire: &[u8] = b"a.txt:2\nhisub/b.txt:0\nDONE\n";
        let summary = receive_session(wire, &root, &logger, "test", 16)
            .await
            .unwrap();

        assert_eq!(
            summary,
            SessionSummary {
                files: 2,
                bytes: 2,
                end: SessionEnd::Terminator
            }
        );
        assert_eq!(fs::read(root.path().join("a.txt")).unwrap(), b"hi");
        assert!(root.path().join("sub").is_dir());
        assert_eq!(fs::read(root.path().join("sub/b.txt")).unwrap().len(), 0);
        assert_eq!(
            *logger.received.lock().unwrap(),
            vec![("a.txt".to_string(), 2), ("sub/b.txt".to_string(), 0)]
        );
    }

    #[tokio::test]
    async fn bare_close_is_clean_completion() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path()).await.unwrap();
        let summary = receive_bytes(b"x.bin:3\n\x00\x01\x02", &root).await.unwrap();
        assert_eq!(summary.end, SessionEnd::Closed);
        assert_eq!(fs::read(root.path().join("x.bin")).unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn adjacent_payloads_do_not_bleed() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path()).await.unwrap();
        // Payloads that look like headers must stay payload
        let wire: &[u8] = b"one:8\nDONE\nx:1two:5\nab\ncdthree:1\n\n";
        let summary = receive_bytes(wire, &root).await.unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(fs::read(root.path().join("one")).unwrap(), b"DONE\nx:1");
        assert_eq!(fs::read(root.path().join("two")).unwrap(), b"ab\ncd");
        assert_eq!(fs::read(root.path().join("three")).unwrap(), b"\n");
    }

    #[tokio::test]
    async fn short_payload_fails_and_leaves_truncated_file() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path()).await.unwrap();
        let err = receive_bytes(b"big.bin:10\nabc", &root).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::ShortPayload {
                expected: 10,
                received: 3,
                ..
            }
        ));
        assert_eq!(fs::read(root.path().join("big.bin")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn malformed_headers_end_the_session() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path()).await.unwrap();

        let err = receive_bytes(b"ok.txt:1\nznocolon\nlater:1\nq", &root)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidMetadata { .. }));
        // Frame before the bad header completed; nothing after it was read
        assert_eq!(fs::read(root.path().join("ok.txt")).unwrap(), b"z");
        assert!(!root.path().join("later").exists());

        let err = receive_bytes(b"f.txt:abc\n", &root).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidLength { .. }));
        assert!(!root.path().join("f.txt").exists());
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path().join("out")).await.unwrap();
        let attempts: [&[u8]; 3] = [
            b"../evil.txt:4\nevil",
            b"/tmp/evil.txt:4\nevil",
            b"a/../../evil.txt:4\nevil",
        ];
        for wire in attempts {
            let err = receive_bytes(wire, &root).await.unwrap_err();
            assert_eq!(err.category(), ErrorCategory::PathTraversal);
        }
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn extra_separator_fails_the_session() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path()).await.unwrap();
        let err = receive_bytes(b"x:y:3\nabc", &root).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidMetadata { .. }));
        assert!(!root.path().join("x:y").exists());
        assert!(!root.path().join("x").exists());
    }

    #[tokio::test]
    async fn overwrites_existing_file() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path()).await.unwrap();
        fs::write(root.path().join("a.txt"), b"much longer old content").unwrap();
        receive_bytes(b"a.txt:3\nnew", &root).await.unwrap();
        assert_eq!(fs::read(root.path().join("a.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn send_session_writes_frames_and_terminator() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"hi").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.txt"), b"").unwrap();
        fs::write(src.path().join(".secret"), b"nope").unwrap();
        let files = enumerate_source(src.path()).unwrap();
        let logger = RecordingLogger::default();

        let mut wire = Vec::new();
        let summary = send_session(&mut wire, &files, &logger, "test", 1024)
            .await
            .unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 2);
        assert_eq!(wire, b"a.txt:2\nhisub/b.txt:0\nDONE\n");
        assert_eq!(logger.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_open_still_flushes_earlier_frames() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), b"hi").unwrap();
        let mut files = enumerate_source(src.path()).unwrap();
        files.push(crate::fs_enum::SourceFile {
            path: src.path().join("gone.txt"),
            rel: "gone.txt".into(),
        });
        let logger = RecordingLogger::default();

        let mut wire = Vec::new();
        let err = send_session(&mut wire, &files, &logger, "test", 1024)
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Io);
        assert_eq!(wire, b"a.txt:2\nhi");
        assert_eq!(logger.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_then_receive_over_duplex() {
        let src = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(src.path().join("blob.bin"), &payload).unwrap();
        fs::create_dir_all(src.path().join("x/y")).unwrap();
        fs::write(src.path().join("x/y/z.txt"), b"deep").unwrap();
        let files = enumerate_source(src.path()).unwrap();

        let dst = TempDir::new().unwrap();
        let root = OutputRoot::prepare(dst.path()).await.unwrap();

        // Small pipe forces many partial reads and writes
        let (tx, rx) = tokio::io::duplex(1024);
        let sender = async { send_session(tx, &files, &NoopLogger, "test", 4096).await };
        let receiver = async { receive_session(rx, &root, &NoopLogger, "test", 777).await };
        let (sent, received) = tokio::join!(sender, receiver);

        let sent = sent.unwrap();
        let received = received.unwrap();
        assert_eq!(sent.files, 2);
        assert_eq!(received.files, 2);
        assert_eq!(received.bytes, payload.len() as u64 + 4);
        assert_eq!(received.end, SessionEnd::Terminator);
        assert_eq!(fs::read(root.path().join("blob.bin")).unwrap(), payload);
        assert_eq!(fs::read(root.path().join("x/y/z.txt")).unwrap(), b"deep");
    }

    #[tokio::test]
    async fn receiver_failure_reports_error() {
        let tmp = TempDir::new().unwrap();
        let root = OutputRoot::prepare(tmp.path()).await.unwrap();
        let logger = RecordingLogger::default();

        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(b"a.txt:100\nonly-a-bit").await.unwrap();
        drop(tx);

        let res = server::handle_conn(rx, &root, &logger, "test", 64).await;
        assert!(res.is_err());
        assert_eq!(
            *logger.errors.lock().unwrap(),
            vec![ErrorCategory::ShortPayload]
        );
    }
}
