//! Orchestrates N chained subprocesses, tees the terminal stage's stdout
//! through an in-line MD5 accumulator into the response sink, and settles
//! on a [`PipelineState`] once every stage has exited *and* every byte of
//! its output has been forwarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::process_handle::ProcessHandle;

/// Per-run settlement value: whether the body was truncated, and — only
/// on the non-truncated path — the MD5 of every byte written to the
/// sink, as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub truncated: bool,
    pub checksum: Option<String>,
}

impl PipelineState {
    fn success(checksum: String) -> Self {
        Self {
            truncated: false,
            checksum: Some(checksum),
        }
    }

    fn failure() -> Self {
        Self {
            truncated: true,
            checksum: None,
        }
    }
}

/// The HTTP response body sink, borrowed by the engine for the duration
/// of `run` and never closed by it — only written to. `has_transport`
/// is false for tests that construct a sink without a real client, so
/// they skip the disconnect watchdog.
#[derive(Clone)]
pub struct ResponseSink {
    pub tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    pub has_transport: bool,
}

impl ResponseSink {
    pub fn new(tx: mpsc::Sender<Result<Bytes, std::io::Error>>) -> Self {
        Self {
            tx,
            has_transport: true,
        }
    }

    pub fn without_transport(tx: mpsc::Sender<Result<Bytes, std::io::Error>>) -> Self {
        Self {
            tx,
            has_transport: false,
        }
    }
}

/// Chains a [`PipelinePlan`](gateway_types::PipelinePlan)'s spawned
/// stages together and streams the terminal stage to a [`ResponseSink`].
pub struct PipelineEngine {
    stages: Vec<Arc<ProcessHandle>>,
    /// Filled in by the terminal-stage tee once it reaches EOF. Only
    /// consulted on the all-stages-succeeded path, after that tee task has
    /// itself been joined — process exit alone doesn't mean its stdout has
    /// been fully drained.
    digest: Arc<Mutex<Option<String>>>,
}

impl PipelineEngine {
    pub fn new(stages: Vec<ProcessHandle>) -> Self {
        Self::from_handles(stages.into_iter().map(Arc::new).collect())
    }

    /// As [`PipelineEngine::new`], but takes already-shared handles. Lets
    /// a caller keep its own `Vec<Arc<ProcessHandle>>` (e.g. for a
    /// disconnect grace timer) while handing the same handles to the
    /// engine.
    pub fn from_handles(stages: Vec<Arc<ProcessHandle>>) -> Self {
        Self {
            stages,
            digest: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs the pipeline to settlement. Returns exactly once, after every
    /// stage has exited and every byte it produced has been forwarded
    /// downstream (or to the sink, for the terminal stage) — the result
    /// is the return value rather than a callback or a field mutated out
    /// from under the caller.
    pub async fn run(self, sink: ResponseSink) -> PipelineState {
        let io_error = Arc::new(AtomicBool::new(false));

        // Outcome registration. A failed stage kills its immediate
        // successor; rejection reasons are logged here, and this same
        // join set is awaited jointly below for settlement.
        let mut stage_joins = Vec::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            let stage = Arc::clone(stage);
            let successor = self.stages.get(i + 1).cloned();
            stage_joins.push(tokio::spawn(async move {
                let result = stage.wait().await;
                match &result {
                    Ok(outcome) => {
                        tracing::debug!(stage = stage.title, ?outcome, "stage closed");
                    }
                    Err(err) => {
                        tracing::error!(stage = stage.title, %err, "stage failed");
                        if let Some(successor) = successor {
                            successor.kill();
                        }
                    }
                }
                result
            }));
        }

        // Sink watchdog. Fires only for sinks that claim a real transport;
        // kills the head stage, whose death cascades via stdin EOF through
        // the rest of the chain.
        if sink.has_transport {
            if let Some(head) = self.stages.first().cloned() {
                let watchdog_tx = sink.tx.clone();
                tokio::spawn(async move {
                    watchdog_tx.closed().await;
                    tracing::warn!("response sink closed; killing head stage");
                    head.kill();
                });
            }
        }

        // Deferred wiring, after yielding once to let the above tasks get
        // scheduled. If the destination is already gone, abort without
        // ever piping a byte.
        tokio::task::yield_now().await;
        let mut io_joins = Vec::new();
        if sink.tx.is_closed() {
            tracing::warn!("destination closed");
            for stage in &self.stages {
                stage.kill();
            }
        } else {
            io_joins = self.wire(&sink, &io_error);
        }

        // Settlement. A stage exiting tells us nothing about whether its
        // stdout has been fully drained, so every pipe/tee task spawned by
        // `wire` is joined here too, not just the process-exit futures —
        // otherwise the terminal tee can still be mid-flight (hashing and
        // forwarding the tail of a large payload) when this would
        // otherwise declare success with no checksum yet recorded.
        let mut all_ok = true;
        for join in stage_joins {
            match join.await {
                Ok(Ok(_outcome)) => {}
                Ok(Err(_stage_failure)) => all_ok = false,
                Err(_join_panic) => all_ok = false,
            }
        }
        for join in io_joins {
            if join.await.is_err() {
                all_ok = false;
            }
        }
        if io_error.load(Ordering::SeqCst) {
            all_ok = false;
        }

        if all_ok {
            match self.digest.lock().await.take() {
                Some(digest) => PipelineState::success(digest),
                None => PipelineState::failure(),
            }
        } else {
            PipelineState::failure()
        }
    }

    /// Pipes `stage[i].stdout → stage[i+1].stdin` for every non-terminal
    /// stage, and tees the terminal stage's stdout into both the MD5
    /// accumulator and the sink. The accumulator reads the exact same
    /// byte sequence handed to the sink, so no separate pass over the
    /// output is ever needed to compute it. Returns the join handle of
    /// every spawned task so the caller can wait for the pipes to drain,
    /// not just for the processes to exit.
    fn wire(&self, sink: &ResponseSink, io_error: &Arc<AtomicBool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut joins = Vec::with_capacity(self.stages.len());

        for i in 0..self.stages.len().saturating_sub(1) {
            let upstream = Arc::clone(&self.stages[i]);
            let downstream = Arc::clone(&self.stages[i + 1]);
            let io_error = Arc::clone(io_error);
            joins.push(tokio::spawn(async move {
                let Some(mut stdout) = upstream.take_stdout().await else {
                    return;
                };
                let Some(mut stdin) = downstream.take_stdin().await else {
                    return;
                };
                if let Err(e) = tokio::io::copy(&mut stdout, &mut stdin).await {
                    tracing::debug!(
                        from = upstream.title,
                        to = downstream.title,
                        error = %e,
                        "stage pipe ended"
                    );
                    io_error.store(true, Ordering::SeqCst);
                }
                let _ = stdin.shutdown().await;
            }));
        }

        let terminal = Arc::clone(self.stages.last().expect("plan has at least one stage"));
        let sink_tx = sink.tx.clone();
        let io_error = Arc::clone(io_error);
        let digest_slot = Arc::clone(&self.digest);
        joins.push(tokio::spawn(async move {
            let Some(mut stdout) = terminal.take_stdout().await else {
                return;
            };
            let mut hasher = Md5::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        hasher.update(&buf[..n]);
                        if sink_tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                            // Client gone; the sink watchdog will kill the
                            // head stage, which cascades to this one.
                            return;
                        }
                    }
                    Err(e) => {
                        io_error.store(true, Ordering::SeqCst);
                        let _ = sink_tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            *digest_slot.lock().await = Some(hex::encode(hasher.finalize()));
        }));

        joins
    }
}
