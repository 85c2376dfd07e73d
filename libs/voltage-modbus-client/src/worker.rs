//! Queue worker
//!
//! The only consumer of the request queue. Each iteration peeks at the
//! front entry, prepares the session, sends, receives, and asks the retry
//! controller what happens next. The entry is popped on finalization only,
//! so a retry reuses the same entry and transaction id.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Shared;
use crate::constants::{CONNECT_RETRY_BACKOFF, POLL_INTERVAL, RESPONSE_BUFFER_SIZE};
use crate::error::{ModbusError, TransportResult};
use crate::frame::{build_frame, format_hex, frame_complete, validate_response};
use crate::message::ModbusMessage;
use crate::queue::RequestEntry;
use crate::retry::{Attempt, Decision, RetryController};
use crate::session::SessionManager;
use crate::transport::Transport;

pub(crate) struct Worker {
    shared: Arc<Shared>,
    transport: Box<dyn Transport>,
    session: SessionManager,
    retry: RetryController,
    shutdown: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        transport: Box<dyn Transport>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared,
            transport,
            session: SessionManager::new(),
            retry: RetryController::default(),
            shutdown,
        }
    }

    /// Run until shutdown is signalled
    pub(crate) async fn run(mut self) {
        info!("Modbus TCP worker started");
        let shutdown = self.shutdown.clone();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let Some(entry) = self.shared.queue.peek_front() else {
                tokio::select! {
                    _ = shutdown.cancelled() => {},
                    _ = sleep(POLL_INTERVAL) => {},
                }
                continue;
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("In-flight request dropped: token={}", entry.token);
                    break;
                },
                _ = self.process(&entry) => {},
            }
        }

        let discarded = self.shared.queue.clear();
        self.session.close(self.transport.as_mut()).await;
        info!("Modbus TCP worker stopped ({} queued requests discarded)", discarded);
    }

    /// One attempt on the front entry
    async fn process(&mut self, entry: &Arc<RequestEntry>) {
        debug!(
            "Got request: token={}, trans_id={:04X}, target={}",
            entry.token,
            entry.transaction_id(),
            entry.target
        );

        let connected = self
            .session
            .prepare(self.transport.as_mut(), &entry.target)
            .await;

        let attempt = if connected {
            self.retry.sending();
            match self.send(entry).await {
                Ok(()) => {
                    self.retry.awaiting_response();
                    Attempt::Response(self.receive(entry).await)
                },
                Err(e) => {
                    warn!("Send failed: {}", e);
                    Attempt::ConnectFailed
                },
            }
        } else {
            Attempt::ConnectFailed
        };

        match self.retry.decide(&entry.message, attempt) {
            Decision::Retry { reconnect } => {
                if reconnect {
                    self.session.close(self.transport.as_mut()).await;
                    sleep(CONNECT_RETRY_BACKOFF).await;
                }
            },
            Decision::Finalize(response) => self.finalize(entry, response),
        }

        self.session.mark_attempt();
    }

    /// Header and message go out in one write
    async fn send(&mut self, entry: &RequestEntry) -> TransportResult<()> {
        let frame = build_frame(&entry.header, &entry.message);
        debug!("TX: {}", format_hex(&frame));
        self.transport.write_all(&frame).await?;
        self.transport.flush().await
    }

    /// Collect the response frame
    ///
    /// Reads until the frame announced by the header is complete, the
    /// buffer is full, or no byte has arrived for the target timeout.
    async fn receive(&mut self, entry: &RequestEntry) -> ModbusMessage {
        let timeout = entry.target.timeout();
        let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
        let mut len = 0;
        let mut last_progress = Instant::now();

        loop {
            match self.transport.try_read(&mut buf[len..]) {
                Ok(0) => {},
                Ok(n) => {
                    len += n;
                    last_progress = Instant::now();
                    if len >= buf.len() || frame_complete(&buf[..len]) {
                        break;
                    }
                    continue;
                },
                Err(e) => {
                    warn!("RX aborted: {}", e);
                    break;
                },
            }
            if last_progress.elapsed() >= timeout {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }

        if len == 0 {
            debug!(
                "Response timeout: trans_id={:04X}, {}ms",
                entry.transaction_id(),
                entry.target.timeout_ms
            );
            return ModbusMessage::error_for(
                entry.message.server_id(),
                entry.message.function_code(),
                ModbusError::Timeout,
            );
        }

        debug!("RX: {}", format_hex(&buf[..len]));
        validate_response(&entry.header, &entry.message, &buf[..len])
    }

    fn finalize(&mut self, entry: &Arc<RequestEntry>, response: ModbusMessage) {
        self.session.finalize(&entry.target);
        self.retry.reset();

        // cleared while in flight: the outcome belongs to nobody
        if !self.shared.queue.pop_if_front(entry) {
            debug!("Entry already discarded: token={}", entry.token);
            return;
        }

        let error = response.error();
        if !error.is_success() {
            self.shared.errors.fetch_add(1, Ordering::Relaxed);
            debug!("Request failed: token={}, error={}", entry.token, error);
        }
        self.shared.dispatcher.dispatch(entry, response);
    }
}
