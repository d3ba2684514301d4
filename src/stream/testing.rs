// In-memory transport double for connection and provider tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::stream::transport::{Connector, Outbound, TransportError, TransportEvent, TransportLink};

struct FakeLink {
    url: Url,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    sent: Vec<Outbound>,
}

/// Records every opened transport and lets tests drive its inbound side.
#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<Vec<FakeLink>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` handshakes fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Handshake attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully opened transports.
    pub fn opened(&self) -> usize {
        self.links.lock().len()
    }

    pub fn url(&self, index: usize) -> Url {
        self.links.lock()[index].url.clone()
    }

    /// Everything the manager has written to link `index` so far.
    pub fn sent(&self, index: usize) -> Vec<Outbound> {
        let mut links = self.links.lock();
        let link = &mut links[index];
        while let Ok(frame) = link.outbound.try_recv() {
            link.sent.push(frame);
        }
        link.sent.clone()
    }

    /// Text frames written to link `index`.
    pub fn sent_text(&self, index: usize) -> Vec<String> {
        self.sent(index)
            .into_iter()
            .filter_map(|f| match f {
                Outbound::Text(t) => Some(t),
                Outbound::Close { .. } => None,
            })
            .collect()
    }

    pub fn push_text(&self, index: usize, text: &str) {
        let _ = self.links.lock()[index]
            .inbound
            .send(TransportEvent::Text(text.to_string()));
    }

    pub fn push_error(&self, index: usize, error: &str) {
        let _ = self.links.lock()[index]
            .inbound
            .send(TransportEvent::Error(error.to_string()));
    }

    pub fn close(&self, index: usize, code: u16) {
        let _ = self.links.lock()[index].inbound.send(TransportEvent::Closed {
            code: Some(code),
            reason: "test".into(),
        });
    }
}

impl Connector for FakeConnector {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<TransportLink, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return async { Err(TransportError::Handshake("refused".into())) }.boxed();
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.links.lock().push(FakeLink {
            url,
            outbound: out_rx,
            inbound: in_tx,
            sent: Vec::new(),
        });

        async move {
            Ok(TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
