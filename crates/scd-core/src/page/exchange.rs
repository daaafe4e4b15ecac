//! Observed request/response pairs and their completion/resume plumbing.

use tokio::sync::{mpsc, oneshot};

/// Stream of exchanges delivered by an active hijack.
pub type ExchangeStream = mpsc::UnboundedReceiver<NetworkExchange>;

/// One request/response pair observed on a page session.
///
/// The body arrives through a completion signal; the resume gate tells the page
/// collaborator it may keep delivering the response to the page. Dropping the
/// exchange releases the gate as well, so an exchange can never stall the page.
#[derive(Debug)]
pub struct NetworkExchange {
    url: String,
    content_type: Option<String>,
    body: oneshot::Receiver<Vec<u8>>,
    resume: Option<oneshot::Sender<()>>,
}

/// Page-collaborator side of a pending exchange.
#[derive(Debug)]
pub struct ExchangeCompleter {
    body: oneshot::Sender<Vec<u8>>,
    gate: ResumeGate,
}

/// Resolves once the consumer resumed (or dropped) the exchange.
#[derive(Debug)]
pub struct ResumeGate {
    rx: oneshot::Receiver<()>,
    released: bool,
}

impl NetworkExchange {
    /// Exchange whose response body will be supplied later through the completer.
    pub fn pending(
        url: impl Into<String>,
        content_type: Option<String>,
    ) -> (Self, ExchangeCompleter) {
        let (body_tx, body_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        let exchange = Self {
            url: url.into(),
            content_type,
            body: body_rx,
            resume: Some(resume_tx),
        };
        let completer = ExchangeCompleter {
            body: body_tx,
            gate: ResumeGate {
                rx: resume_rx,
                released: false,
            },
        };
        (exchange, completer)
    }

    /// Exchange whose response already completed. Nobody waits on its gate.
    pub fn completed(
        url: impl Into<String>,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> Self {
        let (exchange, completer) = Self::pending(url, content_type);
        drop(completer.complete(body));
        exchange
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Let the page collaborator continue delivering the response.
    pub fn resume(&mut self) {
        if let Some(tx) = self.resume.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the response to complete. `None` when the collaborator dropped
    /// the exchange before a body arrived.
    pub async fn into_body(self) -> Option<Vec<u8>> {
        let NetworkExchange { body, resume, .. } = self;
        drop(resume);
        body.await.ok()
    }

    /// Like `into_body`, but borrows the exchange so the wait can be
    /// abandoned and restarted. Call at most once after it completed.
    pub async fn body(&mut self) -> Option<Vec<u8>> {
        (&mut self.body).await.ok()
    }
}

impl ExchangeCompleter {
    /// Deliver the response body. Returns the gate to wait on before the page
    /// may continue.
    pub fn complete(self, body: Vec<u8>) -> ResumeGate {
        let _ = self.body.send(body);
        self.gate
    }
}

impl ResumeGate {
    /// True once the exchange was resumed or dropped by its consumer.
    pub fn is_released(&mut self) -> bool {
        if !self.released {
            match self.rx.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => self.released = true,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.released
    }

    /// Block the current (non-async) thread until released.
    pub fn blocking_wait(self) {
        if !self.released {
            let _ = self.rx.blocking_recv();
        }
    }

    pub async fn wait(mut self) {
        if !self.is_released() {
            let _ = self.rx.await;
        }
    }
}
