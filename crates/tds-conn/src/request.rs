//! Request delegate trait and the dispatcher's per-request bookkeeping.

use tds_wire::Packet;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// One logical client/server exchange over the connection.
///
/// The dispatcher drives the delegate: `start` when the request reaches
/// the head of the queue, `respond` for every inbound packet while the
/// request is active. `respond` must not block; every returned packet
/// sequence is written and flushed by the dispatcher.
pub trait Request: Send {
    /// Produce the initial outbound packet(s).
    fn start(&mut self) -> Result<Vec<Packet>>;

    /// Consume one inbound packet.
    ///
    /// `Ok(None)` signals the request is complete. A non-empty sequence
    /// whose first packet is the [`Packet::ssl_kickoff`] sentinel asks the
    /// dispatcher to install the TLS engine instead of writing anything.
    fn respond(&mut self, packet: Packet) -> Result<Option<Vec<Packet>>>;

    /// Short label used in log events.
    fn describe(&self) -> &'static str;
}

/// Queue entry wrapping a request delegate.
///
/// Consuming `finish`/`fail` makes the completion signal fire exactly
/// once by construction.
pub(crate) struct RequestContext {
    /// The request delegate.
    pub request: Box<dyn Request>,
    /// Error recorded while the request was active; failing the request
    /// on completion.
    pub last_error: Option<Error>,
    completion: oneshot::Sender<Result<()>>,
}

impl RequestContext {
    /// Wrap a delegate, returning the context and its completion side.
    pub fn new(request: Box<dyn Request>) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                last_error: None,
                completion: tx,
            },
            rx,
        )
    }

    /// Resolve the completion handle: failure if an error was recorded,
    /// success otherwise.
    pub fn finish(mut self) {
        let outcome = match self.last_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        };
        // The submitter may have dropped its handle; that is fine.
        let _ = self.completion.send(outcome);
    }

    /// Resolve the completion handle with `error`.
    pub fn fail(mut self, error: Error) {
        self.last_error = Some(error);
        self.finish();
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request.describe())
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Noop;

    impl Request for Noop {
        fn start(&mut self) -> Result<Vec<Packet>> {
            Ok(Vec::new())
        }

        fn respond(&mut self, _packet: Packet) -> Result<Option<Vec<Packet>>> {
            Ok(None)
        }

        fn describe(&self) -> &'static str {
            "noop"
        }
    }

    #[tokio::test]
    async fn finish_resolves_ok_without_error() {
        let (ctx, rx) = RequestContext::new(Box::new(Noop));
        ctx.finish();
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn recorded_error_fails_the_completion() {
        let (mut ctx, rx) = RequestContext::new(Box::new(Noop));
        ctx.last_error = Some(Error::Protocol("boom".into()));
        ctx.finish();
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn fail_overrides_with_given_error() {
        let (ctx, rx) = RequestContext::new(Box::new(Noop));
        ctx.fail(Error::ConnectionClosed);
        assert!(rx.await.unwrap().unwrap_err().is_closed());
    }
}
