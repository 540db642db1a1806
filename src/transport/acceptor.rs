//! TCP accept loop.
//!
//! [`SocketAcceptor`] owns one listening socket. `start` spawns a task that accepts
//! connections and hands each one to a callback; after every wakeup it keeps accepting
//! connections that are already queued without yielding, so a burst of clients is picked
//! up in one pass.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use futures::FutureExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::error::{constants, ProtocolError, Result};

/// Accept errors that only affect the connection being accepted.
pub fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Listening socket plus its accept loop.
pub struct SocketAcceptor {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketAcceptor {
    /// Bind a listener on `addr`.
    #[instrument(skip(addr))]
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::from_listener(listener)
    }

    /// Wrap an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "Listening");
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting.
    ///
    /// `on_accepted` receives every new connection. `on_error` receives every accept
    /// error; errors scoped to one connection (see [`is_connection_error`]) keep the loop
    /// running, anything else stops it.
    ///
    /// # Errors
    /// `AlreadyStarted` if the acceptor was started before or has been stopped.
    pub fn start<A, E>(&self, on_accepted: A, on_error: E) -> Result<()>
    where
        A: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
        E: Fn(&io::Error) + Send + Sync + 'static,
    {
        let listener = self
            .listener
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ACCEPTOR_LOCK.into()))?
            .take()
            .ok_or(ProtocolError::AlreadyStarted)?;

        let cancel = self.cancel.clone();
        let span = tracing::info_span!("acceptor", address = %self.local_addr);
        let handle = tokio::spawn(
            accept_loop(listener, cancel, on_accepted, on_error).instrument(span),
        );

        *self
            .task
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_ACCEPTOR_LOCK.into()))? =
            Some(handle);
        Ok(())
    }

    /// Whether the accept loop is still running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
            && !self.cancel.is_cancelled()
    }

    /// Stop accepting and release the listener. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        if let Ok(mut listener) = self.listener.lock() {
            listener.take();
        }
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        info!(address = %self.local_addr, "Acceptor stopped");
    }
}

impl Drop for SocketAcceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Route one accept result to the callbacks. Returns whether the loop keeps accepting.
fn handle_accept<A, E>(
    result: io::Result<(TcpStream, SocketAddr)>,
    on_accepted: &A,
    on_error: &E,
) -> bool
where
    A: Fn(TcpStream, SocketAddr),
    E: Fn(&io::Error),
{
    match result {
        Ok((stream, peer)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }
            debug!(%peer, "Accepted connection");
            on_accepted(stream, peer);
            true
        }
        Err(e) if is_connection_error(&e) => {
            warn!(error = %e, "Accept failed for one connection");
            on_error(&e);
            true
        }
        Err(e) => {
            error!(error = %e, "Accept failed, stopping acceptor");
            on_error(&e);
            false
        }
    }
}

async fn accept_loop<A, E>(listener: TcpListener, cancel: CancellationToken, on_accepted: A, on_error: E)
where
    A: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
    E: Fn(&io::Error) + Send + Sync + 'static,
{
    'accept: loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = listener.accept() => result,
        };
        if !handle_accept(result, &on_accepted, &on_error) {
            break;
        }

        // drain whatever is already queued before yielding
        while let Some(result) = listener.accept().now_or_never() {
            if !handle_accept(result, &on_accepted, &on_error) {
                break 'accept;
            }
        }
    }
    debug!("Accept loop finished");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_double_start_rejected() {
        let acceptor = SocketAcceptor::bind("127.0.0.1:0").await.unwrap();
        acceptor.start(|_, _| {}, |_| {}).unwrap();
        assert!(matches!(
            acceptor.start(|_, _| {}, |_| {}),
            Err(ProtocolError::AlreadyStarted)
        ));
        acceptor.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let acceptor = SocketAcceptor::bind("127.0.0.1:0").await.unwrap();
        acceptor.start(|_, _| {}, |_| {}).unwrap();
        assert!(acceptor.is_running());
        acceptor.stop();
        acceptor.stop();
        assert!(!acceptor.is_running());
        assert!(matches!(
            acceptor.start(|_, _| {}, |_| {}),
            Err(ProtocolError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_accepts_burst() {
        let acceptor = SocketAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let seen = Arc::clone(&count);
        acceptor
            .start(
                move |stream, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(stream);
                },
                |_| {},
            )
            .unwrap();

        let mut clients = Vec::new();
        for _ in 0..8 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }
        for _ in 0..8 {
            rx.recv().await.unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_fatal_accept_error_halts() {
        let accepted = AtomicUsize::new(0);
        let errors = AtomicUsize::new(0);
        let on_accepted = |_: TcpStream, _: SocketAddr| {
            accepted.fetch_add(1, Ordering::SeqCst);
        };
        let on_error = |_: &io::Error| {
            errors.fetch_add(1, Ordering::SeqCst);
        };

        let keep_going = handle_accept(
            Err(io::Error::from(io::ErrorKind::ConnectionReset)),
            &on_accepted,
            &on_error,
        );
        assert!(keep_going);

        let keep_going = handle_accept(
            Err(io::Error::from(io::ErrorKind::PermissionDenied)),
            &on_accepted,
            &on_error,
        );
        assert!(!keep_going);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(accepted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(is_connection_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(!is_connection_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
