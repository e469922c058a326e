//! SOCKS5 listener and per-connection session

use crate::protocol::{negotiate_auth, read_request, write_reply};
use crate::{Credentials, Reply, SocksError, TargetAddr};
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace};

/// Opens the outbound stream for an accepted CONNECT request
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Error: fmt::Display + Send + Sync + 'static;

    async fn dial(
        &self,
        credentials: &Credentials,
        target: &TargetAddr,
    ) -> Result<Self::Stream, Self::Error>;

    /// Reply code sent to the client when `dial` fails
    fn failure_reply(&self, _error: &Self::Error) -> Reply {
        Reply::GeneralFailure
    }
}

/// SOCKS5 server bound to a single listen address
pub struct SocksServer<D: Dialer> {
    bind_addr: String,
    dialer: Arc<D>,
}

impl<D: Dialer> SocksServer<D> {
    /// `bind_addr` is a `host:port` pair, resolved when binding
    pub fn new(bind_addr: impl Into<String>, dialer: Arc<D>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            dialer,
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub async fn bind(&self) -> Result<TcpListener, SocksError> {
        TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| SocksError::BindError {
                address: self.bind_addr.clone(),
                reason: e.to_string(),
            })
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self) -> Result<(), SocksError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), SocksError> {
        let addr = listener.local_addr()?;
        info!("SOCKS5 proxy listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New SOCKS connection from {}", peer_addr);
                    let dialer = self.dialer.clone();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, peer_addr, dialer).await
                        {
                            debug!("SOCKS session from {} ended: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept SOCKS connection: {}", e);
                }
            }
        }
    }

    /// Drive one client session to completion
    ///
    /// Returns the bytes copied client-to-target and target-to-client.
    pub async fn handle_connection<S>(
        mut client: S,
        peer_addr: SocketAddr,
        dialer: Arc<D>,
    ) -> Result<(u64, u64), SocksError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let credentials = negotiate_auth(&mut client).await?;
        let target = read_request(&mut client).await?;
        trace!(
            peer = %peer_addr,
            username = %credentials.username,
            target = %target,
            "CONNECT request"
        );

        let mut remote = match dialer.dial(&credentials, &target).await {
            Ok(remote) => remote,
            Err(e) => {
                let reply = dialer.failure_reply(&e);
                write_reply(&mut client, reply).await?;
                return Err(SocksError::DialFailed {
                    target: target.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        write_reply(&mut client, Reply::Succeeded).await?;

        let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut remote).await?;
        trace!(
            peer = %peer_addr,
            target = %target,
            sent,
            received,
            "SOCKS session closed"
        );
        Ok((sent, received))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    #[derive(Default)]
    struct EchoDialer {
        seen: Mutex<Vec<(Credentials, TargetAddr)>>,
        refuse: bool,
    }

    #[async_trait]
    impl Dialer for EchoDialer {
        type Stream = DuplexStream;
        type Error = String;

        async fn dial(
            &self,
            credentials: &Credentials,
            target: &TargetAddr,
        ) -> Result<DuplexStream, String> {
            self.seen
                .lock()
                .unwrap()
                .push((credentials.clone(), target.clone()));
            if self.refuse {
                return Err("refused".to_string());
            }
            let (near, mut far) = duplex(1024);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = far.read(&mut buf).await {
                    if n == 0 || far.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
            Ok(near)
        }

        fn failure_reply(&self, _error: &String) -> Reply {
            Reply::HostUnreachable
        }
    }

    async fn handshake(client: &mut DuplexStream) {
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        client
            .write_all(&[0x01, 4, b'j', b'u', b'm', b'p', 2, b'2', b'2'])
            .await
            .unwrap();
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 5, 0x01, 0xBB])
            .await
            .unwrap();
        let mut auth = [0u8; 4];
        client.read_exact(&mut auth).await.unwrap();
        assert_eq!(auth, [0x05, 0x02, 0x01, 0x00]);
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_session_relays_bytes() {
        let dialer = Arc::new(EchoDialer::default());
        let (mut client, server) = duplex(1024);
        let session = tokio::spawn(SocksServer::handle_connection(
            server,
            peer(),
            dialer.clone(),
        ));

        handshake(&mut client).await;
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], Reply::Succeeded as u8);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        let (sent, received) = session.await.unwrap().unwrap();
        assert_eq!((sent, received), (4, 4));

        let seen = dialer.seen.lock().unwrap();
        assert_eq!(seen[0].0.username, "jump");
        assert_eq!(seen[0].0.password, "22");
        assert_eq!(seen[0].1, TargetAddr::Ip("10.0.0.5:443".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_dial_failure_uses_dialer_reply() {
        let dialer = Arc::new(EchoDialer {
            refuse: true,
            ..Default::default()
        });
        let (mut client, server) = duplex(1024);
        let session = tokio::spawn(SocksServer::handle_connection(server, peer(), dialer));

        handshake(&mut client).await;
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], Reply::HostUnreachable as u8);

        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, SocksError::DialFailed { .. }));
    }

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let server = SocksServer::new("127.0.0.1:not-a-port", Arc::new(EchoDialer::default()));
        let err = server.bind().await.unwrap_err();
        match err {
            SocksError::BindError { address, .. } => assert_eq!(address, "127.0.0.1:not-a-port"),
            other => panic!("Expected BindError, got {:?}", other),
        }
    }
}
