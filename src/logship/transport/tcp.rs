//! Reference transport: newline-delimited writes over TCP, optionally
//! wrapped in TLS.

use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::logship::common::{Error, Result};
use crate::logship::config::HandlerConfig;
use crate::logship::transport::verifier::DangerousServerCertVerifier;
use crate::logship::transport::Transport;

enum Conn {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Unopened,
}

pub struct TcpTransport {
    config: HandlerConfig,
    socket_timeout: Duration,
    conn: Conn,
}

impl TcpTransport {
    pub fn new(config: HandlerConfig, socket_timeout_ms: u64) -> Self {
        TcpTransport {
            config,
            socket_timeout: Duration::from_millis(socket_timeout_ms),
            conn: Conn::Unopened,
        }
    }

    fn build_tls_config(&self) -> Result<ClientConfig> {
        if !self.config.ssl_verify {
            let builder = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousServerCertVerifier));
            return with_client_auth(builder, &self.config);
        }

        let mut roots = RootCertStore::empty();
        if let Some(ca_path) = &self.config.ca_certs {
            let file = std::fs::File::open(ca_path)?;
            let mut reader = BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?).map_err(|e| Error::transport(e.to_string()))?;
            }
        } else {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        with_client_auth(builder, &self.config)
    }

    async fn connect(&self) -> Result<Conn> {
        let stream = timeout(self.socket_timeout, TcpStream::connect(self.config.endpoint()))
            .await
            .map_err(|_| Error::timeout())??;

        if !self.config.ssl_enable {
            return Ok(Conn::Plain(stream));
        }

        let tls_config = self.build_tls_config()?;
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(self.config.host.clone())
            .map_err(|_| Error::transport("invalid server hostname for TLS SNI"))?;

        let tls_stream = timeout(self.socket_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| Error::timeout())??;

        Ok(Conn::Tls(Box::new(tls_stream)))
    }
}

fn load_client_identity(
    config: &HandlerConfig,
) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>> {
    match (&config.certfile, &config.keyfile) {
        (Some(cert_path), Some(key_path)) => {
            let cert_file = std::fs::File::open(cert_path)?;
            let certs: Vec<CertificateDer<'static>> =
                rustls_pemfile::certs(&mut BufReader::new(cert_file))
                    .collect::<std::result::Result<_, _>>()?;

            let key_file = std::fs::File::open(key_path)?;
            let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
                .ok_or_else(|| Error::transport("no private key found in keyfile"))?;

            Ok(Some((certs, key)))
        }
        _ => Ok(None),
    }
}

/// Finish a `ClientConfig` builder with client certificate auth if
/// `keyfile`/`certfile` are both set, otherwise with no client auth.
fn with_client_auth(
    builder: rustls::ConfigBuilder<ClientConfig, rustls::client::WantsClientCert>,
    config: &HandlerConfig,
) -> Result<ClientConfig> {
    match load_client_identity(config)? {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(Error::from),
        None => Ok(builder.with_no_client_auth()),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<()> {
        info!(endpoint = %self.config.endpoint(), tls = self.config.ssl_enable, "opening transport");
        self.conn = self.connect().await?;
        Ok(())
    }

    async fn send(&mut self, payloads: &[Bytes]) -> Result<()> {
        if matches!(self.conn, Conn::Unopened) {
            self.conn = self.connect().await?;
        }

        let result = match &mut self.conn {
            Conn::Plain(stream) => {
                timeout(self.socket_timeout, async {
                    for payload in payloads {
                        stream.write_all(payload).await?;
                        stream.write_all(b"\n").await?;
                    }
                    Ok(())
                })
                .await
            }
            Conn::Tls(stream) => {
                timeout(self.socket_timeout, async {
                    for payload in payloads {
                        stream.write_all(payload).await?;
                        stream.write_all(b"\n").await?;
                    }
                    Ok(())
                })
                .await
            }
            Conn::Unopened => unreachable!(),
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(?e, "write failed, will reconnect on next send");
                self.conn = Conn::Unopened;
                Err(Error::from(e))
            }
            Err(_) => {
                self.conn = Conn::Unopened;
                Err(Error::timeout())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match &mut self.conn {
            Conn::Plain(stream) => {
                let _ = stream.shutdown().await;
            }
            Conn::Tls(stream) => {
                let _ = stream.shutdown().await;
            }
            Conn::Unopened => {}
        }
        self.conn = Conn::Unopened;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn config(port: u16) -> HandlerConfig {
        HandlerConfig {
            host: "127.0.0.1".to_string(),
            port,
            database_path: None,
            transport: "tcp".to_string(),
            ssl_enable: false,
            ssl_verify: true,
            keyfile: None,
            certfile: None,
            ca_certs: None,
            enable: true,
            event_ttl_seconds: None,
            max_payload_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn sends_newline_framed_payload_over_plain_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let mut transport = TcpTransport::new(config(port), 5_000);
        transport.open().await.unwrap();
        transport
            .send(&[Bytes::from_static(b"hello world")])
            .await
            .unwrap();
        transport.close().await.unwrap();

        let got = server.await.unwrap();
        assert_eq!(got, b"hello world\n");
    }

    #[tokio::test]
    async fn sends_a_batch_as_one_write_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let mut transport = TcpTransport::new(config(port), 5_000);
        transport.open().await.unwrap();
        transport
            .send(&[Bytes::from_static(b"one"), Bytes::from_static(b"two")])
            .await
            .unwrap();
        transport.close().await.unwrap();

        let got = server.await.unwrap();
        assert_eq!(got, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn send_reconnects_after_a_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let accept_count2 = accept_count.clone();
        tokio::spawn(async move {
            loop {
                let (mut sock, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                accept_count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut buf = vec![0u8; 64];
                let _ = sock.read(&mut buf).await;
                // drop the socket immediately, forcing the client to reconnect next send
            }
        });

        let mut transport = TcpTransport::new(config(port), 5_000);
        transport.open().await.unwrap();
        let _ = transport.send(&[Bytes::from_static(b"first")]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = transport.send(&[Bytes::from_static(b"second")]).await;

        assert!(accept_count.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    }
}
