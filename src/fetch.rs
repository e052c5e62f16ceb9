//! Live certificate chain retrieval.
//!
//! The chain is fetched over an independent TLS connection so the engine can
//! compare what a direct connection observes with what the handshake under
//! validation was presented.

use crate::error::Error;

/// Fetch the certificate chain a host presents.
pub trait ChainFetcher: Send + Sync {
    /// Return the peer's chain, leaf first, in presentation order.
    ///
    /// Any failure yields an error; partial chains are never returned.
    fn fetch_chain(&self, hostname: &str) -> Result<Vec<Vec<u8>>, Error>;
}

#[cfg(feature = "fetch")]
pub use tls::TlsChainFetcher;

#[cfg(feature = "fetch")]
mod tls {
    use std::io;
    use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
    use tracing::debug;

    use super::ChainFetcher;
    use crate::config::EngineConfig;
    use crate::error::Error;

    /// Accepts whatever certificate the server presents.
    ///
    /// Trust is decided by the pinning engine, not by a root store. Handshake
    /// signatures are still checked so the peer must hold the leaf's key.
    #[derive(Debug)]
    struct AcceptAnyServerCert(Arc<CryptoProvider>);

    impl ServerCertVerifier for AcceptAnyServerCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    /// Time left before `deadline`, or `None` once it has passed.
    fn remaining(deadline: Instant) -> Option<Duration> {
        deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    /// [`ChainFetcher`] that performs a blocking TLS handshake with the host.
    ///
    /// Connecting and the handshake share one deadline of the configured
    /// timeout, however many addresses are tried or records received. Name
    /// resolution goes through the system resolver and is not bounded by it.
    pub struct TlsChainFetcher {
        tls: Arc<ClientConfig>,
        port: u16,
        timeout: Duration,
    }

    impl TlsChainFetcher {
        pub fn new(config: &EngineConfig) -> Result<Self, Error> {
            config.validate()?;
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let tls = ClientConfig::builder_with_provider(provider.clone())
                .with_safe_default_protocol_versions()?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
                .with_no_client_auth();
            Ok(Self {
                tls: Arc::new(tls),
                port: config.port,
                timeout: config.connect_timeout(),
            })
        }

        fn connect(&self, hostname: &str, deadline: Instant) -> io::Result<TcpStream> {
            let addrs: Vec<SocketAddr> = (hostname, self.port).to_socket_addrs()?.collect();
            let mut last_err =
                io::Error::new(io::ErrorKind::NotFound, "hostname resolved to no addresses");
            for addr in addrs {
                let Some(left) = remaining(deadline) else {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
                };
                match TcpStream::connect_timeout(&addr, left) {
                    Ok(sock) => return Ok(sock),
                    Err(e) => {
                        debug!(host = %hostname, addr = %addr, error = %e, "connect attempt failed");
                        last_err = e;
                    }
                }
            }
            Err(last_err)
        }

        fn handshake(
            &self,
            conn: &mut ClientConnection,
            sock: &mut TcpStream,
            deadline: Instant,
        ) -> Result<(), String> {
            let timed_out = || format!("timed out after {} ms", self.timeout.as_millis());
            let io_failure = |e: io::Error| match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => timed_out(),
                _ => e.to_string(),
            };

            while conn.is_handshaking() {
                let left = remaining(deadline).ok_or_else(timed_out)?;
                sock.set_read_timeout(Some(left)).map_err(io_failure)?;
                sock.set_write_timeout(Some(left)).map_err(io_failure)?;

                if conn.wants_write() {
                    conn.write_tls(sock).map_err(io_failure)?;
                } else if conn.wants_read() {
                    if conn.read_tls(sock).map_err(io_failure)? == 0 {
                        return Err("connection closed during handshake".to_string());
                    }
                    conn.process_new_packets().map_err(|e| e.to_string())?;
                } else {
                    return Err("handshake stalled".to_string());
                }
            }
            Ok(())
        }
    }

    impl ChainFetcher for TlsChainFetcher {
        fn fetch_chain(&self, hostname: &str) -> Result<Vec<Vec<u8>>, Error> {
            let server_name = ServerName::try_from(hostname)
                .map_err(|e| Error::ChainFetch(format!("Invalid server name {}: {}", hostname, e)))?
                .to_owned();

            let deadline = Instant::now() + self.timeout;
            let mut sock = self.connect(hostname, deadline).map_err(|e| {
                Error::ChainFetch(format!("Cannot connect to {}:{}: {}", hostname, self.port, e))
            })?;

            let mut conn = ClientConnection::new(Arc::clone(&self.tls), server_name)?;
            self.handshake(&mut conn, &mut sock, deadline).map_err(|e| {
                Error::ChainFetch(format!("TLS handshake with {} failed: {}", hostname, e))
            })?;

            let chain: Vec<Vec<u8>> = conn
                .peer_certificates()
                .unwrap_or_default()
                .iter()
                .map(|cert| cert.as_ref().to_vec())
                .collect();

            // Best effort, bounded by the write timeout left from the handshake
            conn.send_close_notify();
            while conn.wants_write() {
                if conn.write_tls(&mut sock).is_err() {
                    break;
                }
            }

            if chain.is_empty() {
                return Err(Error::ChainFetch(format!(
                    "No certificates presented by {}",
                    hostname
                )));
            }
            debug!(host = %hostname, length = chain.len(), "fetched certificate chain");
            Ok(chain)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write;
        use std::net::TcpListener;
        use std::thread;

        use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
        use rustls::{ServerConfig, ServerConnection};

        fn config_for_port(port: u16) -> EngineConfig {
            EngineConfig {
                connect_timeout_ms: 2000,
                port,
                ..EngineConfig::default()
            }
        }

        fn tls_server(chain: Vec<Vec<u8>>, key_der: Vec<u8>) -> (u16, thread::JoinHandle<()>) {
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let config = ServerConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .unwrap()
                .with_no_client_auth()
                .with_single_cert(
                    chain.into_iter().map(CertificateDer::from).collect(),
                    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
                )
                .unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();

            let handle = thread::spawn(move || {
                let (mut sock, _) = listener.accept().unwrap();
                let mut conn = ServerConnection::new(Arc::new(config)).unwrap();
                while conn.is_handshaking() {
                    if conn.complete_io(&mut sock).is_err() {
                        return;
                    }
                }
                let _ = conn.complete_io(&mut sock);
            });
            (port, handle)
        }

        #[test]
        fn test_fetches_presented_chain_in_order() {
            let leaf = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
            let issuer = rcgen::generate_simple_self_signed(vec!["issuer.test".to_string()]).unwrap();
            let leaf_der = leaf.cert.der().to_vec();
            let issuer_der = issuer.cert.der().to_vec();

            let (port, server) = tls_server(
                vec![leaf_der.clone(), issuer_der.clone()],
                leaf.key_pair.serialize_der(),
            );

            let fetcher = TlsChainFetcher::new(&config_for_port(port)).unwrap();
            let chain = fetcher.fetch_chain("localhost").unwrap();
            assert_eq!(chain, vec![leaf_der, issuer_der]);

            server.join().unwrap();
        }

        #[test]
        fn test_refused_connection_fails() {
            let port = {
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                listener.local_addr().unwrap().port()
            };
            let fetcher = TlsChainFetcher::new(&config_for_port(port)).unwrap();
            assert!(matches!(
                fetcher.fetch_chain("127.0.0.1"),
                Err(Error::ChainFetch(_))
            ));
        }

        #[test]
        fn test_non_tls_peer_fails() {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let server = thread::spawn(move || {
                let (mut sock, _) = listener.accept().unwrap();
                let _ = sock.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            });

            let fetcher = TlsChainFetcher::new(&config_for_port(port)).unwrap();
            assert!(matches!(
                fetcher.fetch_chain("127.0.0.1"),
                Err(Error::ChainFetch(_))
            ));
            server.join().unwrap();
        }

        #[test]
        fn test_slow_peer_bounded_by_deadline() {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let server = thread::spawn(move || {
                let (mut sock, _) = listener.accept().unwrap();
                // Header of a handshake record that is never completed,
                // then one body byte at a time
                if sock.write_all(&[0x16, 0x03, 0x03, 0x40, 0x00]).is_err() {
                    return;
                }
                for _ in 0..100 {
                    thread::sleep(Duration::from_millis(100));
                    if sock.write_all(&[0]).is_err() {
                        return;
                    }
                }
            });

            let fetcher = TlsChainFetcher::new(&EngineConfig {
                connect_timeout_ms: 500,
                port,
                ..EngineConfig::default()
            })
            .unwrap();
            let started = Instant::now();
            let result = fetcher.fetch_chain("127.0.0.1");
            let elapsed = started.elapsed();

            match result {
                Err(Error::ChainFetch(msg)) => assert!(msg.contains("timed out"), "{}", msg),
                other => panic!("unexpected: {:?}", other),
            }
            assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
            server.join().unwrap();
        }

        #[test]
        fn test_deadline_expired() {
            assert!(remaining(Instant::now()).is_none());
            assert!(remaining(Instant::now() + Duration::from_secs(5)).is_some());
        }

        #[test]
        fn test_invalid_config_rejected() {
            let config = EngineConfig {
                connect_timeout_ms: 0,
                ..EngineConfig::default()
            };
            assert!(matches!(
                TlsChainFetcher::new(&config),
                Err(Error::Config(_))
            ));
        }
    }
}
