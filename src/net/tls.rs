//! TLS transport and node certificate.
//!
//! # Responsibilities
//! - Generate a self-signed certificate from the node's ed25519 key
//! - Build TLS 1.3 server and client configs (chain validation disabled)
//! - Dial peers over TCP then TLS, with optional SNI
//! - Accept inbound TLS, honouring an optional PROXY header
//!
//! Trust comes from the metadata exchange inside the tunnel, not the
//! certificate chain. The client still checks the handshake signature.

use std::net::SocketAddr;
use std::sync::Arc;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
    SerialNumber,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::{ErrorClass, LinkError};
use crate::identity::NodeIdentity;
use crate::link::registry::{LinkIdentity, LinkOptions, TransportKind};
use crate::link::url::PeerUrl;
use crate::link::LinkContext;
use crate::net::connection::LinkConn;
use crate::net::interface::{canonical_addr, is_link_local_unicast};
use crate::net::listener::{bind, Listener, ListenerRegistry};
use crate::net::proxy_protocol;
use crate::net::tcp::TcpTransport;

/// Self-signed certificate whose CN is the hex public key.
pub struct NodeCertificate {
    cert: CertificateDer<'static>,
    key: PrivatePkcs8KeyDer<'static>,
}

impl NodeCertificate {
    pub fn generate(identity: &NodeIdentity) -> Result<Self, LinkError> {
        let pkcs8 = identity
            .to_pkcs8_der()
            .map_err(|e| LinkError::Certificate(e.to_string()))?;
        let key_pair =
            KeyPair::try_from(pkcs8.as_slice()).map_err(|e| LinkError::Certificate(format!("key pair: {e}")))?;

        let mut params = CertificateParams::default();
        params.serial_number = Some(SerialNumber::from_slice(&[1]));
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, identity.public().to_hex());
        params.distinguished_name = dn;
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = never_expires()?;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.is_ca = IsCa::ExplicitNoCa;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| LinkError::Certificate(format!("self-sign: {e}")))?;

        Ok(Self {
            cert: cert.der().clone(),
            key: PrivatePkcs8KeyDer::from(pkcs8),
        })
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.cert
    }
}

impl std::fmt::Debug for NodeCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCertificate")
            .field("der_len", &self.cert.len())
            .finish_non_exhaustive()
    }
}

/// 9999-12-31 23:59:59 UTC, the conventional "no expiry" date.
fn never_expires() -> Result<OffsetDateTime, LinkError> {
    let date =
        Date::from_calendar_date(9999, Month::December, 31).map_err(|e| LinkError::Certificate(e.to_string()))?;
    let time = Time::from_hms(23, 59, 59).map_err(|e| LinkError::Certificate(e.to_string()))?;
    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

fn tls_err(e: rustls::Error) -> LinkError {
    LinkError::Tls(e.to_string())
}

fn server_config(cert: &NodeCertificate, provider: Arc<CryptoProvider>) -> Result<Arc<ServerConfig>, LinkError> {
    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_err)?
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.clone()], PrivateKeyDer::Pkcs8(cert.key.clone_key()))
        .map_err(tls_err)?;
    Ok(Arc::new(config))
}

fn client_config(provider: Arc<CryptoProvider>) -> Result<Arc<ClientConfig>, LinkError> {
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(tls_err)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipChainVerification(provider)))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Accepts any certificate but still checks handshake signatures.
#[derive(Debug)]
struct SkipChainVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipChainVerification {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[derive(Debug)]
pub struct TlsTransport {
    ctx: Arc<LinkContext>,
    tcp: Arc<TcpTransport>,
    certificate: NodeCertificate,
    server: Arc<ServerConfig>,
    client: Arc<ClientConfig>,
    listeners: ListenerRegistry,
}

impl TlsTransport {
    pub fn new(ctx: Arc<LinkContext>, tcp: Arc<TcpTransport>) -> Result<Self, LinkError> {
        let certificate = NodeCertificate::generate(ctx.identity())?;
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let server = server_config(&certificate, Arc::clone(&provider))?;
        let client = client_config(provider)?;
        Ok(Self {
            ctx,
            tcp,
            certificate,
            server,
            client,
            listeners: ListenerRegistry::new(TransportKind::Tls),
        })
    }

    pub fn certificate(&self) -> &NodeCertificate {
        &self.certificate
    }

    /// Dial `url` over TLS and hand the session to the link handler.
    ///
    /// SNI is sent only when `options.tls_sni` is set.
    pub async fn dial(&self, url: &PeerUrl, options: LinkOptions, sintf: &str) -> Result<(), LinkError> {
        let remote = url.resolve().await?;
        let reservation = self
            .ctx
            .reserve(LinkIdentity::for_remote(TransportKind::Tls, sintf, remote))?;
        let tcp = self.tcp.connect(remote, sintf).await?;
        let local = tcp.local_addr()?;

        let server_name = match &options.tls_sni {
            Some(sni) => ServerName::try_from(sni.clone()).map_err(|e| LinkError::Tls(format!("server name {sni}: {e}")))?,
            None => ServerName::IpAddress(remote.ip().into()),
        };
        let mut config = (*self.client).clone();
        config.enable_sni = options.tls_sni.is_some();

        let handshake = TlsConnector::from(Arc::new(config)).connect(server_name, tcp);
        let stream = tokio::time::timeout(self.ctx.settings().handshake_timeout, handshake)
            .await
            .map_err(|_| LinkError::Tls("handshake timed out".into()))?
            .map_err(|e| LinkError::Tls(e.to_string()))?;

        let conn = LinkConn::new(stream, local, remote);
        self.ctx.create(conn, url.display_name(), reservation, false, false, options);
        Ok(())
    }

    /// Bind `url` and accept TLS links until the listener is closed.
    ///
    /// `?proxyprotocol=true` on the URL expects a PROXY header before the TLS hello.
    pub async fn listen(&self, url: &PeerUrl, sintf: &str) -> Result<Listener, LinkError> {
        let listener = bind(url, sintf).await?;
        let proxy = url.proxy_protocol();
        if proxy {
            tracing::info!(url = %url.display_name(), "PROXY protocol enabled for TLS listener");
        }

        let ctx = Arc::clone(&self.ctx);
        let acceptor = TlsAcceptor::from(Arc::clone(&self.server));
        let sintf = sintf.to_string();
        self.listeners.spawn_accept_loop(listener, move |stream, remote| {
            let ctx = Arc::clone(&ctx);
            let acceptor = acceptor.clone();
            let sintf = sintf.clone();
            tokio::spawn(async move {
                if let Err(e) = accept(&ctx, acceptor, &sintf, stream, remote, proxy).await {
                    match e.class() {
                        ErrorClass::Duplicate => {}
                        _ => tracing::debug!(remote = %remote, error = %e, "Inbound TLS connection dropped"),
                    }
                }
            });
        })
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

async fn accept(
    ctx: &Arc<LinkContext>,
    acceptor: TlsAcceptor,
    sintf: &str,
    mut stream: TcpStream,
    mut remote: SocketAddr,
    proxy: bool,
) -> Result<(), LinkError> {
    let timeout = ctx.settings().handshake_timeout;
    if proxy {
        let header = tokio::time::timeout(timeout, proxy_protocol::read_header(&mut stream))
            .await
            .map_err(|_| LinkError::ProxyProtocol("timed out waiting for header".into()))??;
        if let Some(source) = header {
            remote = source;
        }
    }
    let remote = canonical_addr(remote);

    let reservation = ctx.reserve(LinkIdentity::for_remote(TransportKind::Tls, sintf, remote))?;
    let local = stream.local_addr()?;
    let stream = tokio::time::timeout(timeout, acceptor.accept(stream))
        .await
        .map_err(|_| LinkError::Tls("handshake timed out".into()))?
        .map_err(|e| LinkError::Tls(e.to_string()))?;

    // Link-local peers are on the same segment and bypass the allow-list.
    let forced = is_link_local_unicast(&remote.ip());
    let conn = LinkConn::new(stream, local, remote);
    ctx.create(conn, format!("tls://{remote}"), reservation, true, forced, LinkOptions::default());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    #[test]
    fn test_certificate_names_the_public_key() {
        let identity = NodeIdentity::generate();
        let cert = NodeCertificate::generate(&identity).unwrap();
        let (_, x509) = parse_x509_certificate(cert.der()).unwrap();

        let cn = x509.subject().iter_common_name().next().unwrap().as_str().unwrap();
        assert_eq!(cn, identity.public().to_hex());
        assert_eq!(x509.subject(), x509.issuer());
        assert_eq!(x509.raw_serial(), &[1]);
        assert_eq!(x509.validity().not_after.to_datetime().year(), 9999);
        assert_eq!(
            x509.public_key().subject_public_key.data.as_ref(),
            identity.public().as_bytes()
        );
    }

    #[test]
    fn test_certificate_is_self_signed() {
        let cert = NodeCertificate::generate(&NodeIdentity::generate()).unwrap();
        let (_, x509) = parse_x509_certificate(cert.der()).unwrap();
        assert!(x509.verify_signature(None).is_ok());
    }

    #[test]
    fn test_configs_are_tls13_only() {
        let cert = NodeCertificate::generate(&NodeIdentity::generate()).unwrap();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        assert!(server_config(&cert, Arc::clone(&provider)).is_ok());
        let client = client_config(provider).unwrap();
        assert!(client.enable_sni);
    }
}
