//! Builds rumqttc connection options from a [`Config`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::topic::{STATUS_OFFLINE, Topics};
use crate::types::QoS;
use rumqttc::{LastWill, MqttOptions, TlsConfiguration, Transport};
use rustls::crypto::ring;
use rustls::{ClientConfig, RootCertStore};
use std::sync::{Arc, Once};
use std::time::Duration;
use tracing::debug;

/// Path of the MQTT endpoint on WebSocket transports.
pub const WEBSOCKET_PATH: &str = "/mqtt";

/// Client id used for a device.
///
/// The suffix tells this client apart from firmware using the same device.
pub fn client_id(device_id: &str) -> String {
    format!("vwire-rs-{}", device_id)
}

/// Broker address as handed to rumqttc.
///
/// WebSocket transports take a full URL, TCP transports a bare host.
pub fn broker_host(config: &Config) -> String {
    if config.use_websocket() {
        let scheme = if config.use_tls() { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, config.server, config.port, WEBSOCKET_PATH)
    } else {
        config.server.clone()
    }
}

/// Builds the MQTT options for a device session.
///
/// The auth token is both username and password. A retained offline status is
/// registered as last will so the dashboard notices dropped connections.
pub fn mqtt_options(config: &Config, auth_token: &str, topics: &Topics) -> Result<MqttOptions> {
    let mut opts = MqttOptions::new(
        client_id(topics.device_id()),
        broker_host(config),
        config.port,
    );
    opts.set_keep_alive(Duration::from_secs(config.keep_alive.max(1)));
    opts.set_clean_session(true);
    opts.set_credentials(auth_token, auth_token);
    opts.set_last_will(LastWill::new(
        topics.status(),
        STATUS_OFFLINE,
        QoS::AtLeastOnce.into(),
        true,
    ));
    opts.set_transport(transport(config)?);
    Ok(opts)
}

fn transport(config: &Config) -> Result<Transport> {
    if !config.use_tls() {
        return Ok(if config.use_websocket() {
            Transport::Ws
        } else {
            Transport::Tcp
        });
    }

    let tls = tls_configuration(config)?;
    Ok(if config.use_websocket() {
        Transport::Wss(tls)
    } else {
        Transport::Tls(tls)
    })
}

/// Installs ring as the process-wide rustls provider.
///
/// reqwest links ring and rumqttc links aws-lc-rs, so rustls cannot choose a
/// default on its own. An already installed provider is kept.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if ring::default_provider().install_default().is_err() {
            debug!("rustls crypto provider already installed");
        }
    });
}

fn tls_configuration(config: &Config) -> Result<TlsConfiguration> {
    install_crypto_provider();

    if !config.verify_tls {
        return Ok(TlsConfiguration::Rustls(Arc::new(insecure::client_config())));
    }

    let client_auth = match (&config.client_cert, &config.client_key) {
        (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
        (None, None) => None,
        _ => {
            return Err(Error::Tls(
                "client_cert and client_key must be set together".to_string(),
            ));
        }
    };

    match &config.ca_certs {
        Some(path) => Ok(TlsConfiguration::Simple {
            ca: std::fs::read(path)?,
            alpn: None,
            client_auth,
        }),
        None if client_auth.is_some() => Err(Error::Tls(
            "client certificates require ca_certs".to_string(),
        )),
        None => Ok(TlsConfiguration::Rustls(Arc::new(default_client_config()))),
    }
}

/// Verifies the broker against the bundled web PKI roots.
fn default_client_config() -> ClientConfig {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

mod insecure {
    //! Certificate verification disabled. Local testing only.

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, Error, SignatureScheme};
    use std::sync::Arc;

    #[derive(Debug)]
    pub(super) struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }

    pub(super) fn client_config() -> ClientConfig {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    }
}
