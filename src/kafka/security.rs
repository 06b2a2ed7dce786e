//! SASL/SCRAM over TLS for the Kafka writer.
//!
//! The CA pool is the root CA plus the intermediate CA, both PEM files whose
//! paths may reference environment variables (`$VAR` or `${VAR}`).

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rdkafka::ClientConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const SASL_MECHANISM: &str = "SCRAM-SHA-512";

pub struct SecureTransport {
    username: String,
    password: String,
    ca_pem: String,
}

impl fmt::Debug for SecureTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureTransport")
            .field("username", &self.username)
            .field("mechanism", &SASL_MECHANISM)
            .finish_non_exhaustive()
    }
}

impl SecureTransport {
    pub fn load(
        username: &str,
        password: &str,
        root_ca_path: &str,
        inter_ca_path: &str,
    ) -> Result<Self> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::Config(
                "SCRAM credentials must not be empty".to_string(),
            ));
        }

        let root = read_certificates(&expand_env(root_ca_path))?;
        let intermediate = read_certificates(&expand_env(inter_ca_path))?;

        info!(
            mechanism = SASL_MECHANISM,
            certificates = root.count + intermediate.count,
            "Loaded Kafka CA bundle"
        );

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            ca_pem: format!("{}\n{}", root.pem.trim_end(), intermediate.pem.trim_end()),
        })
    }

    pub fn apply(&self, client_config: &mut ClientConfig) {
        client_config
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanism", SASL_MECHANISM)
            .set("sasl.username", &self.username)
            .set("sasl.password", &self.password)
            .set("ssl.ca.pem", &self.ca_pem)
            .set("ssl.endpoint.identification.algorithm", "https");
    }
}

struct PemBundle {
    pem: String,
    count: usize,
}

fn read_certificates(path: &Path) -> Result<PemBundle> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to read CA certificate");
        Error::Tls {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    let count = count_certificates(&pem).map_err(|message| {
        error!(path = %path.display(), reason = %message, "Failed to parse CA certificate");
        Error::Tls {
            path: path.to_path_buf(),
            message,
        }
    })?;

    Ok(PemBundle { pem, count })
}

/// Validates every CERTIFICATE block and returns how many there are.
fn count_certificates(pem: &str) -> std::result::Result<usize, String> {
    let mut count = 0;
    let mut rest = pem;

    while let Some(start) = rest.find(PEM_BEGIN) {
        let body_start = start + PEM_BEGIN.len();
        let end = rest[body_start..]
            .find(PEM_END)
            .ok_or_else(|| format!("certificate {} has no END marker", count + 1))?;

        let body: String = rest[body_start..body_start + end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let der = STANDARD
            .decode(body.as_bytes())
            .map_err(|e| format!("certificate {} is not valid base64: {}", count + 1, e))?;
        // DER certificates are an ASN.1 SEQUENCE.
        if der.first() != Some(&0x30) {
            return Err(format!("certificate {} is not DER encoded", count + 1));
        }

        count += 1;
        rest = &rest[body_start + end + PEM_END.len()..];
    }

    if count == 0 {
        return Err("no PEM certificates found".to_string());
    }
    Ok(count)
}

/// Replaces `$VAR` and `${VAR}` with the variable's value, or nothing if unset.
pub fn expand_env(input: &str) -> PathBuf {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != '}').collect();
            name
        } else {
            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            name
        };

        if let Ok(value) = std::env::var(&name) {
            out.push_str(&value);
        }
    }

    PathBuf::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // Minimal DER SEQUENCE, base64 encoded.
    const FAKE_CERT: &str = "-----BEGIN CERTIFICATE-----\nMAMCAQE=\n-----END CERTIFICATE-----\n";

    #[test]
    fn test_load_builds_sasl_ssl_config() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ca.pem");
        let inter = dir.path().join("int.pem");
        fs::write(&root, FAKE_CERT).unwrap();
        fs::write(&inter, format!("{}{}", FAKE_CERT, FAKE_CERT)).unwrap();

        let transport = SecureTransport::load(
            "svc",
            "secret",
            root.to_str().unwrap(),
            inter.to_str().unwrap(),
        )
        .unwrap();

        let mut client_config = ClientConfig::new();
        transport.apply(&mut client_config);
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(client_config.get("sasl.username"), Some("svc"));
        let ca = client_config.get("ssl.ca.pem").unwrap();
        assert_eq!(ca.matches(PEM_BEGIN).count(), 3);
    }

    #[test]
    fn test_missing_certificate_is_tls_error() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ca.pem");
        fs::write(&root, FAKE_CERT).unwrap();
        let missing = dir.path().join("missing.pem");

        let err = SecureTransport::load(
            "svc",
            "secret",
            root.to_str().unwrap(),
            missing.to_str().unwrap(),
        )
        .unwrap_err();

        match err {
            Error::Tls { path, .. } => assert_eq!(path, missing),
            other => panic!("expected TLS error, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_certificate_is_rejected() {
        assert!(count_certificates("not a certificate").is_err());
        assert!(count_certificates(
            "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----"
        )
        .is_err());
        assert!(count_certificates("-----BEGIN CERTIFICATE-----\nMAMCAQE=\n").is_err());
        assert_eq!(count_certificates(FAKE_CERT), Ok(1));
    }

    #[test]
    fn test_expand_env() {
        std::env::set_var("FEED_PUBLISHER_TEST_CERT_DIR", "/etc/certs");

        assert_eq!(
            expand_env("$FEED_PUBLISHER_TEST_CERT_DIR/ca.pem"),
            PathBuf::from("/etc/certs/ca.pem")
        );
        assert_eq!(
            expand_env("${FEED_PUBLISHER_TEST_CERT_DIR}/int.pem"),
            PathBuf::from("/etc/certs/int.pem")
        );
        assert_eq!(
            expand_env("/opt/$FEED_PUBLISHER_TEST_UNSET_VAR/x"),
            PathBuf::from("/opt//x")
        );
        assert_eq!(expand_env("/plain/path"), PathBuf::from("/plain/path"));
    }
}
