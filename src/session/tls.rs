//! TLS handshake interception and certificate capture
//!
//! The media stack hands every outbound TLS handshake to an installed
//! [`TlsHandshaker`]. [`CertificateRecorder`] performs the handshake and keeps
//! the first certificate seen per target host in a [`CertificateCache`]. The
//! cache is created when a scan starts and read by reporting once it ends.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::utils::lock;

/// Protocol versions a handshake may negotiate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "TLS 1.2"),
            TlsVersion::Tls13 => write!(f, "TLS 1.3"),
        }
    }
}

/// Peer certificate summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub thumbprint: String,
}

impl CertificateInfo {
    /// Remaining validity at `now`; negative once expired
    pub fn valid_for(&self, now: DateTime<Utc>) -> Duration {
        self.not_after - now
    }
}

/// Client side of a TLS stream owned by the media stack
#[async_trait]
pub trait TlsStream: Send {
    async fn authenticate_as_client(
        &mut self,
        target_host: &str,
        versions: &[TlsVersion],
    ) -> Result<()>;

    fn peer_certificate(&self) -> Option<CertificateInfo>;
}

/// Hook invoked for every outbound TLS handshake
#[async_trait]
pub trait TlsHandshaker: Send + Sync {
    async fn handshake(
        &self,
        stream: &mut dyn TlsStream,
        target_host: &str,
        versions: &[TlsVersion],
    ) -> Result<()>;
}

/// First certificate observed per host; append-only
#[derive(Debug, Default)]
pub struct CertificateCache {
    entries: Mutex<BTreeMap<String, CertificateInfo>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `certificate` unless `host` already has one. Returns true if stored.
    pub fn insert_if_absent(&self, host: &str, certificate: CertificateInfo) -> bool {
        let mut entries = lock(&self.entries);
        if entries.contains_key(host) {
            return false;
        }
        entries.insert(host.to_string(), certificate);
        true
    }

    #[cfg(test)]
    pub fn get(&self, host: &str) -> Option<CertificateInfo> {
        lock(&self.entries).get(host).cloned()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, CertificateInfo> {
        lock(&self.entries).clone()
    }

    /// Shortest remaining validity among the certificates of `hosts`
    pub fn min_valid_for<'a>(
        &self,
        hosts: impl IntoIterator<Item = &'a str>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let entries = lock(&self.entries);
        hosts
            .into_iter()
            .filter_map(|host| entries.get(host))
            .map(|cert| cert.valid_for(now))
            .min()
    }
}

/// Handshaker that records peer certificates into a cache
pub struct CertificateRecorder {
    cache: Arc<CertificateCache>,
}

impl CertificateRecorder {
    pub fn new(cache: Arc<CertificateCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TlsHandshaker for CertificateRecorder {
    async fn handshake(
        &self,
        stream: &mut dyn TlsStream,
        target_host: &str,
        versions: &[TlsVersion],
    ) -> Result<()> {
        stream.authenticate_as_client(target_host, versions).await?;

        if let Some(cert) = stream.peer_certificate() {
            if self.cache.insert_if_absent(target_host, cert.clone()) {
                info!(
                    host = target_host,
                    "TLS certificate subject: {}, issuer: {}, issued: {}, expiry: {}, thumbprint: {}",
                    cert.subject,
                    cert.issuer,
                    cert.not_before.format("%Y-%m-%dT%H:%M:%S"),
                    cert.not_after.format("%Y-%m-%dT%H:%M:%S"),
                    cert.thumbprint
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate(subject: &str, days: i64) -> CertificateInfo {
        let now = Utc::now();
        CertificateInfo {
            subject: subject.to_string(),
            issuer: "CN=Test CA".to_string(),
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(days),
            thumbprint: format!("{subject}-thumb"),
        }
    }

    struct FakeStream {
        cert: CertificateInfo,
        authenticated: bool,
        fail: bool,
    }

    #[async_trait]
    impl TlsStream for FakeStream {
        async fn authenticate_as_client(
            &mut self,
            _target_host: &str,
            _versions: &[TlsVersion],
        ) -> Result<()> {
            if self.fail {
                anyhow::bail!("handshake rejected");
            }
            self.authenticated = true;
            Ok(())
        }

        fn peer_certificate(&self) -> Option<CertificateInfo> {
            self.authenticated.then(|| self.cert.clone())
        }
    }

    #[test]
    fn test_first_write_wins() {
        let cache = CertificateCache::new();
        assert!(cache.insert_if_absent("relay.example.com", certificate("CN=first", 30)));
        assert!(!cache.insert_if_absent("relay.example.com", certificate("CN=second", 60)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("relay.example.com").unwrap().subject, "CN=first");
    }

    #[test]
    fn test_lookup_leaves_entries_in_place() {
        let cache = CertificateCache::new();
        cache.insert_if_absent("a", certificate("CN=a", 30));
        assert_eq!(cache.get("a").unwrap().subject, "CN=a");
        assert_eq!(cache.get("a").unwrap().subject, "CN=a");
        assert!(cache.get("b").is_none());
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_min_valid_for() {
        let cache = CertificateCache::new();
        cache.insert_if_absent("a", certificate("CN=a", 30));
        cache.insert_if_absent("b", certificate("CN=b", 10));
        let now = Utc::now();
        let min = cache.min_valid_for(["a", "b", "missing"], now).unwrap();
        assert!(min <= Duration::days(10) && min > Duration::days(9));
        assert!(cache.min_valid_for(["missing"], now).is_none());
    }

    #[test]
    fn test_concurrent_inserts_keep_one_entry() {
        let cache = Arc::new(CertificateCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.insert_if_absent("relay", certificate(&format!("CN={i}"), 30))
                })
            })
            .collect();
        let stored = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|stored| *stored)
            .count();
        assert_eq!(stored, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_recorder_captures_after_handshake() {
        let cache = Arc::new(CertificateCache::new());
        let recorder = CertificateRecorder::new(cache.clone());
        let mut stream = FakeStream {
            cert: certificate("CN=relay", 90),
            authenticated: false,
            fail: false,
        };

        recorder
            .handshake(&mut stream, "relay.example.com", &[TlsVersion::Tls12])
            .await
            .unwrap();
        assert!(cache.get("relay.example.com").is_some());
    }

    #[tokio::test]
    async fn test_recorder_propagates_handshake_failure() {
        let cache = Arc::new(CertificateCache::new());
        let recorder = CertificateRecorder::new(cache.clone());
        let mut stream = FakeStream {
            cert: certificate("CN=relay", 90),
            authenticated: false,
            fail: true,
        };

        let result = recorder
            .handshake(&mut stream, "relay.example.com", &[TlsVersion::Tls13])
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
