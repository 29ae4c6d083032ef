//! CLI arguments, per-host configuration, and the SIGHUP-reloadable host
//! table.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use p256::ecdsa::SigningKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-tenant AT Protocol Personal Data Server")]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    #[arg(long, env = "PDS_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Address the metrics/health endpoint binds to.
    #[arg(long, env = "PDS_METRICS_LISTEN", default_value = "0.0.0.0:3001")]
    pub metrics_listen: String,

    /// Directory holding the sled database and blob object store.
    #[arg(long, env = "PDS_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// YAML file describing the hosts this instance serves.
    #[arg(long, env = "PDS_HOST_CONFIG", default_value = "./hosts.yaml")]
    pub host_config: PathBuf,

    #[arg(long, env = "PDS_READ_TIMEOUT_SECS", default_value_t = 10)]
    pub read_timeout_secs: u64,

    #[arg(long, env = "PDS_WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// did:plc directory base URL, used to resolve foreign callers' DID documents.
    #[arg(long, env = "PDS_PLC_URL", default_value = "https://plc.directory")]
    pub plc_url: Url,

    /// Default appview service DID the proxy falls back to when a request
    /// carries no `atproto-proxy` header.
    #[arg(long, env = "PDS_APPVIEW")]
    pub appview: Vec<String>,
}

/// One host this instance is authoritative for.
///
/// `signing_key` signs session JWTs (ES256) and backs this host's
/// `did:web`/service-proxying identity. Each actor's repo signing key is
/// independent (secp256k1, minted fresh at `createAccount`).
#[derive(Clone)]
pub struct HostConfig {
    pub hostname: String,
    pub service_did: String,
    pub signing_key: Arc<SigningKey>,
    pub user_domains: Vec<String>,
    pub contact_email: Option<String>,
    pub policy_url: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct RawHostConfig {
    hostname: String,
    service_did: String,
    /// PEM-encoded PKCS#8 P-256 private key.
    signing_key_pem: String,
    user_domains: Vec<String>,
    #[serde(default)]
    contact_email: Option<String>,
    #[serde(default)]
    policy_url: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct RawHostsFile {
    hosts: Vec<RawHostConfig>,
}

fn parse_host(raw: RawHostConfig) -> miette::Result<HostConfig> {
    use p256::pkcs8::DecodePrivateKey;
    let signing_key = SigningKey::from_pkcs8_pem(&raw.signing_key_pem)
        .map_err(|e| miette::miette!("invalid signing key for host {}: {e}", raw.hostname))?;
    Ok(HostConfig {
        hostname: raw.hostname,
        service_did: raw.service_did,
        signing_key: Arc::new(signing_key),
        user_domains: raw.user_domains,
        contact_email: raw.contact_email,
        policy_url: raw.policy_url,
    })
}

/// Hostname-indexed set of [`HostConfig`]s, hot-swappable on SIGHUP.
pub struct HostTable {
    inner: RwLock<Arc<BTreeMap<String, HostConfig>>>,
}

impl HostTable {
    pub fn load(path: &std::path::Path) -> miette::Result<Self> {
        let map = Self::read(path)?;
        Ok(Self {
            inner: RwLock::new(Arc::new(map)),
        })
    }

    fn read(path: &std::path::Path) -> miette::Result<BTreeMap<String, HostConfig>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| miette::miette!("reading host config {}: {e}", path.display()))?;
        let raw: RawHostsFile = serde_yaml::from_str(&text)
            .map_err(|e| miette::miette!("parsing host config {}: {e}", path.display()))?;
        let mut map = BTreeMap::new();
        for host in raw.hosts {
            let hostname = host.hostname.clone();
            map.insert(hostname, parse_host(host)?);
        }
        Ok(map)
    }

    /// Atomically replace the table with a freshly re-read file. Malformed
    /// config is logged and the previous table is kept in place.
    pub async fn reload(&self, path: &std::path::Path) {
        match Self::read(path) {
            Ok(map) => {
                *self.inner.write().await = Arc::new(map);
                tracing::info!("host config reloaded");
            }
            Err(e) => tracing::error!(error = %e, "host config reload failed, keeping previous table"),
        }
    }

    pub async fn get(&self, hostname: &str) -> Option<HostConfig> {
        self.inner.read().await.get(hostname).cloned()
    }
}
