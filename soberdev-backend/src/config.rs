use std::env;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use picky::key::{PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use tap::prelude::*;
use url::Url;
use uuid::Uuid;

use crate::listener::ListenerUrls;

const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: u64 = 60 * 5; // 5 minutes
const DEFAULT_REFRESH_TOKEN_LIFETIME_SECS: u64 = 60 * 60 * 24; // 1 day
const DEFAULT_LOGIN_RATE_LIMIT: u8 = 10; // attempts per user and address, per minute

cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        const APPLICATION_DIR: &str = "Soberdev\\Backend";
    } else if #[cfg(target_os = "macos")] {
        const APPLICATION_DIR: &str = "Soberdev Backend";
    } else {
        const APPLICATION_DIR: &str = "soberdev-backend";
    }
}

#[derive(Debug, Clone)]
pub struct Conf {
    pub id: Option<Uuid>,
    pub hostname: String,
    pub listeners: Vec<ListenerUrls>,
    pub database_path: Utf8PathBuf,
    pub provisioner_public_key: PublicKey,
    pub provisioner_private_key: Option<PrivateKey>,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
    pub login_rate_limit: u8,
    pub log_file: Utf8PathBuf,
    pub verbosity_profile: dto::VerbosityProfile,
    pub log_directive: Option<String>,
    pub debug: dto::DebugConf,
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        if conf_file.listeners.is_empty() {
            anyhow::bail!("at least one listener is required");
        }

        let hostname = conf_file
            .hostname
            .clone()
            .unwrap_or_else(|| default_hostname().unwrap_or_else(|| "localhost".to_owned()));

        let listeners = conf_file
            .listeners
            .iter()
            .map(|l| l.to_listener_urls(&hostname))
            .collect::<anyhow::Result<Vec<_>>>()
            .context("invalid listener")?;

        let data_dir = get_data_dir();

        let database_path = conf_file
            .database
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("backend.sqlite3"))
            .pipe_ref(|path| normalize_data_path(path, &data_dir));

        let log_file = conf_file
            .log_file
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from("backend"))
            .pipe_ref(|path| normalize_data_path(path, &data_dir));

        let provisioner_public_key = conf_file
            .provisioner_public_key
            .as_ref()
            .context("provisioner public key is missing")?
            .read_pub_key()
            .context("provisioner public key")?;

        let provisioner_private_key = conf_file
            .provisioner_private_key
            .as_ref()
            .map(|key| key.read_priv_key().context("provisioner private key"))
            .transpose()?;

        let access_token_lifetime = Duration::from_secs(
            conf_file
                .access_token_lifetime
                .unwrap_or(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS),
        );

        let refresh_token_lifetime = Duration::from_secs(
            conf_file
                .refresh_token_lifetime
                .unwrap_or(DEFAULT_REFRESH_TOKEN_LIFETIME_SECS),
        );

        if refresh_token_lifetime <= access_token_lifetime {
            anyhow::bail!("refresh token lifetime must exceed the access token lifetime");
        }

        Ok(Conf {
            id: conf_file.id,
            hostname,
            listeners,
            database_path,
            provisioner_public_key,
            provisioner_private_key,
            access_token_lifetime,
            refresh_token_lifetime,
            login_rate_limit: conf_file.login_rate_limit.unwrap_or(DEFAULT_LOGIN_RATE_LIMIT),
            log_file,
            verbosity_profile: conf_file.verbosity_profile.unwrap_or_default(),
            log_directive: conf_file.log_directive.clone(),
            debug: conf_file.debug.clone().unwrap_or_default(),
        })
    }
}

/// Configuration Handle, source of truth for current configuration state
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<ConfHandleInner>,
}

struct ConfHandleInner {
    conf: parking_lot::RwLock<Arc<Conf>>,
    conf_file: parking_lot::RwLock<Arc<dto::ConfFile>>,
}

impl ConfHandle {
    /// Initializes configuration for this instance.
    ///
    /// It's best to call this only once to avoid inconsistencies.
    pub fn init() -> anyhow::Result<Self> {
        let conf_file = load_conf_file_or_generate_new()?;
        let conf = Conf::from_conf_file(&conf_file).context("invalid configuration file")?;
        Ok(Self::new(conf, conf_file))
    }

    /// Builds a handle from an in-memory configuration, without touching disk.
    pub fn mock(conf_file: dto::ConfFile) -> anyhow::Result<Self> {
        let conf = Conf::from_conf_file(&conf_file).context("invalid configuration")?;
        Ok(Self::new(conf, conf_file))
    }

    fn new(conf: Conf, conf_file: dto::ConfFile) -> Self {
        Self {
            inner: Arc::new(ConfHandleInner {
                conf: parking_lot::RwLock::new(Arc::new(conf)),
                conf_file: parking_lot::RwLock::new(Arc::new(conf_file)),
            }),
        }
    }

    /// Returns current configuration state (do not hold it forever as it may become outdated)
    pub fn get_conf(&self) -> Arc<Conf> {
        self.inner.conf.read().clone()
    }

    /// Returns current configuration file state (do not hold it forever as it may become outdated)
    pub fn get_conf_file(&self) -> Arc<dto::ConfFile> {
        self.inner.conf_file.read().clone()
    }
}

fn save_config(conf: &dto::ConfFile) -> anyhow::Result<()> {
    let conf_file_path = get_conf_file_path();
    let json = serde_json::to_string_pretty(conf).context("failed JSON serialization of configuration")?;
    std::fs::write(&conf_file_path, json).with_context(|| format!("failed to write file at {conf_file_path}"))?;
    Ok(())
}

pub fn get_data_dir() -> Utf8PathBuf {
    if let Ok(config_path_env) = env::var("SOBERDEV_CONFIG_PATH") {
        Utf8PathBuf::from(config_path_env)
    } else if cfg!(target_os = "windows") {
        let program_data_env = env::var("ProgramData").expect("ProgramData env variable");
        Utf8PathBuf::from(program_data_env).join(APPLICATION_DIR)
    } else if cfg!(target_os = "macos") {
        Utf8PathBuf::from("/Library/Application Support").join(APPLICATION_DIR)
    } else {
        Utf8PathBuf::from("/etc").join(APPLICATION_DIR)
    }
}

fn get_conf_file_path() -> Utf8PathBuf {
    get_data_dir().join("backend.json")
}

fn normalize_data_path(path: &Utf8Path, data_dir: &Utf8Path) -> Utf8PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        data_dir.join(path)
    }
}

fn load_conf_file(conf_path: &Utf8Path) -> anyhow::Result<Option<dto::ConfFile>> {
    match File::open(conf_path) {
        Ok(file) => BufReader::new(file)
            .pipe(serde_json::from_reader)
            .map(Some)
            .with_context(|| format!("invalid config file at {conf_path}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!(e).context(format!("couldn't open config file at {conf_path}"))),
    }
}

pub fn load_conf_file_or_generate_new() -> anyhow::Result<dto::ConfFile> {
    let conf_file_path = get_conf_file_path();

    let conf_file = match load_conf_file(&conf_file_path).context("failed to load configuration")? {
        Some(conf_file) => conf_file,
        None => {
            let defaults = dto::ConfFile::generate_new();
            info!("Write default configuration to disk…");
            save_config(&defaults).context("failed to save configuration")?;
            defaults
        }
    };

    Ok(conf_file)
}

fn default_hostname() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}

pub mod dto {
    use super::*;

    /// Source of truth for backend configuration
    ///
    /// This struct represents the JSON file used for configuration as close as possible
    /// and is not trying to be too smart.
    ///
    /// Unstable options are subject to change
    #[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ConfFile {
        /// This backend unique ID (e.g.: 123e4567-e89b-12d3-a456-426614174000)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub id: Option<Uuid>,
        /// This backend hostname (e.g.: directory.soberdev.id)
        #[serde(skip_serializing_if = "Option::is_none")]
        pub hostname: Option<String>,

        //== Token signing keys ==//
        /// Provisioner public key, used to verify signed tokens
        #[serde(flatten, with = "provisioner_public_key")]
        pub provisioner_public_key: Option<ConfFileOrData<PubKeyFormat>>,
        /// Provisioner private key, used to sign tokens
        #[serde(flatten, with = "provisioner_private_key", skip_serializing_if = "Option::is_none")]
        pub provisioner_private_key: Option<ConfFileOrData<PrivKeyFormat>>,

        //== Listeners configuration ==//
        /// Listeners to launch at startup
        pub listeners: Vec<ListenerConf>,

        /// Path to the user directory database
        #[serde(skip_serializing_if = "Option::is_none")]
        pub database: Option<Utf8PathBuf>,

        //== Token lifetimes ==//
        /// Validity duration in seconds for access tokens
        #[serde(skip_serializing_if = "Option::is_none")]
        pub access_token_lifetime: Option<u64>,
        /// Validity duration in seconds for refresh tokens
        #[serde(skip_serializing_if = "Option::is_none")]
        pub refresh_token_lifetime: Option<u64>,
        /// Maximum number of login attempts per user and address, per minute
        #[serde(skip_serializing_if = "Option::is_none")]
        pub login_rate_limit: Option<u8>,

        /// Verbosity profile
        #[serde(skip_serializing_if = "Option::is_none")]
        pub verbosity_profile: Option<VerbosityProfile>,
        /// (Unstable) Folder and prefix for log files
        #[serde(skip_serializing_if = "Option::is_none")]
        pub log_file: Option<Utf8PathBuf>,
        /// (Unstable) Directive string in the same form as the RUST_LOG environment variable
        #[serde(skip_serializing_if = "Option::is_none")]
        pub log_directive: Option<String>,

        //== Unsafe debug options for developers ==//
        /// (Unstable)
        #[serde(default, rename = "__debug__", skip_serializing_if = "Option::is_none")]
        pub debug: Option<DebugConf>,
    }

    impl ConfFile {
        pub fn generate_new() -> Self {
            Self {
                id: Some(Uuid::new_v4()),
                hostname: None,
                provisioner_public_key: Some(ConfFileOrData::Path {
                    file: "provisioner.pub.key".into(),
                }),
                provisioner_private_key: Some(ConfFileOrData::Path {
                    file: "provisioner.key".into(),
                }),
                listeners: vec![ListenerConf {
                    internal_url: "http://*:8080".try_into().expect("valid hardcoded URL"),
                    external_url: "http://*:8080".try_into().expect("valid hardcoded URL"),
                }],
                database: None,
                access_token_lifetime: None,
                refresh_token_lifetime: None,
                login_rate_limit: None,
                verbosity_profile: None,
                log_file: None,
                log_directive: None,
                debug: None,
            }
        }
    }

    serde_with::with_prefix!(provisioner_public_key "ProvisionerPublicKey");
    serde_with::with_prefix!(provisioner_private_key "ProvisionerPrivateKey");

    /// Verbosity profile (pre-defined tracing directives)
    #[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize, Default)]
    pub enum VerbosityProfile {
        /// The default profile, mostly info records
        #[default]
        Default,
        /// Recommended profile for developers
        Debug,
        /// Show all traces
        All,
        /// Only show warnings and errors
        Quiet,
    }

    impl VerbosityProfile {
        pub fn to_log_filter(self) -> &'static str {
            match self {
                VerbosityProfile::Default => "info",
                VerbosityProfile::Debug => "info,soberdev_backend=debug,soberdev_backend::api=trace,tower_http=trace",
                VerbosityProfile::All => "trace",
                VerbosityProfile::Quiet => "warn",
            }
        }
    }

    /// Unsafe debug options that should only ever be used at development stage
    ///
    /// These options might change or get removed without further notice.
    ///
    /// Note to developers: all options should be safe by default, never add an option
    /// that needs to be overridden manually in order to be safe.
    #[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
    pub struct DebugConf {
        /// Dump received tokens using a `debug` statement
        #[serde(default)]
        pub dump_tokens: bool,
    }

    /// Manual Default trait implementation just to make sure default values are deliberates
    #[allow(clippy::derivable_impls)]
    impl Default for DebugConf {
        fn default() -> Self {
            Self { dump_tokens: false }
        }
    }

    impl DebugConf {
        pub fn is_default(&self) -> bool {
            Self::default().eq(self)
        }
    }

    #[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
    pub enum DataEncoding {
        #[default]
        Multibase,
        Base64,
        Base64Pad,
        Base64Url,
        Base64UrlPad,
    }

    #[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
    pub enum PrivKeyFormat {
        #[default]
        Pkcs8,
        Ec,
        Rsa,
    }

    #[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
    pub enum PubKeyFormat {
        #[default]
        Spki,
        Rsa,
    }

    #[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ConfData<Format> {
        pub value: String,
        #[serde(default)]
        pub format: Format,
        #[serde(default)]
        pub encoding: DataEncoding,
    }

    impl<Format> ConfData<Format> {
        fn decode_value(&self) -> anyhow::Result<Vec<u8>> {
            match self.encoding {
                DataEncoding::Multibase => multibase::decode(&self.value).map(|o| o.1),
                DataEncoding::Base64 => multibase::Base::Base64.decode(&self.value),
                DataEncoding::Base64Pad => multibase::Base::Base64Pad.decode(&self.value),
                DataEncoding::Base64Url => multibase::Base::Base64Url.decode(&self.value),
                DataEncoding::Base64UrlPad => multibase::Base::Base64UrlPad.decode(&self.value),
            }
            .context("invalid encoding for value")
        }
    }

    #[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum ConfFileOrData<Format> {
        #[serde(rename_all = "PascalCase")]
        Path {
            file: Utf8PathBuf,
        },
        #[serde(rename_all = "PascalCase")]
        Inlined {
            #[serde(bound(deserialize = "ConfData<Format>: Deserialize<'de>"))]
            data: ConfData<Format>,
        },
        Flattened(#[serde(bound(deserialize = "ConfData<Format>: Deserialize<'de>"))] ConfData<Format>),
    }

    impl ConfFileOrData<PubKeyFormat> {
        pub(super) fn read_pub_key(&self) -> anyhow::Result<PublicKey> {
            match self {
                Self::Path { file } => {
                    let path = normalize_data_path(file, &get_data_dir());
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("couldn't read file at {path}"))?
                        .pipe_deref(PublicKey::from_pem_str)
                        .context("couldn't parse pem document")
                }
                Self::Inlined { data } | Self::Flattened(data) => {
                    let value = data.decode_value()?;

                    match data.format {
                        PubKeyFormat::Spki => PublicKey::from_der(&value).context("bad SPKI"),
                        PubKeyFormat::Rsa => PublicKey::from_rsa_der(&value).context("bad RSA value"),
                    }
                }
            }
        }
    }

    impl ConfFileOrData<PrivKeyFormat> {
        pub(super) fn read_priv_key(&self) -> anyhow::Result<PrivateKey> {
            match self {
                Self::Path { file } => {
                    let path = normalize_data_path(file, &get_data_dir());
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("couldn't read file at {path}"))?
                        .pipe_deref(PrivateKey::from_pem_str)
                        .context("couldn't parse pem document")
                }
                Self::Inlined { data } | Self::Flattened(data) => {
                    let value = data.decode_value()?;

                    match data.format {
                        PrivKeyFormat::Pkcs8 => PrivateKey::from_pkcs8(&value).context("bad PKCS8"),
                        PrivKeyFormat::Ec => PrivateKey::from_ec_der(&value).context("bad EC value"),
                        PrivKeyFormat::Rsa => PrivateKey::from_rsa_der(&value).context("bad RSA value"),
                    }
                }
            }
        }
    }

    #[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ListenerConf {
        pub internal_url: Url,
        pub external_url: Url,
    }

    impl ListenerConf {
        pub(super) fn to_listener_urls(&self, hostname: &str) -> anyhow::Result<ListenerUrls> {
            if self.internal_url.scheme() != "http" {
                // TLS termination is the fronting proxy's job.
                anyhow::bail!("unsupported listener scheme: {}", self.internal_url.scheme());
            }

            let mut internal_url = self.internal_url.clone();

            if internal_url.host_str() == Some("*") {
                let _ = internal_url.set_host(Some("0.0.0.0"));
            }

            let mut external_url = self.external_url.clone();

            if external_url.host_str() == Some("*") {
                let _ = external_url.set_host(Some(hostname));
            }

            Ok(ListenerUrls {
                internal_url,
                external_url,
            })
        }
    }
}
