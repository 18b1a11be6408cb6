//! SCSP connection configuration.
//!
//! Provides the account, transport and session options used to open a
//! connection, either built programmatically or parsed from a connection
//! string:
//!
//! ```text
//! scsp://[user:pass@]host[:port][/dbname][?opt=val&...]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use scsp_core::error::{ConfigError, Error, Result};

/// Default SCSP server port.
pub const DEFAULT_PORT: u16 = 8860;

/// Default time allowed to establish the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Credentials and target of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Username for `AUTH USER`
    pub username: Option<String>,
    /// Password (or password hash when `password_hashed` is set)
    pub password: Option<String>,
    /// Send the password with `HASH` instead of `PASSWORD`
    pub password_hashed: bool,
    /// API key for `AUTH APIKEY`
    pub api_key: Option<String>,
    /// Access token for `AUTH TOKEN`
    pub token: Option<String>,
    /// Database selected after authentication
    pub database: Option<String>,
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 8860)
    pub port: u16,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            password_hashed: false,
            api_key: None,
            token: None,
            database: None,
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// How the client authenticates, derived from the [`Account`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod<'a> {
    ApiKey(&'a str),
    Token(&'a str),
    User {
        username: &'a str,
        password: &'a str,
        hashed: bool,
    },
}

/// TLS material and verification options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA bundle used instead of the bundled web PKI roots
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS
    pub client_key_path: Option<PathBuf>,
    /// Accept any server certificate
    pub danger_skip_verify: bool,
    /// Server name for SNI (defaults to the host)
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CA certificate path.
    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Set the client certificate path.
    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    /// Set the client key path.
    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    /// Skip server certificate verification.
    ///
    /// # Security Warning
    /// This accepts any certificate, including self-signed and expired
    /// ones. Only use it against servers you control.
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }

    /// Override the SNI server name.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// SCSP connection configuration.
///
/// Immutable once handed to [`crate::Connection::connect`].
#[derive(Debug, Clone)]
pub struct Config {
    pub account: Account,
    /// Per-operation socket timeout (none by default)
    pub timeout: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Ask the server to compress large replies
    pub compression: bool,
    /// Ask the server for zero-terminated strings
    pub zerotext: bool,
    /// Use an in-memory database (skips `CREATE DATABASE`)
    pub memory: bool,
    /// Create the database if it does not exist
    pub create: bool,
    /// Relax linearizability for reads
    pub non_linearizable: bool,
    /// Use plain TCP instead of TLS
    pub insecure: bool,
    pub tls: TlsConfig,
    /// Server omits blob columns
    pub noblob: bool,
    /// Maximum bytes per column value
    pub maxdata: Option<u64>,
    /// Maximum rows per chunk
    pub maxrows: Option<u64>,
    /// Maximum bytes per row set
    pub maxrowset: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: Account::default(),
            timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            compression: false,
            zerotext: false,
            memory: false,
            create: false,
            non_linearizable: false,
            insecure: false,
            tls: TlsConfig::default(),
            noblob: false,
            maxdata: None,
            maxrows: None,
            maxrowset: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string and validate the result.
    ///
    /// Query option keys are case-insensitive. Unknown options are ignored;
    /// a recognised option with a value of the wrong shape is an error.
    pub fn from_url(input: &str) -> Result<Self> {
        let url = url::Url::parse(input).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid connection string: {}", e),
                source: Some(Box::new(e)),
            })
        })?;

        let mut config = Config::new();
        config.account.host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::config("connection string has no host"))?
            .to_string();
        if let Some(port) = url.port() {
            config.account.port = port;
        }
        if !url.username().is_empty() {
            config.account.username = Some(percent_decode(url.username())?);
        }
        if let Some(password) = url.password() {
            config.account.password = Some(percent_decode(password)?);
        }
        let path = url.path().trim_matches('/');
        if !path.is_empty() {
            config.account.database = Some(percent_decode(path)?);
        }

        for (key, value) in url.query_pairs() {
            config.apply_option(&key.to_ascii_lowercase(), &value)?;
        }

        config.validate()?;
        tracing::debug!(
            host = %config.account.host,
            port = config.account.port,
            database = ?config.account.database,
            "parsed connection string"
        );
        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "timeout" => self.timeout = Some(Duration::from_secs(parse_int(key, value)?)),
            "connect_timeout" => self.connect_timeout = Duration::from_secs(parse_int(key, value)?),
            "compression" => self.compression = parse_bool(key, value)?,
            "zerotext" => self.zerotext = parse_bool(key, value)?,
            "memory" => self.memory = parse_bool(key, value)?,
            "create" => self.create = parse_bool(key, value)?,
            "non_linearizable" | "nonlinearizable" => {
                self.non_linearizable = parse_bool(key, value)?;
            }
            "insecure" => self.insecure = parse_bool(key, value)?,
            "no_verify_certificate" => self.tls.danger_skip_verify = parse_bool(key, value)?,
            "root_certificate" => self.tls.ca_cert_path = Some(PathBuf::from(value)),
            "certificate" => self.tls.client_cert_path = Some(PathBuf::from(value)),
            "certificate_key" => self.tls.client_key_path = Some(PathBuf::from(value)),
            "noblob" => self.noblob = parse_bool(key, value)?,
            "maxdata" => self.maxdata = Some(parse_int(key, value)?),
            "maxrows" => self.maxrows = Some(parse_int(key, value)?),
            "maxrowset" => self.maxrowset = Some(parse_int(key, value)?),
            "apikey" => self.account.api_key = Some(value.to_string()),
            "token" => self.account.token = Some(value.to_string()),
            "password_hashed" => self.account.password_hashed = parse_bool(key, value)?,
            "dbname" => self.account.database = Some(value.to_string()),
            "username" => self.account.username = Some(value.to_string()),
            "password" => self.account.password = Some(value.to_string()),
            _ => tracing::trace!(option = key, "ignoring unknown connection option"),
        }
        Ok(())
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.account.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.account.port = port;
        self
    }

    /// Authenticate with a username and plain password.
    pub fn user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.account.username = Some(username.into());
        self.account.password = Some(password.into());
        self.account.password_hashed = false;
        self
    }

    /// Authenticate with a username and a password hash.
    pub fn user_hashed(mut self, username: impl Into<String>, hash: impl Into<String>) -> Self {
        self.account.username = Some(username.into());
        self.account.password = Some(hash.into());
        self.account.password_hashed = true;
        self
    }

    /// Authenticate with an API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.account.api_key = Some(key.into());
        self
    }

    /// Authenticate with an access token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.account.token = Some(token.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.account.database = Some(database.into());
        self
    }

    /// Set the per-operation socket timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable compression.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Enable or disable zero-terminated strings.
    pub fn zerotext(mut self, enabled: bool) -> Self {
        self.zerotext = enabled;
        self
    }

    /// Use an in-memory database.
    pub fn memory(mut self, enabled: bool) -> Self {
        self.memory = enabled;
        self
    }

    /// Create the database if it is missing.
    pub fn create(mut self, enabled: bool) -> Self {
        self.create = enabled;
        self
    }

    pub fn non_linearizable(mut self, enabled: bool) -> Self {
        self.non_linearizable = enabled;
        self
    }

    /// Use plain TCP.
    pub fn insecure(mut self, enabled: bool) -> Self {
        self.insecure = enabled;
        self
    }

    /// Set the TLS options.
    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn noblob(mut self, enabled: bool) -> Self {
        self.noblob = enabled;
        self
    }

    pub fn maxdata(mut self, bytes: u64) -> Self {
        self.maxdata = Some(bytes);
        self
    }

    pub fn maxrows(mut self, rows: u64) -> Self {
        self.maxrows = Some(rows);
        self
    }

    pub fn maxrowset(mut self, bytes: u64) -> Self {
        self.maxrowset = Some(bytes);
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.account.host, self.account.port)
    }

    /// The single authentication method configured, if any.
    pub fn auth_method(&self) -> Option<AuthMethod<'_>> {
        let account = &self.account;
        if let Some(key) = &account.api_key {
            return Some(AuthMethod::ApiKey(key));
        }
        if let Some(token) = &account.token {
            return Some(AuthMethod::Token(token));
        }
        match (&account.username, &account.password) {
            (Some(username), Some(password)) => Some(AuthMethod::User {
                username,
                password,
                hashed: account.password_hashed,
            }),
            _ => None,
        }
    }

    /// Reject configurations that cannot be sent to a server.
    pub fn validate(&self) -> Result<()> {
        let account = &self.account;
        if account.host.is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if account.port == 0 {
            return Err(Error::config("port must not be 0"));
        }
        if account.username.is_some() != account.password.is_some() {
            return Err(Error::config(
                "username and password must be provided together",
            ));
        }

        let methods = [
            account.api_key.is_some(),
            account.token.is_some(),
            account.username.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        match methods {
            0 => Err(Error::config(
                "no authentication method: set an API key, an access token, or a username and password",
            )),
            1 => Ok(()),
            _ => Err(Error::config(
                "API key, access token and username/password are mutually exclusive",
            )),
        }?;

        if self.tls.client_cert_path.is_some() != self.tls.client_key_path.is_some() {
            return Err(Error::config(
                "client certificate and client key must be provided together",
            ));
        }

        let handshake_fields = [
            ("username", &account.username),
            ("password", &account.password),
            ("API key", &account.api_key),
            ("access token", &account.token),
            ("database", &account.database),
        ];
        for (field, value) in handshake_fields {
            if let Some(value) = value {
                check_handshake_word(field, value)?;
            }
        }
        Ok(())
    }

    /// Build the concatenated handshake command.
    ///
    /// Order: authentication, database selection, then one
    /// `SET CLIENT KEY` per enabled option.
    pub fn handshake_command(&self) -> String {
        let mut command = String::new();

        match self.auth_method() {
            Some(AuthMethod::ApiKey(key)) => {
                command.push_str(&format!("AUTH APIKEY {};", key));
            }
            Some(AuthMethod::Token(token)) => {
                command.push_str(&format!("AUTH TOKEN {};", token));
            }
            Some(AuthMethod::User {
                username,
                password,
                hashed,
            }) => {
                let keyword = if hashed { "HASH" } else { "PASSWORD" };
                command.push_str(&format!("AUTH USER {} {} {};", username, keyword, password));
            }
            None => {}
        }

        if let Some(database) = &self.account.database {
            if self.create && !self.memory {
                command.push_str(&format!("CREATE DATABASE {} IF NOT EXISTS;", database));
            }
            command.push_str(&format!("USE DATABASE {};", database));
        }

        let flags = [
            ("COMPRESSION", self.compression),
            ("ZEROTEXT", self.zerotext),
            ("NONLINEARIZABLE", self.non_linearizable),
            ("NOBLOB", self.noblob),
        ];
        for (key, enabled) in flags {
            if enabled {
                command.push_str(&format!("SET CLIENT KEY {} TO 1;", key));
            }
        }

        let limits = [
            ("MAXDATA", self.maxdata),
            ("MAXROWS", self.maxrows),
            ("MAXROWSET", self.maxrowset),
        ];
        for (key, limit) in limits {
            if let Some(limit) = limit {
                command.push_str(&format!("SET CLIENT KEY {} TO {};", key, limit));
            }
        }

        command
    }
}

/// Handshake values are sent as bare words; separators would split the
/// command.
fn check_handshake_word(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::config(format!("{} must not be empty", field)));
    }
    let bad = value
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(c, ';' | '\'' | '"'));
    match bad {
        Some(c) => Err(Error::config(format!(
            "{} must not contain {:?}",
            field, c
        ))),
        None => Ok(()),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "option '{}' expects a boolean, got '{}'",
            key, value
        ))),
    }
}

fn parse_int(key: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|e| {
        Error::Config(ConfigError {
            message: format!("option '{}' expects an integer, got '{}'", key, value),
            source: Some(Box::new(e)),
        })
    })
}

/// Decode `%XX` escapes in the user-info and path components.
fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| Error::config(format!("invalid percent escape in '{}'", input)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| {
        Error::Config(ConfigError {
            message: format!("connection string component is not UTF-8: {}", e),
            source: Some(Box::new(e)),
        })
    })
}
