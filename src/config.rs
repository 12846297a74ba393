use crate::error::{Error, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const USERS_FILE: &str = "users.json";
pub const SNAPSHOT_FILE: &str = "datasets.json.gz";
pub const MEDIA_DIR: &str = "media";

/// Settings for the HTTP server
#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    #[clap(long, env = "CHEMVIZ_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Directory holding users, dataset metadata and uploaded files
    #[clap(long, env = "CHEMVIZ_DATA_DIR", default_value = "database")]
    pub data_dir: PathBuf,

    /// Largest accepted upload body in bytes
    #[clap(long, env = "CHEMVIZ_MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    #[clap(flatten)]
    pub admin: AdminConfig,
}

/// Initial administrator account, created when no admin exists yet
#[derive(Args, Debug, Clone)]
pub struct AdminConfig {
    #[clap(long = "admin-username", env = "ADMIN_USERNAME", default_value = "admin")]
    pub username: String,

    #[clap(long = "admin-email", env = "ADMIN_EMAIL", default_value = "admin@example.com")]
    pub email: String,

    #[clap(
        long = "admin-password",
        env = "ADMIN_PASSWORD",
        default_value = "changeme123",
        hide_env_values = true
    )]
    pub password: String,
}

impl ServerConfig {
    /// Configuration rooted at `data_dir` with every other setting at its default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        ServerConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            data_dir: data_dir.into(),
            max_upload_bytes: 10 * 1024 * 1024,
            admin: AdminConfig {
                username: "admin".to_string(),
                email: "admin@example.com".to_string(),
                password: "changeme123".to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(Error::Config(
                "max upload size must be greater than zero".to_string(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data directory must not be empty".to_string()));
        }
        self.admin.validate()
    }

    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join(USERS_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join(MEDIA_DIR)
    }
}

impl AdminConfig {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(Error::Config(
                "admin username and password must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Opts {
        #[clap(flatten)]
        server: ServerConfig,
    }

    #[test]
    fn defaults_apply_without_flags() {
        let opts = Opts::try_parse_from(["chemviz"]).unwrap();
        let config = opts.server;
        // the environment may override these, so only check the layout helpers
        assert_eq!(
            config.snapshot_path(),
            config.data_dir.join("datasets.json.gz")
        );
        assert_eq!(config.media_dir(), config.data_dir.join("media"));
        assert_eq!(config.users_path(), config.data_dir.join("users.json"));
    }

    #[test]
    fn flags_override_defaults() {
        let opts = Opts::try_parse_from([
            "chemviz",
            "--bind",
            "0.0.0.0:9000",
            "--data-dir",
            "/srv/chemviz",
            "--max-upload-bytes",
            "2048",
            "--admin-username",
            "root",
        ])
        .unwrap();
        let config = opts.server;
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.data_dir, PathBuf::from("/srv/chemviz"));
        assert_eq!(config.max_upload_bytes, 2048);
        assert_eq!(config.admin.username, "root");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_upload_limit_is_rejected() {
        let mut config = ServerConfig::with_data_dir("data");
        config.max_upload_bytes = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_admin_password_is_rejected() {
        let mut config = ServerConfig::with_data_dir("data");
        config.admin.password.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
