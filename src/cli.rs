// 命令行参数

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use terma::constants::DEFAULT_PORT;

#[derive(Parser, Debug, Clone)]
#[command(name = "terma")]
#[command(author, version, about = "Interactive SSH terminal client")]
pub struct Cli {
    /// Remote host in format `[user@]host`
    #[arg(value_name = "HOST")]
    pub host: String,

    /// SSH port
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Path to a private key (OpenSSH, SEC1 or PKCS#8 PEM)
    #[arg(short = 'i', long = "identity")]
    pub identity_file: Option<PathBuf>,

    /// Read the password (or key passphrase) from this environment variable
    #[arg(long = "password-env", value_name = "VAR")]
    pub password_env: Option<String>,

    /// Don't reconnect automatically when the connection drops
    #[arg(long = "no-reconnect")]
    pub no_reconnect: bool,

    /// Trust unknown hosts without asking; refuse changed host keys
    #[arg(long = "trust-on-first-use")]
    pub trust_on_first_use: bool,
}

impl Cli {
    /// 拆分 `[user@]host`，缺省用户取本机用户名
    pub fn parse_host(&self) -> Result<(String, String)> {
        let (user, host) = match self.host.split_once('@') {
            Some((user, host)) => (user.to_string(), host.to_string()),
            None => (local_user(), self.host.clone()),
        };
        if host.trim().is_empty() {
            bail!("Missing host in '{}'", self.host);
        }
        if user.trim().is_empty() {
            bail!("Missing user name; use user@host");
        }
        Ok((user, host))
    }

    /// 从环境变量读取密码
    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}
