// Terma - SSH 终端客户端
// 命令行入口：行模式转发 stdin 到远程 Shell，远程输出写到 stdout

mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use terma::models::{AuthMethod, ServerProfile};
use terma::services::secrets::MemorySecretStore;
use terma::ssh::{
    HostKeyPrompt, HostKeyRequest, SessionState, SshManager, TerminalSink, UnattendedPolicy,
};
use terma::terminal::SpecialKey;
use terma::AppServices;

use cli::Cli;

/// 输出到标准输出的终端视图
struct StdoutSink {
    /// 会话结束时的提示
    closed: mpsc::UnboundedSender<String>,
}

impl TerminalSink for StdoutSink {
    fn on_data(&self, data: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(data);
        let _ = stdout.flush();
    }

    fn on_state(&self, state: &SessionState) {
        eprintln!("[terma] {}", state.status_text());
    }

    fn on_reconnecting(&self, attempt: u32, max_attempts: u32) {
        eprintln!("[terma] Reconnecting ({}/{})...", attempt, max_attempts);
    }

    fn on_connection_lost(&self, error: &str) {
        let _ = self.closed.send(format!("Connection lost: {}", error));
    }

    fn on_exit(&self, exit_status: u32) {
        let _ = self.closed.send(format!("Remote shell exited ({})", exit_status));
    }
}

fn main() -> Result<()> {
    terma::init_logging();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("terma-cli")
        .build()
        .context("Failed to create Tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let (user, host) = cli.parse_host()?;

    // 凭据只在本进程内保存
    let mut services = AppServices::load_default(Arc::new(MemorySecretStore::new()))?;
    if cli.no_reconnect {
        services.settings.connection.auto_reconnect = false;
    }
    let services = Arc::new(services);

    let auth_method = if cli.identity_file.is_some() {
        AuthMethod::SshKey
    } else {
        AuthMethod::Password
    };
    let mut profile = ServerProfile::new(&host, &host, cli.port, &user, auth_method);

    let mut temporary_password = None;
    match &cli.identity_file {
        Some(path) => {
            let key = std::fs::read(path)
                .with_context(|| format!("Unable to read identity file {}", path.display()))?;
            profile.private_key_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            let passphrase = cli.password();
            services
                .credentials
                .save_credentials(&profile, None, Some(&key), passphrase.as_deref())?;
        }
        None => {
            temporary_password = Some(match cli.password() {
                Some(password) => password,
                None => read_password(&profile)?,
            });
        }
    }

    let (prompt, mut requests) = if cli.trust_on_first_use {
        (HostKeyPrompt::unattended(UnattendedPolicy::TrustOnFirstUse), None)
    } else {
        let timeout = services.settings.connection.host_key_prompt_timeout();
        let (prompt, requests) = HostKeyPrompt::interactive(timeout);
        (prompt, Some(requests))
    };

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let manager = SshManager::new(services.clone(), prompt);
    let connector = manager.open(profile, Arc::new(StdoutSink { closed: closed_tx }))?;

    let mut connecting = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.connect(temporary_password.as_deref()).await })
    };
    let mut connected = false;
    let mut pending_request: Option<HostKeyRequest> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(request) = next_request(&mut requests) => {
                ask_host_key(&request);
                pending_request = Some(request);
            }
            result = &mut connecting, if !connected => {
                result.context("Connection task aborted")??;
                connected = true;
            }
            line = lines.next_line() => match line? {
                Some(line) => match pending_request.take() {
                    Some(request) => answer_host_key(request, &line),
                    None => {
                        connector.send_text(&line);
                        connector.send_key(SpecialKey::Enter);
                    }
                },
                None => break,
            },
            Some(message) = closed_rx.recv() => {
                eprintln!("[terma] {}", message);
                break;
            }
        }
    }

    manager.close_all();
    Ok(())
}

async fn next_request(
    requests: &mut Option<mpsc::UnboundedReceiver<HostKeyRequest>>,
) -> Option<HostKeyRequest> {
    match requests.as_mut() {
        Some(requests) => requests.recv().await,
        None => std::future::pending().await,
    }
}

fn ask_host_key(request: &HostKeyRequest) {
    if request.is_changed() {
        eprintln!(
            "WARNING: the host key for {}:{} has changed!",
            request.host, request.port
        );
    } else {
        eprintln!(
            "The authenticity of host '{}:{}' can't be established.",
            request.host, request.port
        );
    }
    eprintln!("{} key fingerprint is {}.", request.key_type, request.fingerprint);
    eprint!("Trust this host and continue connecting (yes/no)? ");
}

fn answer_host_key(request: HostKeyRequest, answer: &str) {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => request.accept(),
        _ => request.reject(),
    }
}

/// 从标准输入读取密码（行模式，不隐藏回显）
fn read_password(profile: &ServerProfile) -> Result<String> {
    eprint!("{}@{}'s password: ", profile.username, profile.display_host());
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Unable to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
