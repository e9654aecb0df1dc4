//! lv-cli — launches a LabVIEW VI or built application, relays its output
//! and returns its exit code to the calling shell.
//!
//! 세션 한 번의 흐름: 채널 바인드 → 설치 해석 → 포트 등록 → 스폰 →
//! 접속 대기 → 핸드셰이크 → 메시지 펌프 → 정리. 등록과 스폰 이후의 실패
//! 경로는 반드시 등록 철회와 추적 종료를 거칩니다.

use anyhow::Context;
use clap::Parser;
use lv_cli::channel::{extract_exit_code, HostChannel, Message, MessageKind};
use lv_cli::cli::Cli;
use lv_cli::config::GlobalConfig;
use lv_cli::install::{InstallDescriptor, InstallError, InstallRegistry};
use lv_cli::registration::{self, PortRegistration};
use lv_cli::supervisor::{is_executable_target, LaunchSpec, Supervisor, SupervisorEvent};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Exit code reported when the session fails without a code from the host.
const FAILURE_EXIT: i32 = -1;

/// Buffer between the frame reader task and the pump.
const MESSAGE_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = run(cli).await?;
    std::process::exit(exit_code)
}

fn init_logging(verbose: bool) {
    // 호스트 출력을 stdout으로 그대로 중계하므로 로그는 stderr로만
    let default_filter = if verbose { "lv_cli=debug" } else { "lv_cli=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = GlobalConfig::load();
    let connect_timeout =
        Duration::from_millis(cli.connect_timeout.unwrap_or(config.connect_timeout_ms));
    let kill_timeout = Duration::from_millis(cli.kill_timeout.unwrap_or(config.kill_timeout_ms));
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;

    tracing::debug!("lv-cli {} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Arguments for the program: {:?}", cli.args);

    let mut channel = HostChannel::bind()
        .await
        .context("Failed to open the loopback listener")?;

    let install = resolve_install(&cli).await?;
    let plan = LaunchSpec {
        document: cli.app.clone(),
        install: install.clone(),
        port: channel.port(),
        suppress_dialogs: !cli.allow_dialogs,
        user_args: cli.args.clone(),
    }
    .prepare()?;

    // 등록은 접속 대기 전에 끝나 있어야 개발 환경이 포트를 찾을 수 있음.
    // 실패는 경고 후 계속 — 빌드된 애플리케이션 경로는 로케이터 없이 동작.
    let registration = match (&install, &plan.document) {
        (Some(install), Some(document)) => {
            match registration::register_async(document.clone(), install.clone(), channel.port())
                .await
            {
                Ok(registration) => Some(registration),
                Err(e) => {
                    tracing::warn!("Continuing unregistered: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    let mut supervisor = None;
    if cli.no_launch {
        tracing::info!(
            "Launch suppressed, start {} manually against port {}",
            cli.app.display(),
            channel.port()
        );
    } else {
        match Supervisor::launch(plan).await {
            Ok(sup) => supervisor = Some(sup),
            Err(e) => {
                withdraw(registration).await;
                return Err(anyhow::Error::new(e).context("Failed to launch the application"));
            }
        }
    }

    if let Err(e) = channel.accept(Some(connect_timeout)).await {
        // 접속이 안 온 스폰 인스턴스는 고아가 되므로 여기서 정리
        stop_tracking(supervisor.take(), true).await;
        withdraw(registration).await;
        return Err(anyhow::Error::new(e).context("No connection received from the application"));
    }

    if let Err(e) = channel.write_handshake(&cli.args, &cwd).await {
        stop_tracking(supervisor.take(), true).await;
        withdraw(registration).await;
        return Err(anyhow::Error::new(e).context("Failed to send the startup handshake"));
    }

    // 이후 트래픽은 호스트 → 우리 방향뿐이므로 채널을 리더 태스크로 넘기고
    // 펌프는 취소에 안전한 수신 큐만 본다 (프레임 중간에 끊기지 않음)
    let (message_tx, mut messages) = mpsc::channel(MESSAGE_BUFFER);
    let reader = tokio::spawn(read_loop(channel, message_tx));

    let exit_code = pump(&mut messages, &mut supervisor).await;

    if let Some(mut sup) = supervisor.take() {
        if cli.kill && !sup.has_exited() {
            if tokio::time::timeout(kill_timeout, sup.wait_exited())
                .await
                .is_err()
            {
                tracing::info!("Exit timeout elapsed, stopping the application");
                sup.kill().await;
            }
        }
        sup.close().await;
    }

    reader.abort();
    let _ = reader.await;
    withdraw(registration).await;

    tracing::debug!("Session finished with exit code {}", exit_code);
    Ok(exit_code)
}

/// 실행 파일 타겟이면 설치가 필요 없고, 그 외에는 레지스트리 스캔 후
/// 버전 힌트 해석 또는 기본 설치 선택. --x64는 힌트가 있을 때만 의미 있음.
async fn resolve_install(cli: &Cli) -> anyhow::Result<Option<InstallDescriptor>> {
    if is_executable_target(&cli.app) {
        return Ok(None);
    }

    let registry = tokio::task::spawn_blocking(InstallRegistry::scan)
        .await
        .context("Installation scan failed")?;

    let descriptor = match &cli.lv_version {
        Some(hint) => registry.resolve_version_string(hint, cli.x64)?.clone(),
        None => registry
            .default_install()
            .cloned()
            .ok_or(InstallError::NoneDetected)?,
    };

    tracing::info!("Using LabVIEW {} at {}", descriptor, descriptor.path.display());
    Ok(Some(descriptor))
}

/// Reads frames until a terminal message or until the pump goes away, then
/// closes the channel.
async fn read_loop(mut channel: HostChannel, messages: mpsc::Sender<Message>) {
    loop {
        let message = channel.read_message().await;
        let terminal = matches!(message.kind, MessageKind::Exit | MessageKind::Rder);
        if messages.send(message).await.is_err() {
            break;
        }
        if terminal {
            break;
        }
    }
    channel.close();
}

/// Relays host messages until the session ends, returning the exit code for
/// the shell.
async fn pump(
    messages: &mut mpsc::Receiver<Message>,
    supervisor: &mut Option<Supervisor>,
) -> i32 {
    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => match message.kind {
                    MessageKind::Outp => relay(&mut std::io::stdout(), &message.payload),
                    MessageKind::Serr => relay(&mut std::io::stderr(), &message.payload),
                    MessageKind::Exit => match extract_exit_code(&message.payload) {
                        Ok(code) => {
                            tracing::debug!("Received exit code {}", code);
                            break code;
                        }
                        Err(e) => {
                            tracing::error!("{}", e);
                            break FAILURE_EXIT;
                        }
                    },
                    MessageKind::Rder => {
                        tracing::error!("Connection failed: {}", message.payload_str());
                        break FAILURE_EXIT;
                    }
                    kind => tracing::warn!("Unknown message type received: {}", kind),
                },
                None => {
                    tracing::error!("Message stream ended unexpectedly");
                    break FAILURE_EXIT;
                }
            },
            event = next_supervisor_event(supervisor) => match event {
                Some(SupervisorEvent::Switched { pid }) => {
                    tracing::info!("Tracking switched to PID {}", pid);
                }
                Some(SupervisorEvent::Exited { code, .. }) => {
                    // EXIT 메시지 전에 죽은 것은 코드와 무관하게 실패
                    tracing::error!("The application exited before sending an exit code");
                    break code.filter(|&code| code != 0).unwrap_or(1);
                }
                None => {
                    tracing::error!("Process tracking ended unexpectedly");
                    break 1;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::error!("Interrupt received, stopping the application");
                if let Some(sup) = supervisor {
                    sup.kill().await;
                }
                break FAILURE_EXIT;
            }
        }
    }
}

/// 스폰만 한 쪽 이벤트 대기. no-launch 세션에서는 영원히 대기.
async fn next_supervisor_event(supervisor: &mut Option<Supervisor>) -> Option<SupervisorEvent> {
    match supervisor {
        Some(sup) => sup.next_event().await,
        None => std::future::pending().await,
    }
}

fn relay(target: &mut impl Write, payload: &[u8]) {
    // 원시 바이트 그대로 전달. 실패는 소비자가 끊긴 경우라 중단 사유 아님.
    let _ = target.write_all(payload);
    let _ = target.flush();
}

async fn stop_tracking(supervisor: Option<Supervisor>, kill: bool) {
    if let Some(sup) = supervisor {
        if kill {
            sup.kill().await;
        }
        sup.close().await;
    }
}

async fn withdraw(registration: Option<PortRegistration>) {
    if let Some(registration) = registration {
        if let Err(e) = registration::unregister_async(registration).await {
            tracing::warn!("Failed to withdraw the port registration: {}", e);
        }
    }
}
