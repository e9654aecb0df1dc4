//! Service Locator registration.
//!
//! The development environment discovers our channel port by asking the NI
//! Service Locator on its fixed port for an identifier derived from the
//! launch. We publish the pairing before waiting on the channel and delete
//! it on the way out.
//!
//! 등록 실패는 경고 후 계속하는 정책입니다 — 로케이터가 없어도 빌드된
//! 애플리케이션 경로는 동작하므로 여기서 세션을 중단하지 않습니다. 정책의
//! 적용(warn 후 진행)은 호출자 몫이고 이 모듈은 결과만 돌려줍니다.

use crate::install::InstallDescriptor;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use ureq::AgentBuilder;

const SERVICE_LOCATOR: &str = "http://localhost:3580";

/// HTTP timeout for locator calls. The locator is local, so anything slower
/// than this means it is not answering at all.
const LOCATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Canned response the locator replays to the host when it asks for our
/// port. CRLF pairs are percent encoded to survive the query string.
const BASE_RESPONSE: &str = "HTTP/1.0 200 OK%0D%0AServer: Service Locator%0D%0APragma: no-cache%0D%0AConnection: Close%0D%0AContent-Length: 12%0D%0AContent-Type: text/html%0D%0A%0D%0A";

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Request to the Service Locator failed - is it running? ({0})")]
    Transport(String),

    #[error("Service Locator rejected the request with status {0}")]
    Rejected(u16),
}

/// 식별자에서 제거하는 문자들: 경로 구분자와 구두점, 공백 전부.
/// `/`와 `?`는 UNC 접두사(\\?\)와 유닉스 경로 때문에 포함됩니다.
fn forbidden_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[:\\./?\s]").expect("escape pattern must compile"))
}

/// Derives the identifier the host looks our port up under.
///
/// The document path is made absolute first so the host and this tool agree
/// on the identifier regardless of how the document was given on the
/// command line.
pub fn launch_id(document: &Path, install: &InstallDescriptor) -> String {
    let absolute = absolute_document_path(document);
    let absolute = absolute.to_string_lossy();
    let escaped = forbidden_chars().replace_all(&absolute, "");

    let version_prefix: String = install.version.chars().take(4).collect();

    format!("cli/{}/{}/{}", version_prefix, install.bitness, escaped)
}

fn absolute_document_path(document: &Path) -> PathBuf {
    if document.is_absolute() {
        return document.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(document),
        Err(_) => document.to_path_buf(),
    }
}

// ─── Port Registration ───────────────────────────────────────

/// One live locator entry. Dropping without [`PortRegistration::unregister`]
/// leaves the entry behind; the locator overwrites it on the next publish
/// with the same identifier.
pub struct PortRegistration {
    agent: ureq::Agent,
    id: String,
}

impl PortRegistration {
    /// Publishes the identifier/port pairing with the locator.
    pub fn register(
        document: &Path,
        install: &InstallDescriptor,
        port: u16,
    ) -> Result<Self, RegistrationError> {
        let id = launch_id(document, install);
        let agent = AgentBuilder::new().timeout(LOCATOR_TIMEOUT).build();

        let url = format!(
            "{}/publish?{}={}Port={}%0D%0A",
            SERVICE_LOCATOR, id, BASE_RESPONSE, port
        );
        tracing::debug!("Registering port {} as {}", port, id);
        check_status(agent.get(&url).call())?;

        Ok(Self { agent, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deletes the entry and consumes the registration.
    pub fn unregister(self) -> Result<(), RegistrationError> {
        let url = format!("{}/delete?{}", SERVICE_LOCATOR, self.id);
        tracing::debug!("Withdrawing registration {}", self.id);
        check_status(self.agent.get(&url).call())
    }
}

fn check_status(result: Result<ureq::Response, ureq::Error>) -> Result<(), RegistrationError> {
    match result {
        Ok(response) if response.status() > 299 => {
            Err(RegistrationError::Rejected(response.status()))
        }
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(code, _)) => Err(RegistrationError::Rejected(code)),
        Err(e) => Err(RegistrationError::Transport(e.to_string())),
    }
}

// ── Async wrappers ─────────────────────────────────────────
// ureq는 동기 클라이언트이므로 tokio 컨텍스트에서는 블로킹 스레드풀을
// 거칩니다.

/// `PortRegistration::register`의 비동기 래퍼.
pub async fn register_async(
    document: PathBuf,
    install: InstallDescriptor,
    port: u16,
) -> Result<PortRegistration, RegistrationError> {
    match tokio::task::spawn_blocking(move || PortRegistration::register(&document, &install, port))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => Err(RegistrationError::Transport(format!(
            "Registration task failed: {}",
            e
        ))),
    }
}

/// `PortRegistration::unregister`의 비동기 래퍼.
pub async fn unregister_async(registration: PortRegistration) -> Result<(), RegistrationError> {
    match tokio::task::spawn_blocking(move || registration.unregister()).await {
        Ok(outcome) => outcome,
        Err(e) => Err(RegistrationError::Transport(format!(
            "Deregistration task failed: {}",
            e
        ))),
    }
}
