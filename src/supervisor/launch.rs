//! Launch preparation.
//!
//! 스폰 전에 결정되는 모든 것: 실제로 띄울 실행 파일, 문서 경로 해석,
//! 인수 벡터 구성. 검증을 여기로 모아 소켓 대기 전에 실패하게 합니다.

use super::error::SupervisorError;
use crate::install::InstallDescriptor;
use std::path::{Path, PathBuf};

/// Dialog suppression flag understood by the development environment.
const UNATTENDED_FLAG: &str = "-unattended";

/// Separator between host flags and the arguments forwarded to the program.
const ARG_SEPARATOR: &str = "--";

/// True when the target should be launched directly instead of through an
/// installed environment.
pub fn is_executable_target(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("exe")
    )
}

/// 고정 인수 꼬리: 선택적 다이얼로그 억제 플래그, 구분자, 포트 마커.
/// 사용자 인수는 이 뒤에 붙습니다.
pub fn base_arguments(port: u16, suppress_dialogs: bool) -> Vec<String> {
    let mut args = Vec::new();
    if suppress_dialogs {
        args.push(UNATTENDED_FLAG.to_string());
    }
    args.push(ARG_SEPARATOR.to_string());
    args.push(format!("-p:{}", port));
    args
}

/// Everything the caller decides about a launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// VI, executable or other document to run.
    pub document: PathBuf,
    /// Resolved installation. Not needed for direct executable targets.
    pub install: Option<InstallDescriptor>,
    /// Channel port the host must connect back to.
    pub port: u16,
    /// Adds the unattended flag so the environment shows no dialogs.
    pub suppress_dialogs: bool,
    /// Arguments forwarded to the program after the separator.
    pub user_args: Vec<String>,
}

/// A validated launch: the executable exists and the argument vector is
/// fully built. Produced by [`LaunchSpec::prepare`].
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub executable: PathBuf,
    /// Resolved document path when launching through an installation.
    /// `None` for direct executable targets.
    pub document: Option<PathBuf>,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Resolves this description into a concrete launch plan.
    ///
    /// 실행 파일 타겟은 최소 장식으로 그대로 실행합니다. 그 외에는 설치가
    /// 필요하고, 문서가 현재 위치에 없으면 설치의 도구 디렉토리에서 한 번
    /// 더 찾습니다. 확장자가 없으면 .vi로 간주합니다.
    pub fn prepare(self) -> Result<LaunchPlan, SupervisorError> {
        if is_executable_target(&self.document) {
            return self.prepare_executable();
        }
        self.prepare_document()
    }

    fn prepare_executable(self) -> Result<LaunchPlan, SupervisorError> {
        if !self.document.exists() {
            return Err(SupervisorError::ExecutableNotFound(self.document));
        }

        // Built applications manage their own dialogs, so the unattended
        // flag is never passed here.
        let mut args = base_arguments(self.port, false);
        args.extend(self.user_args);

        Ok(LaunchPlan {
            executable: self.document,
            document: None,
            args,
        })
    }

    fn prepare_document(self) -> Result<LaunchPlan, SupervisorError> {
        let install = self.install.ok_or(SupervisorError::NoInstallation)?;

        let mut document = self.document;
        if document.extension().is_none() {
            document.set_extension("vi");
            tracing::debug!("No extension on the target, assuming {}", document.display());
        }

        if !document.exists() {
            let fallback = install.tools_path().join(&document);
            if fallback.exists() {
                tracing::debug!("Resolved {} in the tools directory", document.display());
                document = fallback;
            }
        }
        if !document.exists() {
            return Err(SupervisorError::DocumentNotFound(document));
        }

        let mut args = vec![document.to_string_lossy().into_owned()];
        args.extend(base_arguments(self.port, self.suppress_dialogs));
        args.extend(self.user_args);

        Ok(LaunchPlan {
            executable: install.executable_path(),
            document: Some(document),
            args,
        })
    }
}
