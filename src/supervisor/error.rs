use std::path::PathBuf;
use thiserror::Error;

/// 런치 준비와 추적 단계에서 나오는 오류 유형
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Program to run does not exist: \"{0}\"")]
    DocumentNotFound(PathBuf),

    #[error("Executable to run does not exist: \"{0}\"")]
    ExecutableNotFound(PathBuf),

    #[error("No LabVIEW installation resolved to run the program")]
    NoInstallation,

    #[error("Failed to launch \"{program}\": {reason}")]
    Spawn { program: PathBuf, reason: String },

    #[error("Process tracking failed: {0}")]
    Tracking(String),
}
