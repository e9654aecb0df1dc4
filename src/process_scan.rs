//! OS process table queries for the supervisor.
//!
//! 핸드오프 감지의 기반: 추적 중인 프로세스가 죽었을 때 같은 실행 파일로
//! 이미 떠 있는 다른 인스턴스를 찾아 추적을 넘겨받습니다. 판정 기준은
//! 실행 파일 모듈 경로의 정확한 일치입니다.

use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },
}

/// 프로세스 테이블에서 읽은 한 항목의 스냅샷
#[derive(Debug, Clone)]
pub struct RunningProcess {
    pub pid: u32,
    pub name: String,
    pub executable_path: Option<PathBuf>,
}

/// Finds running processes whose resolved module path equals `path`.
///
/// The process name is only a prefilter; the decision is exact equality of
/// the full executable path, so two installs of the same product never get
/// confused. Symlinked or relocated copies of the executable will not match.
pub fn find_by_exe_path(path: &Path) -> Vec<RunningProcess> {
    let file_name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_lowercase(),
        None => return Vec::new(),
    };

    let mut sys = System::new_all();
    sys.refresh_all();

    let matches: Vec<RunningProcess> = sys
        .processes()
        .iter()
        .filter(|(_, process)| process.name().to_lowercase() == file_name)
        .filter(|(_, process)| process.exe() == Some(path))
        .map(|(pid, process)| RunningProcess {
            pid: pid.as_u32(),
            name: process.name().to_string(),
            executable_path: process.exe().map(Path::to_path_buf),
        })
        .collect();

    tracing::debug!(
        "Found {} instance(s) of {}",
        matches.len(),
        path.display()
    );
    matches
}

/// 특정 PID가 실행 중인지 확인 (크로스 플랫폼)
pub fn is_running(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).is_some()
}

/// Force-kill a process by PID. Cross-platform helper.
///
/// 핸드오프로 입양한 프로세스는 자식 핸들이 없으므로 PID 기반으로만 종료할
/// 수 있습니다. 스폰한 자식에도 동일 경로를 사용해 종료 경로를 하나로 유지.
pub fn force_kill(pid: u32) -> Result<(), ScanError> {
    #[cfg(target_os = "windows")]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
        use winapi::um::winnt::PROCESS_TERMINATE;

        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                return Err(ScanError::TerminationFailed {
                    pid,
                    reason: format!("Failed to open process {}", pid),
                });
            }

            let result = TerminateProcess(handle, 1);
            CloseHandle(handle);

            if result == 0 {
                return Err(ScanError::TerminationFailed {
                    pid,
                    reason: "TerminateProcess failed".to_string(),
                });
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            return Err(ScanError::TerminationFailed {
                pid,
                reason: format!("Failed to send signal: {}", e),
            });
        }
    }

    Ok(())
}

// ── Async wrappers ─────────────────────────────────────────
// sysinfo 호출은 동기적으로 OS 프로세스 테이블 전체를 스캔합니다.
// tokio 워커 스레드에서 직접 호출하면 런타임이 블로킹되므로
// spawn_blocking을 통해 전용 블로킹 스레드풀에서 실행합니다.

/// `find_by_exe_path`의 비동기 래퍼.
pub async fn find_by_exe_path_async(path: &Path) -> Vec<RunningProcess> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || find_by_exe_path(&path))
        .await
        .unwrap_or_default()
}

/// `is_running`의 비동기 래퍼.
pub async fn is_running_async(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || is_running(pid))
        .await
        .unwrap_or(false)
}

/// `force_kill`의 비동기 래퍼.
pub async fn force_kill_async(pid: u32) -> Result<(), ScanError> {
    tokio::task::spawn_blocking(move || force_kill(pid))
        .await
        .unwrap_or_else(|e| {
            Err(ScanError::TerminationFailed {
                pid,
                reason: format!("Kill task failed: {}", e),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_running() {
        assert!(is_running(std::process::id()));
    }

    #[test]
    fn test_unlikely_pid_is_not_running() {
        // PID 공간 바깥의 값 — 리눅스 기본 pid_max(4194304)보다 큼
        assert!(!is_running(u32::MAX - 1));
    }

    #[test]
    fn test_find_by_exe_path_no_match_for_unknown_path() {
        let matches = find_by_exe_path(Path::new("/nonexistent/dir/no-such-binary.exe"));
        assert!(matches.is_empty());
    }

    #[test]
    fn test_find_by_exe_path_rejects_pathless_input() {
        assert!(find_by_exe_path(Path::new("/")).is_empty());
    }

    #[test]
    fn test_force_kill_unknown_pid_fails() {
        // i32 범위 안의 값이어야 유닉스 kill(2)에 음수(프로세스 그룹)로
        // 넘어가지 않음. pid_max보다 훨씬 커서 실존할 수 없는 PID.
        let result = force_kill(i32::MAX as u32);
        assert!(matches!(
            result,
            Err(ScanError::TerminationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_async_wrappers_delegate() {
        assert!(is_running_async(std::process::id()).await);
        let matches = find_by_exe_path_async(Path::new("/nonexistent/no-such-binary.exe")).await;
        assert!(matches.is_empty());
    }
}
