//! The tracking loop.
//!
//! 전용 태스크가 프로세스를 스폰하고 500ms 주기로 생존을 확인합니다.
//! 추적 대상이 죽으면 같은 실행 파일의 다른 인스턴스를 찾아보고, 있으면
//! 핸들을 넘겨받아 계속 추적합니다 (개발 환경의 단일 인스턴스 정책이
//! 기존 프로세스에 작업을 위임하고 우리가 띄운 쪽을 종료시키는 경우).
//! 최종 종료 시에만 exited 게이트와 Exited 이벤트가 정확히 한 번 발생.

use super::error::SupervisorError;
use super::SupervisorEvent;
use crate::process_scan::{self, RunningProcess};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Liveness poll interval.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the loop currently follows: the child we spawned, with a waitable
/// handle and therefore an exit code, or an adopted instance known only by
/// PID.
enum Tracked {
    Spawned(Child),
    Adopted(u32),
}

enum Liveness {
    Running,
    /// 종료 코드는 스폰한 자식에서만 관찰 가능. 입양한 PID는 항상 None.
    Exited(Option<i32>),
}

pub(super) struct Tracker {
    pub(super) executable: PathBuf,
    pub(super) args: Vec<String>,
    pub(super) events: mpsc::Sender<SupervisorEvent>,
    pub(super) exited: watch::Sender<bool>,
    pub(super) current_pid: Arc<AtomicU32>,
    pub(super) cancel: CancellationToken,
}

impl Tracker {
    /// Spawns the process and polls it until final termination or until the
    /// cancel token fires. The started gate resolves exactly once, before
    /// the first liveness check.
    pub(super) async fn run(self, started: oneshot::Sender<Result<u32, SupervisorError>>) {
        let child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = started.send(Err(e));
                return;
            }
        };
        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                let _ = started.send(Err(SupervisorError::Tracking(
                    "process handle lost before tracking began".to_string(),
                )));
                return;
            }
        };

        self.current_pid.store(pid, Ordering::SeqCst);
        let _ = started.send(Ok(pid));
        tracing::info!("Process launched with PID {}", pid);

        let mut tracked = Tracked::Spawned(child);
        let mut switched = false;
        let mut interval = tokio::time::interval(POLL_INTERVAL);

        let final_code = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Tracking stopped on request");
                    return;
                }
                _ = interval.tick() => {
                    if let Liveness::Exited(code) = check_liveness(&mut tracked).await {
                        let dead_pid = self.current_pid.load(Ordering::SeqCst);
                        match self.find_replacement(dead_pid).await {
                            Some(new_pid) => {
                                switched = true;
                                tracked = Tracked::Adopted(new_pid);
                                self.current_pid.store(new_pid, Ordering::SeqCst);
                                tracing::info!(
                                    "Process lost and found again at PID {}",
                                    new_pid
                                );
                                let _ = self
                                    .events
                                    .send(SupervisorEvent::Switched { pid: new_pid })
                                    .await;
                            }
                            None => break code,
                        }
                    }
                }
            }
        };

        match final_code {
            Some(0) => tracing::info!("Process exited normally"),
            Some(code) => tracing::error!("Process exited with code {}", code),
            None if switched => tracing::info!("Adopted process exited, no exit code available"),
            None => tracing::warn!("Process exited without an exit code"),
        }

        let _ = self.exited.send(true);
        let _ = self
            .events
            .send(SupervisorEvent::Exited {
                code: final_code,
                switched,
            })
            .await;
    }

    fn spawn(&self) -> Result<Child, SupervisorError> {
        tracing::info!(
            "Launching: {} {}",
            self.executable.display(),
            self.args.join(" ")
        );

        Command::new(&self.executable)
            .args(&self.args)
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| SupervisorError::Spawn {
                program: self.executable.clone(),
                reason: e.to_string(),
            })
    }

    async fn find_replacement(&self, dead_pid: u32) -> Option<u32> {
        let instances = process_scan::find_by_exe_path_async(&self.executable).await;
        select_replacement(&instances, dead_pid)
    }
}

async fn check_liveness(tracked: &mut Tracked) -> Liveness {
    match tracked {
        Tracked::Spawned(child) => match child.try_wait() {
            Ok(Some(status)) => Liveness::Exited(status.code()),
            Ok(None) => Liveness::Running,
            Err(e) => {
                tracing::warn!("Failed to poll the process: {}", e);
                Liveness::Exited(None)
            }
        },
        Tracked::Adopted(pid) => {
            if process_scan::is_running_async(*pid).await {
                Liveness::Running
            } else {
                Liveness::Exited(None)
            }
        }
    }
}

/// Picks the instance to hand tracking off to. 방금 죽은 PID는 프로세스
/// 테이블 스냅샷이 뒤처질 수 있으므로 제외합니다.
fn select_replacement(instances: &[RunningProcess], dead_pid: u32) -> Option<u32> {
    instances
        .iter()
        .map(|process| process.pid)
        .find(|pid| *pid != dead_pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn instance(pid: u32) -> RunningProcess {
        RunningProcess {
            pid,
            name: "LabVIEW.exe".to_string(),
            executable_path: Some(Path::new("/opt/lv/LabVIEW.exe").to_path_buf()),
        }
    }

    #[test]
    fn test_select_replacement_empty_means_final_exit() {
        assert_eq!(select_replacement(&[], 100), None);
    }

    #[test]
    fn test_select_replacement_adopts_other_instance() {
        let instances = [instance(200)];
        assert_eq!(select_replacement(&instances, 100), Some(200));
    }

    #[test]
    fn test_select_replacement_skips_the_dead_pid() {
        // 죽은 PID만 보이면 교체가 아님
        let instances = [instance(100)];
        assert_eq!(select_replacement(&instances, 100), None);

        let instances = [instance(100), instance(300)];
        assert_eq!(select_replacement(&instances, 100), Some(300));
    }
}
