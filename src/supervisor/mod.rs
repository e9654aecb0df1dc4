//! Process Supervisor
//!
//! Owns the lifetime of the launched application: spawn, liveness polling,
//! single-instance hand-off, forced termination. One tracking task per
//! launch; the [`Supervisor`] handle observes it through single-fire gates
//! and an event stream.
//!
//! 공유 상태 규칙: 추적 핸들(자식/입양 PID)은 추적 태스크만 바꿉니다.
//! 핸들 쪽 kill은 PID 기반이라 핸들 소유권이 필요 없고, 죽음은 다음 폴에서
//! 정상 경로로 감지됩니다.

pub mod error;
mod launch;
mod tracker;

pub use error::SupervisorError;
pub use launch::{base_arguments, is_executable_target, LaunchPlan, LaunchSpec};

use crate::process_scan;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Event buffer between the tracking task and the handle. Hand-offs are
/// rare, so a short queue never fills in practice and `close` unblocks the
/// sender regardless.
const EVENT_BUFFER: usize = 32;

/// 추적 태스크가 핸들 쪽으로 올리는 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Tracking handed off to an already running instance.
    Switched { pid: u32 },
    /// Final termination. `code` is only known for the child we spawned
    /// ourselves; after a switch it is advisory at best and stays `None`.
    Exited { code: Option<i32>, switched: bool },
}

/// Handle to one launched process and its tracking task.
pub struct Supervisor {
    launch_pid: u32,
    current_pid: Arc<AtomicU32>,
    exited: watch::Receiver<bool>,
    events: mpsc::Receiver<SupervisorEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Spawns the process described by `plan` on a dedicated tracking task
    /// and waits until the started gate fires. Spawn failures resolve the
    /// gate with the error instead.
    pub async fn launch(plan: LaunchPlan) -> Result<Self, SupervisorError> {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (exited_tx, exited) = watch::channel(false);
        let (started_tx, started_rx) = oneshot::channel();
        let current_pid = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let tracker = tracker::Tracker {
            executable: plan.executable,
            args: plan.args,
            events: events_tx,
            exited: exited_tx,
            current_pid: current_pid.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(tracker.run(started_tx));

        let launch_pid = match started_rx.await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(SupervisorError::Tracking(
                    "tracking task stopped before the launch completed".to_string(),
                ))
            }
        };

        Ok(Self {
            launch_pid,
            current_pid,
            exited,
            events,
            cancel,
            task,
        })
    }

    /// PID of the instance currently tracked. Changes on hand-off.
    pub fn pid(&self) -> u32 {
        self.current_pid.load(Ordering::SeqCst)
    }

    /// PID of the process we originally spawned.
    pub fn launch_pid(&self) -> u32 {
        self.launch_pid
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Next tracking notification. `None` once the tracking task is gone.
    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        self.events.recv().await
    }

    /// Waits for final termination. Returns immediately when already exited.
    pub async fn wait_exited(&mut self) {
        while !self.has_exited() {
            // Err는 추적 태스크가 종료 없이 끝난 경우 — 기다릴 것이 없음
            if self.exited.changed().await.is_err() {
                break;
            }
        }
    }

    /// Forcibly terminates the tracked instance. Safe to call twice and a
    /// no-op once the process has exited. The death is observed by the
    /// tracking loop on its next poll like any other.
    pub async fn kill(&self) {
        if self.has_exited() {
            return;
        }
        let pid = self.pid();
        tracing::info!("Forcing PID {} to stop", pid);
        if let Err(e) = process_scan::force_kill_async(pid).await {
            // 이미 죽은 경계 타이밍도 여기로 옴
            tracing::warn!("{}", e);
        }
    }

    /// Stops tracking and waits for the task to finish. The process itself
    /// is left alone; pair with [`Supervisor::kill`] when it should die too.
    pub async fn close(self) {
        self.cancel.cancel();
        let Supervisor { task, events, .. } = self;
        // 이벤트 수신자를 먼저 놓아 태스크가 송신 대기에 묶이지 않게 함
        drop(events);
        if let Err(e) = task.await {
            tracing::warn!("Tracking task ended abnormally: {}", e);
        }
    }
}
