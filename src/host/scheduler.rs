//! 협조적 태스크 스케줄러
//!
//! 데몬 루프가 `tick_interval_ms`마다 `poll_due`를 호출합니다.
//! 스케줄러 자체는 아무것도 실행하지 않고, 기한이 된 태스크 목록만 돌려줍니다.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::ModuleId;

pub type TaskId = u64;

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub owner: ModuleId,
    pub name: String,
    pub function: String,
    /// None이면 원샷
    pub interval: Option<Duration>,
    pub next_due: Instant,
}

/// API 응답용 요약
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub function: String,
    pub interval_secs: Option<u64>,
}

impl From<&ScheduledTask> for TaskSummary {
    fn from(task: &ScheduledTask) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            function: task.function.clone(),
            interval_secs: task.interval.map(|d| d.as_secs()),
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskScheduler {
    tasks: Vec<ScheduledTask>,
    next_id: TaskId,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(
        &mut self,
        owner: ModuleId,
        name: &str,
        function: &str,
        delay: Duration,
        interval: Option<Duration>,
    ) -> TaskId {
        self.next_id += 1;
        let id = self.next_id;
        self.tasks.push(ScheduledTask {
            id,
            owner,
            name: name.to_string(),
            function: function.to_string(),
            interval,
            next_due: Instant::now() + delay,
        });
        id
    }

    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    /// owner의 모든 태스크 취소, 취소한 개수 반환
    pub fn cancel_owned_by(&mut self, owner: ModuleId) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.owner != owner);
        before - self.tasks.len()
    }

    pub fn owned_by(&self, owner: ModuleId) -> Vec<&ScheduledTask> {
        self.tasks.iter().filter(|t| t.owner == owner).collect()
    }

    pub fn has_task(&self, owner: ModuleId, name: &str) -> bool {
        self.tasks.iter().any(|t| t.owner == owner && t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `now` 기준으로 기한이 된 태스크를 꺼냅니다.
    /// `is_active(owner)`가 false인 소유자의 태스크는 건너뛰고 그대로 둡니다.
    /// 반복 태스크는 다시 예약되고 원샷 태스크는 제거됩니다.
    pub fn poll_due<F>(&mut self, now: Instant, is_active: F) -> Vec<ScheduledTask>
    where
        F: Fn(ModuleId) -> bool,
    {
        let mut due = Vec::new();
        self.tasks.retain_mut(|task| {
            if task.next_due > now || !is_active(task.owner) {
                return true;
            }
            due.push(task.clone());
            match task.interval {
                Some(interval) => {
                    task.next_due = now + interval;
                    true
                }
                None => false,
            }
        });
        due
    }
}
