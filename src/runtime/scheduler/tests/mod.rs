//! Scheduler 单元测试
//!
//! 测试任务标识、任务构建、取消令牌和运行时配置

mod queue;

use crate::runtime::scheduler::{
    CancelToken, CoroStatus, QueueKind, RuntimeConfig, ShutdownPolicy, TaskBuilder, TaskId,
    TaskIdGenerator,
};

#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_inner() {
        let id = TaskId(7);
        assert_eq!(id.inner(), 7);
        assert_eq!(TaskId::from(7), id);
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(42).to_string(), "Task(42)");
    }

    #[test]
    fn test_task_id_generator_is_monotonic() {
        let ids = TaskIdGenerator::new();
        let a = ids.next();
        let b = ids.next();
        let c = ids.next();
        assert!(a < b && b < c);
        assert_eq!(ids.issued(), 3);
    }

    #[test]
    fn test_task_id_generator_concurrent_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let ids = Arc::new(TaskIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                thread::spawn(move || (0..1000).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}

#[cfg(test)]
mod task_tests {
    use super::*;
    use crate::runtime::scheduler::{Task, WorkerContext};

    fn finish(_cx: &mut WorkerContext<'_>) -> CoroStatus {
        CoroStatus::Done
    }

    #[test]
    fn test_coro_status() {
        assert!(CoroStatus::Done.is_done());
        assert!(!CoroStatus::Running.is_done());
        assert_eq!(CoroStatus::Running.to_string(), "running");
        assert_eq!(CoroStatus::Done.to_string(), "done");
    }

    #[test]
    fn test_task_new() {
        let task = Task::new(TaskId(3), finish);
        assert_eq!(task.id(), TaskId(3));
        assert_eq!(task.name(), None);
        assert_eq!(task.steps(), 0);
    }

    #[test]
    fn test_task_builder_name() {
        let task = TaskBuilder::new()
            .name("loader")
            .build(TaskId(1), finish);
        assert_eq!(task.name(), Some("loader"));
        let debug = format!("{:?}", task);
        assert!(debug.contains("loader"));
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        shared.cancel();
        assert!(token.is_cancelled());
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_runtime_config_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.num_workers, 0);
        assert_eq!(config.queue_kind, QueueKind::Locked);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Drain);
        assert!(!config.tracing);
        assert!(config.resolved_workers() >= 1);
    }

    #[test]
    fn test_runtime_config_with_workers() {
        let config = RuntimeConfig::with_workers(3);
        assert_eq!(config.resolved_workers(), 3);
        assert_eq!(config.idle_timeout().as_micros(), 1_000);
    }

    #[test]
    fn test_runtime_config_serde_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            num_workers = 2
            queue_kind = "lock-free"
            shutdown_policy = "abandon"
            "#,
        )
        .unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.queue_kind, QueueKind::LockFree);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Abandon);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.thread_name, "corun-worker");
    }

    #[test]
    fn test_queue_kind_from_str() {
        assert_eq!("locked".parse::<QueueKind>().unwrap(), QueueKind::Locked);
        assert_eq!("Mutex".parse::<QueueKind>().unwrap(), QueueKind::Locked);
        assert_eq!("lock-free".parse::<QueueKind>().unwrap(), QueueKind::LockFree);
        assert_eq!("ring".parse::<QueueKind>().unwrap(), QueueKind::LockFree);
        assert!("stack".parse::<QueueKind>().is_err());
        assert_eq!(QueueKind::LockFree.to_string(), "lock-free");
    }
}
