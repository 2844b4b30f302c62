//! 核心编排层：时间预算、Job 生命周期、错误分类与恢复、状态、主循环

pub mod budget;
pub mod error;
pub mod job;
pub mod recovery;
pub mod state;
pub mod turn_loop;

pub use budget::{BudgetParams, TimeBudget};
pub use error::{AgentError, ErrorKind};
pub use job::{Job, JobFailure, JobQuery, JobResult, JobStatus};
pub use recovery::{http_status, FailureStory, RecoveryEngine};
pub use state::{AttemptOutcome, LoopState};
pub use turn_loop::{
    run_attempt, AttemptStart, CheckpointReason, OrchestratorEvent, TurnSession,
};
