//! 引擎节点：Planner（拆解）、TaskExecutor（逐个执行子任务）、Finalizer（汇总）
//!
//! 每个节点自己吸收失败，不把错误抛给引擎。

pub mod executor;
pub mod finalizer;
pub mod planner;

pub use executor::{ExecutorOptions, TaskExecutor, AGENT_RESULT_PREFIX};
pub use finalizer::{finalize_prompt, sanitize_sponsored, Finalizer, FINALIZE_FALLBACK, NO_RESULTS_PLACEHOLDER};
pub use planner::{fallback_plan, parse_plan, planning_prompt, Planner};
