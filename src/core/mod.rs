//! 核心编排层：错误、运行状态、有限状态机引擎、进度事件投影、依赖构建

pub mod builder;
pub mod engine;
pub mod error;
pub mod events;
pub mod state;

pub use builder::AgentBuilder;
pub use engine::{handle_error, route, run_agent_task, EngineOptions, Phase, Route, RunDeps};
pub use error::AgentError;
pub use events::{EventProjector, RunStatus, UpdateEvent};
pub use state::{AgentState, Snapshot, SubtaskResult, ToolDescriptor};
