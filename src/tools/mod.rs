//! 能力层：Tool trait、注册表、带超时的执行器，以及 MCP / google_search 两类具体能力

pub mod capability;
pub mod echo;
pub mod executor;
pub mod mcp;
pub mod registry;
pub mod schema;
pub mod search;

pub use capability::{CapabilityProvider, CapabilitySet, McpCapabilityProvider, StaticCapabilities};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use mcp::{McpConnection, McpServerConfig, McpTool};
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use search::{GoogleSearchTool, GOOGLE_SEARCH_TOOL};
