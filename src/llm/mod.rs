//! LLM 层：补全服务抽象与实现（OpenAI 兼容 / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, GEMINI_BASE_URL, GEMINI_FLASH};
pub use traits::{LlmClient, TokenStream};
