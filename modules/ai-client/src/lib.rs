//! Thin client for OpenAI-compatible chat completion endpoints.
//!
//! Only the structured-output path is exposed: callers describe the shape they
//! want as a `schemars` type and get it back deserialized.
//!
//! ```rust,ignore
//! use ai_client::{OpenAi, StructuredOutput};
//!
//! #[derive(serde::Deserialize, schemars::JsonSchema)]
//! struct Mentions { group: Option<String> }
//!
//! let ai = OpenAi::new(key, "Qwen/Qwen3-Next-80B-A3B-Instruct")
//!     .with_base_url("https://api.siliconflow.cn/v1");
//! let m: Mentions = ai.extract("system prompt", "user prompt").await?;
//! ```

pub mod error;
pub mod openai;
pub mod util;

pub use error::AiError;
pub use openai::{OpenAi, StructuredOutput};
pub use util::{strip_code_blocks, truncate_to_char_boundary};
