use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use ai_client::{truncate_to_char_boundary, OpenAi};
use cosdrama_common::{ExtractedMentions, IngestConfig, IngestError};

const MAX_DESCRIPTION_BYTES: usize = 8_000;

pub const EMPTY_INPUT_MESSAGE: &str = "nothing to extract from: title and description are both empty";

const SYSTEM_PROMPT: &str = r#"你是一个信息抽取助手。给定一个B站舞台剧视频的标题和简介，提取以下三个字段：

- competition: 比赛或活动名称，例如 ChinaJoy、BW、BML 等。
- group: 表演社团（社团）的名称。
- work_name: 表演的舞台剧作品名称。

规则：
- 请仅根据内容进行提取，不要臆造。
- 内容中没有明确提到的字段返回 null。
- 保留名称在原文中的写法，不要翻译或补全。"#;

// ---------------------------------------------------------------------------
// MentionExtractor
// ---------------------------------------------------------------------------

/// Pulls competition, group and work mentions out of a video's text.
#[async_trait]
pub trait MentionExtractor: Send + Sync {
    async fn extract(&self, title: &str, description: &str) -> Result<ExtractedMentions>;
}

pub struct LlmMentionExtractor {
    ai: OpenAi,
    system_prompt: String,
}

impl LlmMentionExtractor {
    pub fn new(ai: OpenAi) -> Self {
        Self {
            ai,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    /// Client pointed at the configured OpenAI-compatible endpoint.
    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        let ai = OpenAi::new(&config.openai_api_key, &config.llm_model)
            .with_base_url(&config.llm_base_url)
            .with_timeout(config.llm_timeout)?;
        Ok(Self::new(ai))
    }
}

pub fn build_user_prompt(title: &str, description: &str) -> String {
    let description = truncate_to_char_boundary(description, MAX_DESCRIPTION_BYTES);
    format!("标题：{title}\n\n简介：{description}")
}

#[async_trait]
impl MentionExtractor for LlmMentionExtractor {
    async fn extract(&self, title: &str, description: &str) -> Result<ExtractedMentions> {
        let user_prompt = build_user_prompt(title, description);
        let mentions: ExtractedMentions = self.ai.extract(&self.system_prompt, user_prompt).await?;
        Ok(mentions)
    }
}

// ---------------------------------------------------------------------------
// EntityExtractor
// ---------------------------------------------------------------------------

/// Result of the extraction stage. Failures leave every mention `None` and
/// land in `errors`; the item carries on.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub mentions: ExtractedMentions,
    pub logs: Vec<String>,
    pub errors: Vec<IngestError>,
}

pub struct EntityExtractor {
    extractor: Arc<dyn MentionExtractor>,
    timeout: Duration,
}

impl EntityExtractor {
    pub fn new(extractor: Arc<dyn MentionExtractor>, timeout: Duration) -> Self {
        Self { extractor, timeout }
    }

    pub async fn extract(&self, title: &str, description: &str) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();

        if title.trim().is_empty() && description.trim().is_empty() {
            outcome.logs.push("extraction skipped: empty title and description".to_string());
            outcome
                .errors
                .push(IngestError::Extraction(EMPTY_INPUT_MESSAGE.to_string()));
            return outcome;
        }

        let result = tokio::time::timeout(self.timeout, self.extractor.extract(title, description))
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", self.timeout))
            .and_then(|r| r);

        match result {
            Ok(raw) => {
                let mentions = raw.normalized();
                info!(
                    competition = ?mentions.competition,
                    group = ?mentions.group,
                    work = ?mentions.work_name,
                    "Extracted mentions"
                );
                outcome.logs.push(format!(
                    "extracted mentions: competition={}, group={}, work={}",
                    display(&mentions.competition),
                    display(&mentions.group),
                    display(&mentions.work_name),
                ));
                outcome.mentions = mentions;
            }
            Err(e) => {
                warn!(error = %e, "Mention extraction failed");
                outcome.logs.push(format!("extraction failed: {e}"));
                outcome.errors.push(IngestError::Extraction(e.to_string()));
            }
        }

        outcome
    }
}

fn display(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("null")
}
