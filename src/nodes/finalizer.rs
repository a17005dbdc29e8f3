//! Finalizer：汇总子任务结果，生成面向用户的最终回复
//!
//! 只有 ads 非空时 prompt 里才出现广告清单与规则块。模型输出之后还要过一遍 sanitize：
//! 后面跟着 (Sponsored) 标记的 Markdown 链接视为赞助链接（中间允许空白、换行与 `*` / `_` 强调符），
//! 锚文本不在任何广告原文里的降级为纯文本；没有挂在合法赞助链接上的 (Sponsored) 标记一律删除。

use std::sync::{Arc, OnceLock};

use regex::{Captures, Regex};

use crate::core::AgentState;
use crate::llm::{LlmClient, Message};

pub const NO_RESULTS_PLACEHOLDER: &str = "No sub-task results available.";
pub const FINALIZE_FALLBACK: &str = "Result not available.";
const SPONSORED: &str = "(Sponsored)";
const SYSTEM_PROMPT: &str = "You are an expert at synthesizing information and generating final user-facing responses.";

/// Markdown 链接（可带强调符，URL 允许一层嵌套括号）及其后可选的 (Sponsored) 标记，或单独的标记
fn sponsored_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"[*_]*\[(?P<anchor>[^\]]*)\]\((?:[^()\s]|\([^()\s]*\))*\)[*_]*",
            r"(?P<marker>[\s*_]*\((?i:sponsored)\)[*_]*)?",
            r"|[ \t]*[*_]*\((?i:sponsored)\)[*_]*",
        ))
        .expect("valid sponsored-link regex")
    })
}

pub fn render_results(state: &AgentState) -> String {
    if state.results.is_empty() {
        return NO_RESULTS_PLACEHOLDER.to_string();
    }
    state
        .results
        .iter()
        .map(|r| format!("- {}: {}", r.subtask, r.result))
        .collect::<Vec<_>>()
        .join("\n")
}

fn ads_block(ads: &[String]) -> String {
    let list = ads
        .iter()
        .enumerate()
        .map(|(i, ad)| format!("{}. {}", i + 1, ad))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "\n3. **Available Ads:**\n{list}\n\n\
         **Ad Rules (mandatory):**\n\
         - Only use ads that appear verbatim in the Available Ads list above.\n\
         - Never invent, rephrase or guess an ad, a product name or a link.\n\
         - Format every ad you include as a Markdown link followed by \"{SPONSORED}\", e.g. [Product](https://example.com) {SPONSORED}.\n\
         - Weave each ad into the response where it fits the context; do not append a list of ads at the end.\n"
    )
}

/// 汇总 prompt
pub fn finalize_prompt(state: &AgentState) -> String {
    let (ads, final_no) = if state.ads.is_empty() {
        (String::new(), 3)
    } else {
        (ads_block(&state.ads), 4)
    };
    format!(
        "You are an AI assistant responsible for crafting a final, comprehensive response to a user's request.\n\n\
         You have access to:\n\
         - The original task.\n\
         - The results of various sub-tasks.\n\n\
         **Formatting:**\n\
         - The entire response should be in Markdown format.\n\
         - Be clear, polite, and directly address the user's request using the information provided.\n\n\
         Here is the input:\n\n\
         1. **Original Task:**\n{task}\n\n\
         2. **Sub-task Results:**\n{results}\n{ads}\n\
         {final_no}. Using all the above information, write a final user-facing response that fully and clearly addresses the task: '{task}'.\n\n\
         Final Response:\n",
        task = state.task,
        results = render_results(state),
    )
}

/// 按广告来源规则清理模型输出
pub fn sanitize_sponsored(text: &str, ads: &[String]) -> String {
    sponsored_pattern()
        .replace_all(text, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            match (caps.name("anchor"), caps.name("marker")) {
                // 普通链接
                (Some(_), None) => whole.to_string(),
                (Some(anchor), Some(_)) if is_grounded(anchor.as_str(), ads) => whole.to_string(),
                (Some(anchor), Some(_)) => anchor.as_str().to_string(),
                (None, _) => String::new(),
            }
        })
        .into_owned()
}

fn is_grounded(anchor: &str, ads: &[String]) -> bool {
    let anchor = anchor.trim();
    !anchor.is_empty() && ads.iter().any(|ad| ad.contains(anchor))
}

/// Finalizer 节点
pub struct Finalizer {
    llm: Option<Arc<dyn LlmClient>>,
}

impl Finalizer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// 写入 final_result；失败时写入固定兜底文本
    pub async fn finalize(&self, mut state: AgentState) -> AgentState {
        let text = match self.llm.as_ref() {
            None => FINALIZE_FALLBACK.to_string(),
            Some(llm) => {
                let messages = [Message::system(SYSTEM_PROMPT), Message::user(finalize_prompt(&state))];
                match llm.complete(&messages).await {
                    Ok(text) => sanitize_sponsored(&text, &state.ads),
                    Err(e) => {
                        tracing::warn!(thread_id = %state.thread_id, error = %e, "final synthesis failed");
                        FINALIZE_FALLBACK.to_string()
                    }
                }
            }
        };
        state.final_result = Some(text);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn state() -> AgentState {
        let mut s = AgentState::new("Find running shoes", "t1");
        s.record_result("search", "Agent execution result: three options");
        s
    }

    #[test]
    fn test_prompt_without_ads_has_no_ad_rules() {
        let prompt = finalize_prompt(&state());
        assert!(prompt.contains("- search: Agent execution result: three options"));
        assert!(!prompt.contains("Sponsored"));
        assert!(!prompt.contains("Ad Rules"));
        let empty = finalize_prompt(&AgentState::new("t", "t1"));
        assert!(empty.contains(NO_RESULTS_PLACEHOLDER));
    }

    #[test]
    fn test_prompt_with_ads_lists_them() {
        let mut s = state();
        s.ads.push("Buy Acme Shoes at https://acme.example".into());
        let prompt = finalize_prompt(&s);
        assert!(prompt.contains("1. Buy Acme Shoes at https://acme.example"));
        assert!(prompt.contains("Never invent"));
        assert!(prompt.contains("4. Using all the above information"));
    }

    #[test]
    fn test_sanitize_without_ads_strips_markers() {
        let text = "Try [Acme Shoes](https://acme.example) (Sponsored) today. Also great (Sponsored).";
        let out = sanitize_sponsored(text, &[]);
        assert_eq!(out, "Try Acme Shoes today. Also great.");
        assert!(!out.contains("(Sponsored)"));
    }

    #[test]
    fn test_sanitize_keeps_only_grounded_links() {
        let ads = vec!["Buy Acme Shoes at https://acme.example".to_string()];
        let text = "[Acme Shoes](https://acme.example) (Sponsored) and [Zeta Socks](https://zeta.example) (Sponsored)";
        assert_eq!(
            sanitize_sponsored(text, &ads),
            "[Acme Shoes](https://acme.example) (Sponsored) and Zeta Socks"
        );
    }

    fn acme() -> Vec<String> {
        vec!["Buy Acme Shoes".to_string()]
    }

    #[test]
    fn test_sanitize_emphasised_ungrounded_links() {
        let ads = acme();
        assert_eq!(
            sanitize_sponsored("Try **[Zoom Kicks](https://zoom.example)** (Sponsored) today.", &ads),
            "Try Zoom Kicks today."
        );
        assert_eq!(
            sanitize_sponsored("Try [Zoom Kicks](https://zoom.example) *(Sponsored)* today.", &ads),
            "Try Zoom Kicks today."
        );
        assert_eq!(
            sanitize_sponsored("Try _[Zoom Kicks](https://zoom.example)_ _(sponsored)_ today.", &ads),
            "Try Zoom Kicks today."
        );
    }

    #[test]
    fn test_sanitize_marker_on_next_line() {
        assert_eq!(
            sanitize_sponsored("Try [Zoom Kicks](https://zoom.example)\n(Sponsored) today.", &acme()),
            "Try Zoom Kicks today."
        );
    }

    #[test]
    fn test_sanitize_url_with_parentheses() {
        assert_eq!(
            sanitize_sponsored("See [Zoom Kicks](https://zoom.example/shoe_(red)) (Sponsored).", &acme()),
            "See Zoom Kicks."
        );
    }

    #[test]
    fn test_sanitize_keeps_grounded_and_plain_links() {
        let ads = acme();
        let grounded = "Grab **[Buy Acme Shoes](https://acme.example)** (Sponsored) now.";
        assert_eq!(sanitize_sponsored(grounded, &ads), grounded);
        let plain = "Read [the docs](https://docs.example/a_(b)) first.";
        assert_eq!(sanitize_sponsored(plain, &ads), plain);
    }

    #[test]
    fn test_sanitize_drops_detached_marker_with_ads() {
        assert_eq!(sanitize_sponsored("Nice shoes *(Sponsored)*, really.", &acme()), "Nice shoes, really.");
    }

    #[tokio::test]
    async fn test_finalize_success_and_fallback() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::scripted(vec![Ok("Here you go".into()), Err("down".into())]));
        let finalizer = Finalizer::new(Some(llm));
        let done = finalizer.finalize(state()).await;
        assert_eq!(done.final_result.as_deref(), Some("Here you go"));
        let failed = finalizer.finalize(state()).await;
        assert_eq!(failed.final_result.as_deref(), Some(FINALIZE_FALLBACK));
        let none = Finalizer::new(None).finalize(state()).await;
        assert_eq!(none.final_result.as_deref(), Some(FINALIZE_FALLBACK));
    }
}
