//! Chat-completions client for the LLM collaborators
//!
//! Talks to any OpenAI-compatible chat-completions endpoint and
//! implements all three collaborator traits. Model output is treated as
//! untrusted input: replies must be a single JSON object matching the
//! expected shape, anything else surfaces as `ExternalUnavailable` and
//! routes to the caller's fallback handling.

use async_trait::async_trait;
use ideaforge_common::model::{Idea, IdeaLabel, IDEAS_PER_BATCH};
use ideaforge_common::{Error, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{ContributionRequest, IdeaAssessor, IdeaContributor, SemanticGrouper};
use crate::session::clusters::ClusterDraft;

/// HTTP timeout; the coordinator applies its own per-call bound on top
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings for the chat endpoint
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl ChatConfig {
    /// Read configuration from the environment. Returns `None` when no
    /// endpoint is configured; the service then runs with collaborators
    /// disabled.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("IDEAFORGE_LLM_BASE_URL").ok()?;
        if base_url.is_empty() {
            return None;
        }
        Some(Self {
            base_url,
            api_key: std::env::var("IDEAFORGE_LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("IDEAFORGE_LLM_MODEL")
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }
}

/// Client for an OpenAI-compatible chat-completions API
pub struct ChatClient {
    http: Client,
    config: ChatConfig,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            http: Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail with static config"),
            config,
        }
    }

    /// One chat turn; returns the assistant message body
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.model,
            "temperature": 0.7,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::ExternalUnavailable(format!("chat endpoint: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ExternalUnavailable(format!(
                "chat endpoint returned {}",
                status
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalUnavailable(format!("chat response body: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::ExternalUnavailable("chat response had no choices".into()))?;

        debug!(chars = content.len(), model = %self.config.model, "chat completion received");
        Ok(content)
    }
}

/// Strip a Markdown code fence if the model wrapped its JSON in one
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn parse_reply<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| Error::ExternalUnavailable(format!("malformed collaborator reply: {}", e)))
}

fn context_block(company_context: Option<&str>) -> String {
    match company_context {
        Some(ctx) if !ctx.trim().is_empty() => format!("Company context:\n{}\n\n", ctx.trim()),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct ContributionReply {
    ideas: Vec<String>,
}

#[async_trait]
impl IdeaContributor for ChatClient {
    async fn generate(
        &self,
        request: &ContributionRequest,
    ) -> Result<[String; IDEAS_PER_BATCH]> {
        let system = "You are a participant in a 6-3-5 brainwriting workshop helping a \
                      small or medium enterprise find digitalization opportunities. \
                      Reply with a single JSON object: {\"ideas\": [\"...\", \"...\", \"...\"]}. \
                      No prose, no Markdown.";
        let sheet = if request.sheet_ideas.is_empty() {
            "The sheet is still empty.".to_string()
        } else {
            format!(
                "Ideas already on this sheet:\n- {}",
                request.sheet_ideas.join("\n- ")
            )
        };
        let user = format!(
            "{}You are {:?} in round {}. {}\n\nBuild on the existing ideas and add exactly 3 new, \
             concrete, distinct ideas.",
            context_block(request.company_context.as_deref()),
            request.participant_name,
            request.round,
            sheet,
        );

        let reply: ContributionReply = parse_reply(&self.chat(system, &user).await?)?;
        let cleaned: Vec<String> = reply
            .ideas
            .into_iter()
            .map(|idea| idea.trim().to_string())
            .filter(|idea| !idea.is_empty())
            .collect();
        <[String; IDEAS_PER_BATCH]>::try_from(cleaned).map_err(|v: Vec<String>| {
            Error::ExternalUnavailable(format!(
                "contributor returned {} usable ideas (need {})",
                v.len(),
                IDEAS_PER_BATCH
            ))
        })
    }
}

#[derive(Debug, Deserialize)]
struct GroupingReply {
    clusters: Vec<ClusterDraft>,
}

#[async_trait]
impl SemanticGrouper for ChatClient {
    async fn group(
        &self,
        ideas: &[Idea],
        company_context: Option<&str>,
    ) -> Result<Vec<ClusterDraft>> {
        let system = "You group workshop ideas into 4 to 7 thematic clusters for an SME \
                      digitalization consultation. Every idea id must appear in exactly one \
                      cluster. Labels business_impact, implementation_effort and \
                      maturity_appropriateness take the values \"low\", \"medium\" or \"high\". \
                      Reply with a single JSON object: {\"clusters\": [{\"name\": \"...\", \
                      \"description\": \"...\", \"member_idea_ids\": [\"...\"], \
                      \"business_impact\": \"...\", \"implementation_effort\": \"...\", \
                      \"maturity_appropriateness\": \"...\", \"impact_rationale\": \"...\", \
                      \"maturity_rationale\": \"...\"}]}. No prose, no Markdown.";
        let listing: String = ideas
            .iter()
            .map(|idea| format!("{}: {}", idea.id, idea.text))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "{}Ideas to cluster:\n{}",
            context_block(company_context),
            listing
        );

        let reply: GroupingReply = parse_reply(&self.chat(system, &user).await?)?;
        Ok(reply.clusters)
    }
}

#[derive(Debug, Deserialize)]
struct AssessmentReply {
    ideas: Vec<IdeaLabel>,
}

#[async_trait]
impl IdeaAssessor for ChatClient {
    async fn assess(
        &self,
        ideas: &[Idea],
        company_context: Option<&str>,
    ) -> Result<Vec<IdeaLabel>> {
        let system = "You assess workshop ideas for an SME digitalization consultation. \
                      For every idea estimate business_impact and implementation_effort \
                      (\"low\", \"medium\" or \"high\") with a one-sentence impact_rationale. \
                      Reply with a single JSON object: {\"ideas\": [{\"idea_id\": \"...\", \
                      \"business_impact\": \"...\", \"implementation_effort\": \"...\", \
                      \"impact_rationale\": \"...\"}]}. No prose, no Markdown.";
        let listing: String = ideas
            .iter()
            .map(|idea| format!("{}: {}", idea.id, idea.text))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "{}Ideas to assess:\n{}",
            context_block(company_context),
            listing
        );

        let reply: AssessmentReply = parse_reply(&self.chat(system, &user).await?)?;
        Ok(reply.ideas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence_variants() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn test_parse_reply_rejects_prose() {
        let err = parse_reply::<ContributionReply>("Sure! Here are some ideas...").unwrap_err();
        assert!(matches!(err, Error::ExternalUnavailable(_)));
    }

    #[test]
    fn test_parse_contribution_reply() {
        let reply: ContributionReply =
            parse_reply(r#"{"ideas": ["one", "two", "three"]}"#).unwrap();
        assert_eq!(reply.ideas.len(), 3);
    }

    #[test]
    fn test_parse_grouping_reply_validates_labels() {
        let raw = r#"{"clusters": [{
            "name": "Automation",
            "description": "Process automation ideas",
            "member_idea_ids": ["s0r1n1"],
            "business_impact": "high",
            "implementation_effort": "medium",
            "maturity_appropriateness": "low",
            "impact_rationale": "cuts manual effort",
            "maturity_rationale": "requires groundwork"
        }]}"#;
        let reply: GroupingReply = parse_reply(raw).unwrap();
        assert_eq!(reply.clusters.len(), 1);

        let bad = raw.replace("\"high\"", "\"enormous\"");
        assert!(parse_reply::<GroupingReply>(&bad).is_err());
    }
}
