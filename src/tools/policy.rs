//! Company policy lookup
//!
//! The policy document is a markdown FAQ fetched once over HTTP and
//! cached for the life of the process. Lookup scores each `##`
//! section by keyword overlap with the question and returns the best
//! match.

use super::{Sensitivity, Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::LazyLock;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Source of the Swiss Airlines FAQ document
pub const SWISS_FAQ_URL: &str =
    "https://storage.googleapis.com/benchmarks-artifacts/travel-db/swiss_faq.md";

static SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s+(.+)$").expect("valid pattern"));

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to fetch policy document: {0}")]
    Fetch(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
struct PolicySection {
    heading: String,
    body: String,
}

/// Lazily fetched, process-cached policy document
pub struct PolicyService {
    client: reqwest::Client,
    url: String,
    sections: OnceCell<Vec<PolicySection>>,
}

impl PolicyService {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            sections: OnceCell::new(),
        }
    }

    /// Build from an already-fetched document (for testing)
    pub fn from_document(text: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: String::new(),
            sections: OnceCell::new_with(Some(parse_sections(text))),
        }
    }

    /// Answer a policy question with the best-matching FAQ section
    pub async fn lookup(&self, query: &str) -> Result<String, PolicyError> {
        let sections = self
            .sections
            .get_or_try_init(|| async {
                let text = self
                    .client
                    .get(&self.url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                Ok::<_, PolicyError>(parse_sections(&text))
            })
            .await?;

        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(ToString::to_string)
            .collect();

        let best = sections
            .iter()
            .map(|s| {
                let haystack = format!("{}\n{}", s.heading, s.body).to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (score, s)
            })
            .filter(|(score, _)| *score > 0)
            .max_by_key(|(score, _)| *score);

        Ok(match best {
            Some((_, section)) => format!("## {}\n{}", section.heading, section.body),
            None => "No policy information found for that question.".to_string(),
        })
    }
}

fn parse_sections(text: &str) -> Vec<PolicySection> {
    let mut sections = Vec::new();
    let mut matches = SECTION_HEADING.captures_iter(text).peekable();
    while let Some(cap) = matches.next() {
        let heading = cap[1].trim().to_string();
        let body_start = cap.get(0).map_or(0, |m| m.end());
        let body_end = matches
            .peek()
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        sections.push(PolicySection {
            heading,
            body: text[body_start..body_end].trim().to_string(),
        });
    }
    sections
}

/// Consult company policy before committing to an answer
pub struct LookupPolicyTool;

#[derive(Debug, Deserialize)]
struct LookupPolicyInput {
    query: String,
}

#[async_trait]
impl Tool for LookupPolicyTool {
    fn name(&self) -> &'static str {
        "lookup_policy"
    }

    fn description(&self) -> String {
        "Consult the company policies to check whether an option is permitted, for example change fees, cancellation windows, or baggage rules.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The policy question to answer"
                }
            }
        })
    }

    fn sensitivity(&self) -> Sensitivity {
        Sensitivity::Safe
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: LookupPolicyInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        match ctx.policy().lookup(&input.query).await {
            Ok(answer) => ToolOutput::success(answer),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::test_context;

    const DOC: &str = "# FAQ\n\n## Cancellations\nTickets may be cancelled up to 24 hours before departure without a fee.\n\n## Baggage\nOne carry-on bag up to 8kg is included in all fares.\n\n## Pets\nSmall pets may travel in the cabin.";

    #[tokio::test]
    async fn lookup_returns_the_best_matching_section() {
        let service = PolicyService::from_document(DOC);
        let answer = service.lookup("what is the baggage allowance").await.unwrap();
        assert!(answer.contains("## Baggage"));
        assert!(answer.contains("carry-on"));
    }

    #[tokio::test]
    async fn lookup_without_a_match_says_so() {
        let service = PolicyService::from_document(DOC);
        let answer = service.lookup("zzzz qqqq").await.unwrap();
        assert!(answer.contains("No policy information"));
    }

    #[test]
    fn parse_sections_splits_on_headings() {
        let sections = parse_sections(DOC);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, "Cancellations");
        assert!(sections[2].body.contains("cabin"));
    }

    #[tokio::test]
    async fn policy_tool_answers_via_the_service() {
        let ctx = test_context(None);
        let result = LookupPolicyTool
            .run(json!({"query": "cancel my ticket fee"}), ctx)
            .await;
        assert!(result.success);
        assert!(result.output.contains("Cancellations"));
    }
}
