//! Prompt templates for conversion scoring

use crate::context::BusinessContext;
use crate::scoring::ScoringMode;

/// System message sent alongside every scoring prompt
pub fn system_message(mode: ScoringMode) -> &'static str {
    match mode {
        ScoringMode::Keywords => "You are a keyword intent scoring expert.",
        ScoringMode::ContentTopics => "You are a content topic scoring expert.",
    }
}

/// Build the scoring prompt for one batch
pub fn build_scoring_prompt<S: AsRef<str>>(
    context: &BusinessContext,
    batch: &[S],
    mode: ScoringMode,
) -> String {
    format!(
        r#"You are a digital marketing expert for the following business:

Industry: {}
Business Description: {}
Conversion Goal: {}
Key Service/Product Pages: {}
Target Audience: {}

{}

Return scores in the format:
1. 5
2. 3
3. 2

{}:
{}
"#,
        context.industry.trim(),
        context.description.trim(),
        context.conversion_goal.trim(),
        context.services.trim(),
        context.audience.trim(),
        rubric(mode),
        list_heading(mode),
        numbered_list(batch)
    )
}

/// The five ordinal bands, worded per mode
fn rubric(mode: ScoringMode) -> &'static str {
    match mode {
        ScoringMode::Keywords => {
            r#"Your task is to score each keyword below from 1 to 5 based on likelihood of leading to a conversion:
- 5: Direct match to service-level page or very high commercial intent.
- 4: Closely related to services with clear intent.
- 3: Mid-funnel research or consideration intent.
- 2: Top-of-funnel informational queries.
- 1: Unrelated or low-intent content."#
        }
        ScoringMode::ContentTopics => {
            r#"Your task is to score each content topic idea below from 1 to 5 based on how likely content on that topic is to attract readers who convert:
- 5: Directly supports a service-level page or targets buyers ready to act.
- 4: Closely related to services and attracts readers with clear intent.
- 3: Mid-funnel research or comparison content.
- 2: Top-of-funnel educational content.
- 1: Unrelated or unlikely to attract potential customers."#
        }
    }
}

fn list_heading(mode: ScoringMode) -> &'static str {
    match mode {
        ScoringMode::Keywords => "Keywords",
        ScoringMode::ContentTopics => "Content topics",
    }
}

/// Render items as a 1-based numbered list
fn numbered_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}
