//! LLM-assisted selector inference
//!
//! Reduced HTML goes to a language model under a strict output schema.
//! The answer is parsed into a `SelectorProposal` that is never trusted on
//! its own: it has to pass the validator before anything is persisted.
//! Empty or schema-violating output is a hard `ModelOutput` error and the
//! engine never retries.

mod client;
mod prompts;

pub use client::*;
pub use prompts::*;

use crate::error::{Error, Result};
use crate::meta::ContentSelectors;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Proposed listing selector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingProposal {
    pub selector: String,
    pub confidence: f64,
    pub rationale: String,
}

/// Proposed content selectors; title and body are mandatory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentProposal {
    pub title_selector: String,
    pub content_selector: String,
    pub image_selector: Option<String>,
    pub date_selector: Option<String>,
    pub author_selector: Option<String>,
    pub category_selector: Option<String>,
    pub confidence: f64,
    pub rationale: String,
}

impl ContentProposal {
    pub fn to_selectors(&self) -> ContentSelectors {
        ContentSelectors {
            title: Some(self.title_selector.clone()),
            body: Some(self.content_selector.clone()),
            image: self.image_selector.clone(),
            date: self.date_selector.clone(),
            author: self.author_selector.clone(),
            category: self.category_selector.clone(),
            tags: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawListing {
    selector: String,
    confidence: f64,
    rationale: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawContent {
    title_selector: String,
    content_selector: String,
    image_selector: String,
    date_selector: String,
    author_selector: String,
    category_selector: String,
    confidence: f64,
    rationale: String,
}

fn check_confidence(confidence: f64) -> Result<f64> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(Error::ModelOutput(format!(
            "confidence {} is outside [0, 1]",
            confidence
        )))
    }
}

fn required(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::ModelOutput(format!("{} is empty", field)));
    }
    Ok(trimmed.to_string())
}

fn optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parse a listing answer exactly as the schema describes it
pub fn parse_listing_output(raw: &str) -> Result<ListingProposal> {
    let parsed: RawListing = serde_json::from_str(raw.trim())
        .map_err(|e| Error::ModelOutput(format!("listing output violates schema: {}", e)))?;

    Ok(ListingProposal {
        selector: required("selector", parsed.selector)?,
        confidence: check_confidence(parsed.confidence)?,
        rationale: parsed.rationale.trim().to_string(),
    })
}

/// Parse a content answer; empty optional fields become `None`
pub fn parse_content_output(raw: &str) -> Result<ContentProposal> {
    let parsed: RawContent = serde_json::from_str(raw.trim())
        .map_err(|e| Error::ModelOutput(format!("content output violates schema: {}", e)))?;

    Ok(ContentProposal {
        title_selector: required("title_selector", parsed.title_selector)?,
        content_selector: required("content_selector", parsed.content_selector)?,
        image_selector: optional(parsed.image_selector),
        date_selector: optional(parsed.date_selector),
        author_selector: optional(parsed.author_selector),
        category_selector: optional(parsed.category_selector),
        confidence: check_confidence(parsed.confidence)?,
        rationale: parsed.rationale.trim().to_string(),
    })
}

/// Selector inference over a completion client
#[derive(Clone)]
pub struct SelectorInference {
    client: Arc<dyn CompletionClient>,
}

impl SelectorInference {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    pub async fn infer_listing_selector(&self, reduced_html: &str, url: &str) -> Result<ListingProposal> {
        let request = CompletionRequest {
            system: LISTING_SYSTEM_PROMPT.to_string(),
            user: listing_user_prompt(url, reduced_html),
            schema_name: "listing_selector".to_string(),
            schema: listing_schema(),
        };

        let raw = self.client.complete(&request).await?;
        let proposal = parse_listing_output(&raw)?;
        info!(
            "{} proposed listing selector '{}' (confidence {:.2}) for {}",
            self.client.model_name(),
            proposal.selector,
            proposal.confidence,
            url
        );
        Ok(proposal)
    }

    pub async fn infer_content_selectors(&self, reduced_html: &str, url: &str) -> Result<ContentProposal> {
        let request = CompletionRequest {
            system: CONTENT_SYSTEM_PROMPT.to_string(),
            user: content_user_prompt(url, reduced_html),
            schema_name: "content_selectors".to_string(),
            schema: content_schema(),
        };

        let raw = self.client.complete(&request).await?;
        let proposal = parse_content_output(&raw)?;
        info!(
            "{} proposed content selectors title='{}' body='{}' (confidence {:.2}) for {}",
            self.client.model_name(),
            proposal.title_selector,
            proposal.content_selector,
            proposal.confidence,
            url
        );
        Ok(proposal)
    }
}
