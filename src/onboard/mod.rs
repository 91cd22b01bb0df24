//! AI-assisted site onboarding
//!
//! Fetch → reduce → infer → validate, end to end. Every stage failure is
//! reported with the stage that failed; nothing is written back unless the
//! validator produced a validated selector value. A whole attempt shares
//! one deadline; running out of it fails the current stage as a timeout.

use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, PageFetcher};
use crate::infer::{ContentProposal, ListingProposal, SelectorInference};
use crate::meta::MetaDb;
use crate::reduce::{reduce, ReductionStats};
use crate::validate::{ContentValidation, ListingValidation, SelectorValidator};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Deadline for one onboarding attempt unless configured otherwise
pub const DEFAULT_ONBOARD_TIMEOUT: Duration = Duration::from_secs(180);

/// Pipeline stage an onboarding attempt stopped at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnboardingStage {
    Fetch,
    Reduce,
    Inference,
    Validation,
}

impl std::fmt::Display for OnboardingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnboardingStage::Fetch => write!(f, "fetch"),
            OnboardingStage::Reduce => write!(f, "reduce"),
            OnboardingStage::Inference => write!(f, "inference"),
            OnboardingStage::Validation => write!(f, "validation"),
        }
    }
}

/// Outcome of listing-selector onboarding
#[derive(Debug, Clone, Serialize)]
pub struct ListingOnboarding {
    pub url: String,
    pub valid: bool,
    pub failed_stage: Option<OnboardingStage>,
    pub message: String,
    /// The failure was transient and the same attempt may succeed later
    pub retryable: bool,
    pub proposal: Option<ListingProposal>,
    pub validation: Option<ListingValidation>,
    pub reduction: Option<ReductionStats>,
}

impl ListingOnboarding {
    fn failed(url: &str, stage: OnboardingStage, error: &Error) -> Self {
        Self {
            url: url.to_string(),
            valid: false,
            failed_stage: Some(stage),
            message: error.to_string(),
            retryable: error.is_retryable(),
            proposal: None,
            validation: None,
            reduction: None,
        }
    }

    /// Write the validated selector to a site
    pub async fn apply(&self, db: &MetaDb, site_id: &str) -> Result<()> {
        let validated = self
            .validation
            .as_ref()
            .and_then(ListingValidation::validated)
            .ok_or_else(|| Error::Validation(format!("listing selector for {} was not validated", self.url)))?;
        db.apply_listing_selector(site_id, validated).await
    }
}

/// Outcome of content-selector onboarding
#[derive(Debug, Clone, Serialize)]
pub struct ContentOnboarding {
    pub url: String,
    pub valid: bool,
    pub failed_stage: Option<OnboardingStage>,
    pub message: String,
    /// The failure was transient and the same attempt may succeed later
    pub retryable: bool,
    pub proposal: Option<ContentProposal>,
    pub validation: Option<ContentValidation>,
    pub reduction: Option<ReductionStats>,
}

impl ContentOnboarding {
    fn failed(url: &str, stage: OnboardingStage, error: &Error) -> Self {
        Self {
            url: url.to_string(),
            valid: false,
            failed_stage: Some(stage),
            message: error.to_string(),
            retryable: error.is_retryable(),
            proposal: None,
            validation: None,
            reduction: None,
        }
    }

    pub async fn apply(&self, db: &MetaDb, site_id: &str) -> Result<()> {
        let validated = self
            .validation
            .as_ref()
            .and_then(ContentValidation::validated)
            .ok_or_else(|| Error::Validation(format!("content selectors for {} were not validated", self.url)))?;
        db.apply_content_selectors(site_id, validated).await
    }
}

/// End-to-end selector onboarding
pub struct Onboarder {
    fetcher: Arc<dyn PageFetcher>,
    options: FetchOptions,
    inference: SelectorInference,
    validator: SelectorValidator,
    timeout: Duration,
}

impl Onboarder {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        options: FetchOptions,
        inference: SelectorInference,
        validator: SelectorValidator,
    ) -> Self {
        Self {
            fetcher,
            options,
            inference,
            validator,
            timeout: DEFAULT_ONBOARD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one stage against the attempt's deadline
    async fn within<T>(
        &self,
        deadline: Instant,
        stage: OnboardingStage,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout_at(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "onboarding exceeded {}s during the {} stage",
                self.timeout.as_secs_f32(),
                stage
            ))),
        }
    }

    /// Fetch and reduce a page, naming the stage on failure
    async fn prepare(
        &self,
        url: &str,
        deadline: Instant,
    ) -> std::result::Result<(String, ReductionStats), (OnboardingStage, Error)> {
        let page = self
            .within(deadline, OnboardingStage::Fetch, self.fetcher.fetch_rendered(url, &self.options))
            .await
            .map_err(|e| (OnboardingStage::Fetch, e))?;

        let reduced = reduce(&page.html);
        if reduced.html.trim().is_empty() {
            return Err((
                OnboardingStage::Reduce,
                Error::Parsing(format!("nothing left of {} after reduction", url)),
            ));
        }
        info!(
            "Reduced {} from {} to {} chars (~{} tokens)",
            url, reduced.stats.original_size, reduced.stats.reduced_size, reduced.stats.estimated_token_count
        );
        Ok((reduced.html, reduced.stats))
    }

    pub async fn onboard_listing(&self, url: &str) -> ListingOnboarding {
        let deadline = Instant::now() + self.timeout;
        let (html, stats) = match self.prepare(url, deadline).await {
            Ok(prepared) => prepared,
            Err((stage, e)) => {
                warn!("Listing onboarding for {} stopped at {}: {}", url, stage, e);
                return ListingOnboarding::failed(url, stage, &e);
            }
        };

        let inferred = self
            .within(deadline, OnboardingStage::Inference, self.inference.infer_listing_selector(&html, url))
            .await;
        let proposal = match inferred {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!("Listing inference for {} failed: {}", url, e);
                let mut report = ListingOnboarding::failed(url, OnboardingStage::Inference, &e);
                report.reduction = Some(stats);
                return report;
            }
        };

        let validation = self
            .within(
                deadline,
                OnboardingStage::Validation,
                self.validator.validate_listing_selector(url, &proposal.selector),
            )
            .await;
        let mut report = ListingOnboarding {
            url: url.to_string(),
            valid: false,
            failed_stage: None,
            message: String::new(),
            retryable: false,
            proposal: Some(proposal),
            validation: None,
            reduction: Some(stats),
        };
        match validation {
            Ok(validation) => {
                report.valid = validation.valid;
                report.message = validation.message.clone();
                if !validation.valid {
                    report.failed_stage = Some(OnboardingStage::Validation);
                }
                report.validation = Some(validation);
            }
            Err(e) => {
                report.failed_stage = Some(OnboardingStage::Validation);
                report.message = e.to_string();
                report.retryable = e.is_retryable();
            }
        }
        report
    }

    pub async fn onboard_content(&self, url: &str) -> ContentOnboarding {
        let deadline = Instant::now() + self.timeout;
        let (html, stats) = match self.prepare(url, deadline).await {
            Ok(prepared) => prepared,
            Err((stage, e)) => {
                warn!("Content onboarding for {} stopped at {}: {}", url, stage, e);
                return ContentOnboarding::failed(url, stage, &e);
            }
        };

        let inferred = self
            .within(deadline, OnboardingStage::Inference, self.inference.infer_content_selectors(&html, url))
            .await;
        let proposal = match inferred {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!("Content inference for {} failed: {}", url, e);
                let mut report = ContentOnboarding::failed(url, OnboardingStage::Inference, &e);
                report.reduction = Some(stats);
                return report;
            }
        };

        let selectors = proposal.to_selectors();
        let validation = self
            .within(
                deadline,
                OnboardingStage::Validation,
                self.validator.validate_content_selectors(url, &selectors),
            )
            .await;
        let mut report = ContentOnboarding {
            url: url.to_string(),
            valid: false,
            failed_stage: None,
            message: String::new(),
            retryable: false,
            proposal: Some(proposal),
            validation: None,
            reduction: Some(stats),
        };
        match validation {
            Ok(validation) => {
                report.valid = validation.valid;
                report.message = validation.message.clone();
                if !validation.valid {
                    report.failed_stage = Some(OnboardingStage::Validation);
                }
                report.validation = Some(validation);
            }
            Err(e) => {
                report.failed_stage = Some(OnboardingStage::Validation);
                report.message = e.to_string();
                report.retryable = e.is_retryable();
            }
        }
        report
    }
}
