//! Onboarding commands: infer and validate selectors for a site

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{FetchOptions, PageFetcher};
use crate::infer::{OpenAiCompatClient, SelectorInference};
use crate::meta::MetaDb;
use crate::onboard::{ContentOnboarding, ListingOnboarding, Onboarder};
use crate::validate::SelectorValidator;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct OnboardOptions {
    /// Site whose fetch settings are used and, with `apply`, updated
    pub site_id: Option<String>,
    pub apply: bool,
}

async fn build_onboarder(
    config: &Config,
    db: &MetaDb,
    fetcher: Arc<dyn PageFetcher>,
    options: &OnboardOptions,
) -> Result<Onboarder> {
    if options.apply && options.site_id.is_none() {
        return Err(Error::Config("--apply needs --site".to_string()));
    }

    let fetch_options = match &options.site_id {
        Some(id) => FetchOptions::for_site(&config.fetch, &db.require_site(id).await?),
        None => FetchOptions::from_config(&config.fetch),
    };

    let client = Arc::new(OpenAiCompatClient::from_config(&config.llm)?);
    Ok(Onboarder::new(
        fetcher.clone(),
        fetch_options.clone(),
        SelectorInference::new(client),
        SelectorValidator::new(fetcher, fetch_options, config.validation.clone()),
    )
    .with_timeout(config.llm.onboard_timeout()))
}

pub async fn cmd_onboard_listing(
    config: &Config,
    db: &MetaDb,
    fetcher: Arc<dyn PageFetcher>,
    url: &str,
    options: OnboardOptions,
) -> Result<ListingOnboarding> {
    let onboarder = build_onboarder(config, db, fetcher, &options).await?;
    let report = onboarder.onboard_listing(url).await;

    if let (true, true, Some(site_id)) = (options.apply, report.valid, &options.site_id) {
        report.apply(db, site_id).await?;
        info!("Applied listing selector to {}", site_id);
    }
    Ok(report)
}

pub async fn cmd_onboard_content(
    config: &Config,
    db: &MetaDb,
    fetcher: Arc<dyn PageFetcher>,
    url: &str,
    options: OnboardOptions,
) -> Result<ContentOnboarding> {
    let onboarder = build_onboarder(config, db, fetcher, &options).await?;
    let report = onboarder.onboard_content(url).await;

    if let (true, true, Some(site_id)) = (options.apply, report.valid, &options.site_id) {
        report.apply(db, site_id).await?;
        info!("Applied content selectors to {}", site_id);
    }
    Ok(report)
}

fn print_stage(valid: bool, failed_stage: Option<crate::onboard::OnboardingStage>, message: &str, retryable: bool) {
    match (valid, failed_stage) {
        (true, _) => println!("✓ Valid: {}", message),
        (false, Some(stage)) => println!("✗ Failed at {} stage: {}", stage, message),
        (false, None) => println!("✗ Invalid: {}", message),
    }
    if retryable {
        println!("  Transient failure, retry later.");
    }
}

pub fn print_listing_onboarding(report: &ListingOnboarding, applied_to: Option<&str>) {
    println!("\n🧭 Listing selector for {}\n", report.url);

    if let Some(stats) = &report.reduction {
        println!(
            "Reduced HTML: {} → {} chars ({:.1}% smaller, ~{} tokens)",
            stats.original_size, stats.reduced_size, stats.reduction_percentage, stats.estimated_token_count
        );
    }
    if let Some(proposal) = &report.proposal {
        println!("Proposed: {}", proposal.selector);
        println!("Confidence: {:.2}", proposal.confidence);
        if !proposal.rationale.is_empty() {
            println!("Rationale: {}", proposal.rationale);
        }
    }
    if let Some(validation) = &report.validation {
        println!("Matched URLs: {}", validation.count);
        println!("Specificity: {}/100", validation.specificity_score);
        for url in validation.urls.iter().take(5) {
            println!("  • {}", url);
        }
    }
    println!();
    print_stage(report.valid, report.failed_stage, &report.message, report.retryable);

    match applied_to {
        Some(site_id) if report.valid => println!("Saved to site '{}'.", site_id),
        Some(_) => println!("Nothing saved."),
        None => {}
    }
}

pub fn print_content_onboarding(report: &ContentOnboarding, applied_to: Option<&str>) {
    println!("\n🧭 Content selectors for {}\n", report.url);

    if let Some(stats) = &report.reduction {
        println!(
            "Reduced HTML: {} → {} chars ({:.1}% smaller, ~{} tokens)",
            stats.original_size, stats.reduced_size, stats.reduction_percentage, stats.estimated_token_count
        );
    }
    if let Some(proposal) = &report.proposal {
        println!("Title: {}", proposal.title_selector);
        println!("Body: {}", proposal.content_selector);
        for (name, value) in [
            ("Image", &proposal.image_selector),
            ("Date", &proposal.date_selector),
            ("Author", &proposal.author_selector),
            ("Category", &proposal.category_selector),
        ] {
            if let Some(value) = value {
                println!("{}: {}", name, value);
            }
        }
        println!("Confidence: {:.2}", proposal.confidence);
    }
    if let Some(validation) = &report.validation {
        let preview = &validation.extracted;
        println!("\nPreview:");
        if let Some(title) = &preview.title {
            println!("  Title: {}", title);
        }
        if let Some(content) = &preview.content {
            let excerpt: String = content.chars().take(200).collect();
            println!("  Body: {}{}", excerpt, if content.chars().count() > 200 { "…" } else { "" });
        }
        for (name, value) in [
            ("Image", &preview.image),
            ("Date", &preview.date),
            ("Author", &preview.author),
            ("Category", &preview.category),
        ] {
            if let Some(value) = value {
                println!("  {}: {}", name, value);
            }
        }
        if !preview.tags.is_empty() {
            println!("  Tags: {}", preview.tags.join(", "));
        }
    }
    println!();
    print_stage(report.valid, report.failed_stage, &report.message, report.retryable);

    match applied_to {
        Some(site_id) if report.valid => println!("Saved to site '{}'.", site_id),
        Some(_) => println!("Nothing saved."),
        None => {}
    }
}
