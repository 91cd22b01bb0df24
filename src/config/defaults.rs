//! Default values for configuration

/// Default user agent
pub fn default_fetch_user_agent() -> String {
    format!(
        "Mozilla/5.0 (compatible; newshound/{}; +https://github.com/sealad886/newshound)",
        env!("CARGO_PKG_VERSION")
    )
}

/// Default static request timeout in seconds
pub fn default_fetch_timeout() -> u64 {
    30
}

/// Default navigation timeout for rendered fetches (30 seconds)
pub fn default_navigation_timeout() -> u64 {
    30000
}

/// Default wait-for-selector budget (5 seconds)
pub fn default_selector_wait() -> u64 {
    5000
}

/// Default settle time after navigation for late scripts
pub fn default_render_wait() -> u64 {
    1000
}

/// Default viewport width
pub fn default_viewport_width() -> u32 {
    1366
}

/// Default viewport height
pub fn default_viewport_height() -> u32 {
    900
}

/// Default: run the browser headless
pub fn default_headless() -> bool {
    true
}

/// Default rate limit (requests per second per host)
pub fn default_fetch_rate_limit() -> f64 {
    1.0
}

/// Default LLM endpoint (OpenAI-compatible)
pub fn default_llm_endpoint() -> String {
    std::env::var("NEWSHOUND_LLM_ENDPOINT")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

/// Default LLM model
pub fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default environment variable holding the LLM API key
pub fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Low temperature keeps selector proposals reproducible
pub fn default_llm_temperature() -> f32 {
    0.1
}

/// Default response token budget
pub fn default_llm_max_tokens() -> u32 {
    1000
}

/// Default LLM request timeout in seconds
pub fn default_llm_timeout() -> u64 {
    60
}

/// Default LLM requests per minute
pub fn default_llm_requests_per_minute() -> u32 {
    30
}

/// Default overall onboarding budget in seconds
pub fn default_onboard_timeout() -> u64 {
    180
}

/// Default discovery frequency in minutes
pub fn default_frequency_minutes() -> u32 {
    60
}

/// Default overall run timeout in seconds
pub fn default_run_timeout() -> u64 {
    120
}

/// Default store sync interval for a serving scheduler in seconds
pub fn default_sync_interval() -> u64 {
    30
}

/// Minimum URLs a listing selector must yield
pub fn default_min_listing_urls() -> usize {
    3
}

/// Minimum title length for content selectors
pub fn default_min_title_chars() -> usize {
    5
}

/// Minimum body length for content selectors
pub fn default_min_content_chars() -> usize {
    50
}

/// Selectors chained deeper than this are penalized
pub fn default_max_selector_depth() -> usize {
    5
}

/// Default: re-extraction disabled
pub fn default_reextract_allowed() -> bool {
    false
}

/// Default re-extraction cooldown in days
pub fn default_reextract_cooldown_days() -> u32 {
    7
}

/// Number of URLs kept on each run log
pub fn default_sample_urls() -> usize {
    5
}
