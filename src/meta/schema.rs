//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Sites: monitored outlets and their declared selectors
CREATE TABLE IF NOT EXISTS sites (
    id TEXT PRIMARY KEY,
    name TEXT,
    base_url TEXT NOT NULL,
    listing_url TEXT NOT NULL,
    test_url TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    listing_selectors_json TEXT NOT NULL,
    content_selectors_json TEXT NOT NULL,
    frequency_minutes INTEGER NOT NULL,
    fetch_strategy TEXT NOT NULL DEFAULT 'static',
    wait_for_selector TEXT,
    reextract_allowed INTEGER NOT NULL DEFAULT 0,
    reextract_cooldown_days INTEGER NOT NULL DEFAULT 7,
    last_successful_run TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- URL tracking: one row per URL ever discovered for a site
CREATE TABLE IF NOT EXISTS url_tracking (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL REFERENCES sites(id),
    url TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    domain TEXT NOT NULL,
    status TEXT NOT NULL,
    first_discovered_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    times_discovered INTEGER NOT NULL DEFAULT 1,
    title TEXT,
    image_url TEXT,
    reextract_allowed INTEGER NOT NULL DEFAULT 0,
    reextract_cooldown_days INTEGER NOT NULL DEFAULT 7,
    next_reextract_at TEXT,
    content_id TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_failure TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE(site_id, url_hash)
);

-- Discovery runs: append-only execution log
CREATE TABLE IF NOT EXISTS discovery_runs (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL,
    listing_url TEXT NOT NULL,
    outcome TEXT NOT NULL,
    found INTEGER NOT NULL DEFAULT 0,
    new_count INTEGER NOT NULL DEFAULT 0,
    duplicate INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    queued INTEGER NOT NULL DEFAULT 0,
    fetch_ms INTEGER NOT NULL DEFAULT 0,
    parse_ms INTEGER NOT NULL DEFAULT 0,
    total_ms INTEGER NOT NULL DEFAULT 0,
    fetch_method TEXT,
    http_status INTEGER,
    sample_urls_json TEXT,
    error_category TEXT,
    error_message TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_tracking_site ON url_tracking(site_id);
CREATE INDEX IF NOT EXISTS idx_tracking_status ON url_tracking(status);
CREATE INDEX IF NOT EXISTS idx_runs_site ON discovery_runs(site_id, started_at);
"#;
