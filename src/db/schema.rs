/// Schema for the shared state database.
pub const SCHEMA: &str = r#"
-- Queued mutating requests awaiting a successful replay
CREATE TABLE IF NOT EXISTS pending_actions (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    data BLOB NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_actions_timestamp ON pending_actions(timestamp);
CREATE INDEX IF NOT EXISTS idx_pending_actions_type ON pending_actions(type);

-- Named response buckets (url -> last successful response)
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_url ON response_cache(url_hash);
"#;
