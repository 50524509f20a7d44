/// Bumped whenever a column is appended to [`ADDED_COLUMNS`].
pub const SCHEMA_VERSION: i32 = 3;

pub const SCHEMA: &str = r#"
-- Photos table: one row per imported file
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE,
    taken_at TEXT,
    latitude REAL,
    longitude REAL,

    -- Descriptions
    description_ai TEXT,
    description_original TEXT,  -- captured on the first edit of an edit cycle
    is_edited INTEGER NOT NULL DEFAULT 0,

    -- Enrichment state: 'pending', 'processing', 'completed', 'failed'
    status TEXT NOT NULL DEFAULT 'pending',

    created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%f', 'now'))
);
"#;

/// Every column beyond `id` and `file_path`, in the order they were introduced.
/// Catalogs written by older releases get the missing ones appended; nothing
/// is ever dropped or renamed.
pub const ADDED_COLUMNS: &[(&str, &str)] = &[
    ("taken_at", "TEXT"),
    ("description_ai", "TEXT"),
    ("created_at", "TEXT"),
    ("latitude", "REAL"),
    ("longitude", "REAL"),
    ("status", "TEXT NOT NULL DEFAULT 'pending'"),
    ("description_original", "TEXT"),
    ("is_edited", "INTEGER NOT NULL DEFAULT 0"),
];

pub const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_photos_status ON photos(status);
CREATE INDEX IF NOT EXISTS idx_photos_created_at ON photos(created_at);
"#;

/// Full-text index over `description_ai`, one row per described photo.
pub const FTS_SCHEMA: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS photos_fts USING fts5(
    photo_id UNINDEXED,
    description,
    tokenize = 'porter unicode61'
);
"#;
