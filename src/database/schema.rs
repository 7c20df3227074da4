pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS emoji (
        id INTEGER PRIMARY KEY,
        url TEXT UNIQUE NOT NULL,
        average_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS emoji_tags (
        emoji_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        FOREIGN KEY(emoji_id) REFERENCES emoji(id),
        FOREIGN KEY(tag_id) REFERENCES tags(id),
        PRIMARY KEY(emoji_id, tag_id)
    );

    CREATE INDEX IF NOT EXISTS idx_emoji_created_at ON emoji(created_at DESC, id DESC);
    CREATE INDEX IF NOT EXISTS idx_emoji_tags_tag ON emoji_tags(tag_id);
";
