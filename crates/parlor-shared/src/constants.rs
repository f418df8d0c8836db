/// Application name
pub const APP_NAME: &str = "Parlor";

/// Reserved receiver token addressing every connected user
pub const EVERYONE: &str = "everyone";

/// Separator between the two participants of a conversation key.
/// Control characters are rejected inside user identifiers.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Messages retained per conversation before the oldest are evicted
pub const HISTORY_LIMIT: usize = 100;

/// Maximum file upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// URL prefix under which stored uploads are served
pub const DOWNLOAD_PATH_PREFIX: &str = "/api/files/download/";
