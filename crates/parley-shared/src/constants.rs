/// Event name for the online-identities snapshot.
pub const EVENT_PRESENCE_UPDATE: &str = "presence-update";

/// Event name for a direct message pushed to its receiver.
pub const EVENT_NEW_MESSAGE: &str = "new-message";

/// Reply to a client `ping` frame. Not part of the presence/delivery contract.
pub const EVENT_PONG: &str = "pong";

/// Cookie that carries the session token for browser clients.
pub const SESSION_COOKIE: &str = "jwt";

/// Query parameter that carries the session token on a WebSocket upgrade.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Minimum accepted password length at signup.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Maximum message text length in bytes (64 KiB)
pub const MAX_MESSAGE_TEXT: usize = 64 * 1024;

/// Session token lifetime when nothing else is configured.
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;

/// Avatar assigned to every new account until the user updates it.
pub const DEFAULT_PROFILE_PIC: &str = "https://static.vecteezy.com/system/resources/thumbnails/009/292/244/small/default-avatar-icon-of-social-media-user-vector.jpg";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3001;
