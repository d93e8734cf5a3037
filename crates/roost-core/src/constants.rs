//! Application-wide constants.

/// Root prefix under which every staged object lives.
pub const STAGING_PREFIX: &str = "temp";

/// Length of the opaque staging session token, in characters.
pub const SESSION_TOKEN_LENGTH: usize = 32;

/// Name of the cookie that carries the staging session token.
pub const SESSION_COOKIE_NAME: &str = "roost_staging";

/// Path segment used in staging keys when the upload has no target entity yet.
pub const UNASSIGNED_ENTITY_SEGMENT: &str = "new";

/// Longest edge of the canonical `Original` variant unless configured otherwise.
pub const DEFAULT_ORIGINAL_MAX_DIMENSION: u32 = 2048;

/// Fixed crop sizes (width, height) for the derived raster variants.
pub const LARGE_SIZE: (u32, u32) = (1200, 800);
pub const MEDIUM_SIZE: (u32, u32) = (800, 533);
pub const THUMBNAIL_SIZE: (u32, u32) = (300, 200);

/// Content type of every transcoded raster variant.
pub const CANONICAL_IMAGE_MIME: &str = "image/webp";

/// File extension of every transcoded raster variant.
pub const CANONICAL_IMAGE_EXTENSION: &str = "webp";
