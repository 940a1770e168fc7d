// detection
pub const DEFAULT_BASE_BRANCH: &str = "dev";
pub const DEFAULT_REMOTE: &str = "origin";

// conversion
pub const FILENAME_HASH_LEN: usize = 10;
pub const OUTPUT_DIR_PREFIX: &str = "yaml2json_";

// delivery
pub const USER_AGENT: &str = concat!("yaml-courier/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: f64 = 15.0;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;
pub const MAX_BACKOFF_SECS: f64 = 300.0;

// summary
pub const BODY_PREVIEW_CHARS: usize = 200;

// exit codes
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
