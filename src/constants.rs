//! Protocol constants and default configuration values

use std::time::Duration;

/// Default ARI HTTP endpoint (Asterisk's built-in HTTP server)
pub const DEFAULT_BASE_URL: &str = "http://localhost:8088";

/// Path prefix for every ARI resource
pub const ARI_PATH_PREFIX: &str = "/ari";

/// Default Stasis application name the event stream subscribes as
pub const DEFAULT_APP_NAME: &str = "simple_ivr";

/// Total attempts for a command before giving up on connectivity failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Fixed delay between command attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay before re-opening a dropped event stream
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Per-request HTTP timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the language menu waits for a digit
pub const DEFAULT_DIGIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Upper bound on a single caller recording
pub const DEFAULT_RECORDING_MAX_DURATION: Duration = Duration::from_secs(10);

/// Maximum number of decoded events buffered between the reader task and the consumer
pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;

/// Digit that switches the call to the alternate language
pub const ALTERNATE_LANGUAGE_DIGIT: char = '1';

/// Container format for caller recordings
pub const DEFAULT_RECORDING_FORMAT: &str = "wav";

/// Channel variable toggled to enable or disable digit reporting
pub const DIGIT_DETECTION_VARIABLE: &str = "DIGIT_DETECTION";

/// Media URI scheme for playing back a stored recording
pub const RECORDING_MEDIA_SCHEME: &str = "recording:";

/// Default prompt media references
pub const PROMPT_WELCOME: &str = "sound:welcome_message";
/// Language selection menu prompt.
pub const PROMPT_LANGUAGE_MENU: &str = "sound:language_selection";
/// Welcome prompt in the alternate language.
pub const PROMPT_ALTERNATE_WELCOME: &str = "sound:welcome_message_alt";

/// Log level used when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Rolled-over log files kept when logging to a file
pub const DEFAULT_LOG_BACKUP_COUNT: usize = 5;
