pub mod error;
pub mod job;
pub mod lang;
pub mod status;
pub mod store;
pub mod submit;
pub mod time;
pub mod view;

pub use error::{QueueError, Result};
pub use job::{JobId, JobRow, JobState, PendingJob};
pub use lang::normalize;
pub use status::aggregate;
pub use store::{Claim, Field, JobStore, QueueEntry};
pub use submit::submit;
pub use view::{view_job, Completion, JobView};

// Default locations
pub const DEFAULT_SHARE_ROOT: &str = "/share";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/transq/config.yaml";
pub const DEFAULT_TIMEZONE: &str = "Asia/Taipei";

// Result texts recorded for jobs that could not be translated
pub const EMPTY_INPUT_RESULT: &str = "[Error] Input file is empty.";
pub const START_FAILURE_RESULT: &str = "[Error] Unable to start translation process.";
pub const TIMEOUT_RESULT: &str = "[Error] Translation timed out.";
pub const TRANSLATE_ERROR_PREFIX: &str = "[Translate Error]\n";
