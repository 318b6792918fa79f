pub mod start;
pub mod stop;

pub use start::{build_start_preview, start_application, StartOutcome, StartPreview};
pub use stop::{stop_application, StopOutcome};
