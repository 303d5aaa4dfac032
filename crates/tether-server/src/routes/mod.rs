mod health;
mod runs;

pub use health::healthz;
pub use runs::{create_run, get_run, get_run_result, RunBody};
