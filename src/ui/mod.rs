//! Terminal output
//!
//! Styled steps and an indicatif progress bar in a terminal, plain
//! `[OK]`/`[FAIL]` lines in CI, nothing at all when JSON was requested.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    key_value, outro_error, outro_success, remark, section, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::GroupProgress;
