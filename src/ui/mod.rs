//! Console output for command results
//!
//! Interactive terminals get symbols and color; hooks, pipes and CI get
//! bracketed plain-text markers.
//!
//! # Example
//!
//! ```rust,ignore
//! use keel::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::section(&ctx, "Build");
//! ui::step_ok_detail(&ctx, "configure", "12ms");
//! ui::step_warn_hint(&ctx, "Build already running", "Retry when it finishes");
//! ```

mod context;
mod output;

pub use context::{UiContext, HOOK_ENV};
pub use output::{
    format_duration, key_value, key_value_status, remark, section, step_info, step_ok,
    step_ok_detail, step_warn_hint,
};
