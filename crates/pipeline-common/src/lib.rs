//! # Pipeline Common
//!
//! Building blocks shared by the recorder pipeline:
//!
//! - Output path resolution: token templates, per-OS filename sanitization
//!   and collision-free file reservation (`" (part N)"` suffixes)
//! - [`CompletionBarrier`], an explicit join over a fixed set of conditions
//!   that fires exactly once when all of them hold at the same time
//!

mod completion;
mod utils;

pub use completion::CompletionBarrier;
pub use utils::{
    DEFAULT_FILE_STEM, TargetOs, TemplateContext, TemplateError, TimeFormat, part_path,
    render_channel_template, render_template, reserve_file, resolve_output_path,
    sanitize_channel_name, sanitize_path,
};
