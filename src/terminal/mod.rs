//! Terminal utilities for colored output and progress reporting.

pub mod colors;
pub mod progress;

pub use colors::{
    Styled, Symbols, print_error, print_info, print_success, print_warning, stdout_supports_color,
};
pub use progress::{ProgressBar, format_duration, print_summary};
