//! Progress bar and end-of-run summary.

use super::colors::{Styled, Symbols, stdout_supports_color};
use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};

const BAR_WIDTH: usize = 20;
const FILLED: char = '\u{2588}';
const EMPTY: char = '\u{2591}';

/// Item counter rendered on a single terminal line.
pub struct ProgressBar {
    label: String,
    total: usize,
    current: usize,
    enabled: bool,
    color_enabled: bool,
    start_time: Instant,
}

impl ProgressBar {
    /// Create a progress bar; it renders only when `enabled` and stdout is a terminal.
    pub fn new(label: impl Into<String>, total: usize, enabled: bool) -> Self {
        Self {
            label: label.into(),
            total,
            current: 0,
            enabled: enabled && io::stdout().is_terminal(),
            color_enabled: stdout_supports_color(),
            start_time: Instant::now(),
        }
    }

    /// A bar that never renders.
    pub fn hidden(total: usize) -> Self {
        let mut bar = Self::new("", total, false);
        bar.enabled = false;
        bar
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Advance by `n` items.
    pub fn inc_by(&mut self, n: usize) {
        self.current = (self.current + n).min(self.total);
        if self.enabled {
            self.render();
        }
    }

    pub fn position(&self) -> usize {
        self.current
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64) * 100.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Estimated time remaining, once at least one item has completed.
    pub fn eta(&self) -> Option<Duration> {
        estimate_remaining(self.current, self.total, self.elapsed())
    }

    fn render(&self) {
        let percent = self.percentage();
        let filled = ((percent / 100.0) * BAR_WIDTH as f64) as usize;
        let bar: String = std::iter::repeat_n(FILLED, filled)
            .chain(std::iter::repeat_n(EMPTY, BAR_WIDTH.saturating_sub(filled)))
            .collect();
        let bar = Styled::with_color_support(bar, self.color_enabled).cyan();

        let eta = self
            .eta()
            .map(|d| format!(" ETA {}", format_duration(d)))
            .unwrap_or_default();

        print!(
            "\r{} [{}] {}/{} ({:.0}%){}\x1b[K",
            self.label, bar, self.current, self.total, percent, eta
        );
        let _ = io::stdout().flush();
    }

    /// Move past the bar line.
    pub fn finish(&self) {
        if self.enabled {
            println!();
        }
    }
}

/// Linear extrapolation of the remaining time.
pub fn estimate_remaining(done: usize, total: usize, elapsed: Duration) -> Option<Duration> {
    if done == 0 || done > total {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / done as f64;
    Some(Duration::from_secs_f64(per_item * (total - done) as f64))
}

/// Format a duration as `42s`, `3m 7s` or `2h 15m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Print the boxed end-of-run summary.
pub fn print_summary(title: &str, successful: usize, total: usize, elapsed: Duration) {
    let color_enabled = stdout_supports_color();
    let symbols = Symbols::new(color_enabled);

    let inner_width = 38;
    let horizontal: String = std::iter::repeat_n('\u{2500}', inner_width).collect();
    let vertical = '\u{2502}';

    println!();
    println!("\u{256D}{horizontal}\u{256E}");

    let padding = inner_width.saturating_sub(title.len()) / 2;
    println!(
        "{vertical}{:padding$}{}{:rest$}{vertical}",
        "",
        Styled::with_color_support(title, color_enabled).bold(),
        "",
        padding = padding,
        rest = inner_width.saturating_sub(padding + title.len())
    );
    println!("\u{251C}{horizontal}\u{2524}");

    let lines = [
        format!("  {} Succeeded: {successful}/{total}", symbols.success()),
        format!("  {} Failed:    {}", symbols.error(), total - successful.min(total)),
        format!("  Time elapsed: {:.1}s", elapsed.as_secs_f64()),
    ];
    for (i, line) in lines.iter().enumerate() {
        if i == 1 && successful >= total {
            continue;
        }
        // Symbols carry escape codes, so pad against the visible text only.
        let visible = strip_ansi(line).chars().count();
        println!(
            "{vertical}{line}{:pad$}{vertical}",
            "",
            pad = inner_width.saturating_sub(visible)
        );
    }

    println!("\u{2570}{horizontal}\u{256F}");
}

fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
