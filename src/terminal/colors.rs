//! ANSI styling for command output.

use std::fmt;
use std::io::{self, IsTerminal};

const ESC: &str = "\x1b[";
const RESET: &str = "\x1b[0m";

/// Check if stdout is a terminal that supports colors.
pub fn stdout_supports_color() -> bool {
    io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Check if stderr is a terminal that supports colors.
pub fn stderr_supports_color() -> bool {
    io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Foreground colors used by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Cyan,
}

impl Color {
    fn fg_code(self) -> &'static str {
        match self {
            Color::Red => "31",
            Color::Green => "32",
            Color::Yellow => "33",
            Color::Blue => "34",
            Color::Cyan => "36",
        }
    }
}

/// A string with optional color and weight.
#[derive(Debug, Clone)]
pub struct Styled {
    content: String,
    color: Option<Color>,
    bold: bool,
    dim: bool,
    enabled: bool,
}

impl Styled {
    /// Create a styled string with explicit color support setting.
    pub fn with_color_support(content: impl Into<String>, enabled: bool) -> Self {
        Self {
            content: content.into(),
            color: None,
            bold: false,
            dim: false,
            enabled,
        }
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn dim(mut self) -> Self {
        self.dim = true;
        self
    }

    pub fn red(self) -> Self {
        self.color(Color::Red)
    }

    pub fn green(self) -> Self {
        self.color(Color::Green)
    }

    pub fn yellow(self) -> Self {
        self.color(Color::Yellow)
    }

    pub fn blue(self) -> Self {
        self.color(Color::Blue)
    }

    pub fn cyan(self) -> Self {
        self.color(Color::Cyan)
    }
}

impl fmt::Display for Styled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled || (self.color.is_none() && !self.bold && !self.dim) {
            return f.write_str(&self.content);
        }

        let mut codes: Vec<&str> = Vec::with_capacity(3);
        if self.bold {
            codes.push("1");
        }
        if self.dim {
            codes.push("2");
        }
        if let Some(color) = self.color {
            codes.push(color.fg_code());
        }

        write!(f, "{ESC}{}m{}{RESET}", codes.join(";"), self.content)
    }
}

/// Status symbols.
pub struct Symbols {
    enabled: bool,
}

impl Symbols {
    pub fn new(color_enabled: bool) -> Self {
        Self {
            enabled: color_enabled,
        }
    }

    pub fn success(&self) -> Styled {
        Styled::with_color_support("\u{2713}", self.enabled).green().bold()
    }

    pub fn error(&self) -> Styled {
        Styled::with_color_support("\u{2717}", self.enabled).red().bold()
    }

    pub fn warning(&self) -> Styled {
        Styled::with_color_support("\u{26A0}", self.enabled).yellow().bold()
    }

    pub fn info(&self) -> Styled {
        Styled::with_color_support("\u{2139}", self.enabled).blue().bold()
    }

    pub fn arrow(&self) -> Styled {
        Styled::with_color_support("\u{2192}", self.enabled).dim()
    }
}

/// Print a success message.
pub fn print_success(message: &str) {
    let symbols = Symbols::new(stdout_supports_color());
    println!("{} {}", symbols.success(), message);
}

/// Print an error message to stderr.
pub fn print_error(message: &str) {
    let symbols = Symbols::new(stderr_supports_color());
    eprintln!("{} {}", symbols.error(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    let symbols = Symbols::new(stdout_supports_color());
    println!("{} {}", symbols.warning(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    let symbols = Symbols::new(stdout_supports_color());
    println!("{} {}", symbols.info(), message);
}
