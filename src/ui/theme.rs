//! Colors for CLI output, chosen per stream

use owo_colors::Style;
use std::sync::OnceLock;

static STDOUT: OnceLock<Theme> = OnceLock::new();
static STDERR: OnceLock<Theme> = OnceLock::new();

/// Styles for one output stream.
///
/// Results go to stdout; errors and retry warnings go to stderr, so each
/// stream is colored only when that stream is a color-capable terminal.
#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub warn: Style,
    pub dim: Style,
    pub muted: Style,
}

impl Theme {
    pub fn new(colored: bool) -> Self {
        if !colored {
            return Self::plain();
        }
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            warn: Style::new().yellow().bold(),
            dim: Style::new().white().dimmed(),
            muted: Style::new().bright_black(),
        }
    }

    pub fn plain() -> Self {
        Self {
            header: Style::new(),
            success: Style::new(),
            error: Style::new(),
            warn: Style::new(),
            dim: Style::new(),
            muted: Style::new(),
        }
    }
}

/// Theme for stdout
pub fn theme() -> &'static Theme {
    STDOUT.get_or_init(|| Theme::new(console::colors_enabled()))
}

/// Theme for stderr
pub fn stderr_theme() -> &'static Theme {
    STDERR.get_or_init(|| Theme::new(console::colors_enabled_stderr()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use owo_colors::OwoColorize;

    #[test]
    fn test_plain_theme_adds_no_escapes() {
        let plain = Theme::new(false);
        assert_eq!("retry".style(plain.warn).to_string(), "retry");
    }

    #[test]
    fn test_colored_theme_styles_text() {
        let colored = Theme::new(true);
        assert_ne!("retry".style(colored.warn).to_string(), "retry");
    }
}
