use std::fmt::Display;

use color_eyre::owo_colors::OwoColorize;

pub mod buf;

/// Lenient float parsing used by the wire decoders: malformed or non-finite input
/// reads as zero.
pub fn parse_or_zero(value: &str) -> f64 {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.)
}

/// Green when the flag is clear, red when it is raised.
pub struct ColourDot(pub bool);

impl Display for ColourDot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let char = '●';

        if self.0 {
            write!(f, "{}", char.bright_red())
        } else {
            write!(f, "{}", char.bright_green())
        }
    }
}
