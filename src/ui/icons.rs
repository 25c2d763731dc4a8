//! Shared UI icons.
//!
//! Emoji constants used across the terminal output, with plain-text
//! fallbacks for terminals that cannot render them.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Queue indicators
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static PAUSED: Emoji<'_, '_> = Emoji("⏸️  ", "[P]");
