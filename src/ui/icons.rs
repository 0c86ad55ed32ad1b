//! Shared UI icons.
//!
//! Each icon falls back to a plain ASCII marker on terminals without emoji.

use console::Emoji;

// Step outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static REPLAY: Emoji<'_, '_> = Emoji("🔄 ", "[REPLAY]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Progress
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
