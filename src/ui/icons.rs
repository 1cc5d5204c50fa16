//! Status glyphs with plain-text fallbacks for terminals without emoji.

use console::Emoji;

// Spec and session states
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[FAIL]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static PENDING: Emoji<'_, '_> = Emoji("⏸️  ", "[ ]");

// Run events
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static TOOL: Emoji<'_, '_> = Emoji("🔧 ", "-");
