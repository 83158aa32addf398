// Route modules for the GradConnect notification server
pub mod presence; // Per-user live connection counts
pub mod websocket; // Real-time notification channel
