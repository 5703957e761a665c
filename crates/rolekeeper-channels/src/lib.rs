//! # Rolekeeper Channels
//! Per-destination delivery workers and the platform adapters: the Discord
//! REST client and gateway listener, plus the DeepL translation client.

pub mod deepl;
pub mod discord;
pub mod dispatch;

pub use deepl::DeepLClient;
pub use discord::DiscordClient;
pub use dispatch::SenderManager;
