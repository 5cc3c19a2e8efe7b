//! Logging Setup
//!
//! `RUST_LOG` hat Vorrang, sonst gelten die Default-Direktiven.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVES: &str = "consult_call=debug,webrtc=warn";

/// Installiert den fmt-Subscriber. Ist schon einer installiert (z.B. von der
/// einbettenden Anwendung), passiert nichts.
pub fn init() -> bool {
    init_with(DEFAULT_DIRECTIVES)
}

pub fn init_with(default_directives: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging initialized");
    }
    installed
}
