use anyhow::Result;
use whisper_auth::SessionState;
use whisper_core::Config;
use whisper_favorites::WhisperContext;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, validation) = Config::load_validated()?;

    whisper_core::init(&config.logging.filter)?;
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }

    let context = WhisperContext::new(&config)?;
    let state = context.restore().await;
    tracing::info!(?state, "Weather Whisper client started");

    println!("Weather Whisper");
    println!("  API: {}", context.api().base_url());
    println!("  Session file: {}", config.storage.durable_path().display());

    match state {
        SessionState::Authenticated | SessionState::Refreshing => {
            let snapshot = context.session().snapshot();
            if let Some(user) = snapshot.user {
                println!("  Signed in as {} <{}>", user.username, user.email);
            }

            let favorites = context.favorites().snapshot();
            match &favorites.last_error {
                Some(e) => println!("  Favorites unavailable: {}", e.user_message()),
                None => {
                    println!(
                        "  Favorites ({}/{}):",
                        favorites.items.len(),
                        context.favorites().capacity()
                    );
                    for favorite in &favorites.items {
                        println!("    - {}", favorite.display_name());
                    }
                }
            }
        }
        SessionState::Guest => println!("  Guest mode"),
        SessionState::Anonymous => println!("  Not signed in"),
    }

    Ok(())
}
