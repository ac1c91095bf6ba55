use anyhow::Result;
use tracing::info;

use deal_tracker::config::Settings;
use deal_tracker::database::Database;
use deal_tracker::deal_bot::DealBot;
use deal_tracker::extractor::DealExtractor;
use deal_tracker::keywords::KeywordConfig;
use deal_tracker::telegram::TelegramClient;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting deal tracker bot");

    let settings = Settings::from_env()?;

    let keywords = match &settings.keywords_path {
        Some(path) => {
            info!("Loading keywords from {}", path.display());
            KeywordConfig::load(path)?
        }
        None => KeywordConfig::default(),
    };
    let extractor = DealExtractor::new(&keywords, settings.extract)?;

    let database = Database::new(&settings.database_url).await?;
    info!("{} deals stored so far", database.count().await?);

    let telegram = TelegramClient::new(&settings.telegram_token, settings.poll_timeout_secs)?;
    let mut bot = DealBot::new(telegram, database, extractor, settings.reply_on_save);

    info!("Polling Telegram for deal messages");
    tokio::select! {
        result = bot.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
