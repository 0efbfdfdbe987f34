use anyhow::Result;
use manhwa_maker::core::config::Config;
use manhwa_maker::core::io::NativeStorage;
use manhwa_maker::services::genai;
use manhwa_maker::services::session::Session;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with a valid gemini api_key.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let client = genai::create_client(&config)?;
    let storage = Arc::new(NativeStorage::new());

    let mut session = Session::new(config, client, storage).await?;
    session.run().await
}
