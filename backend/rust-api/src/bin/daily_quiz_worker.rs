use tracing_subscriber::fmt::init;

use drivecoach_api::{
    config::Config,
    services::{daily_quiz_service::DailyQuizService, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load()?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;

    // The worker never rate limits, so it does not need Redis
    let app_state = AppState::new(config, mongo_client, None).await?;

    let service = DailyQuizService::new(
        app_state.store.clone(),
        app_state.generator.clone(),
        &app_state.config,
    );

    service.run().await
}
