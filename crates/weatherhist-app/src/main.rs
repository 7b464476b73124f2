use anyhow::Result;

mod app;

#[tokio::main]
async fn main() -> Result<()> {
    weatherhist_core::init()?;

    let app = app::App::new()?;
    tracing::info!("Weather history started");
    println!("Config directory: {}", app.config().config_dir.display());

    app.run().await?;
    app.shutdown();

    Ok(())
}
