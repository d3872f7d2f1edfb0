//! docmigrate - run-once schema migrations for MongoDB

use clap::Parser;

use docmigrate::cli::App;
use docmigrate::config::get_env;

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let app = App::parse();

    // Initialize logging
    let filter = if app.verbose {
        "debug".to_string()
    } else {
        get_env("DOCMIGRATE_LOG", "info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    app.run().await
}
