//! Wires a small application out of layers and logs every build and release.
//!
//! Run with: cargo run --example layer_demo

use std::time::Duration;

use reservoir::layer::{Environment, Layer};
use reservoir::{Effect, Managed, RetryPolicy};

#[derive(Debug, Clone)]
struct Config {
    url: String,
}

#[derive(Debug, Clone)]
struct Database {
    url: String,
}

#[derive(Debug, Clone)]
struct Users {
    db: Database,
}

#[derive(Debug, Clone)]
struct Orders {
    db: Database,
}

fn database() -> Layer<String> {
    Layer::from_fn_managed(|config: Config| {
        let url = config.url.clone();
        Managed::make(
            Effect::from_fn(move |_: &Environment| {
                tracing::info!(%url, "connecting");
                Ok(Database { url: url.clone() })
            }),
            |db: Database| {
                Effect::from_fn(move |_: &Environment| {
                    tracing::info!(url = %db.url, "disconnecting");
                    Ok(())
                })
            },
        )
    })
    .named("database")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = Layer::<String>::succeed(Config {
        url: "postgres://demo".to_string(),
    })
    .named("config");
    let db = config.to(&database()).expect("database needs only a config");
    let users = db
        .to(&Layer::from_fn(|db: Database| Users { db }).named("users"))
        .expect("users need only a database");
    let orders = db
        .to(&Layer::from_fn(|db: Database| Orders { db }).named("orders"))
        .expect("orders need only a database");
    let app = users
        .and(&orders)
        .expect("users and orders provide different services")
        .retry(RetryPolicy::constant(Duration::from_millis(50)).with_max_retries(2));

    let program = Effect::<Users, _, Environment>::service()
        .zip(Effect::<Orders, _, Environment>::service())
        .map(|(users, orders)| users.db.url == orders.db.url)
        .provide_layer(&app);

    match program.run(&Environment::empty()).await {
        Ok(shared) => tracing::info!(shared, "one database served both services"),
        Err(cause) => tracing::error!(%cause, "application failed"),
    }
}
