//! Integration tests wiring a small application out of layers.

use std::time::Duration;

use reservoir::layer::{Environment, Layer, LayerError};
use reservoir::testing::EventLog;
use reservoir::{Effect, Managed};

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

fn config() -> Layer<String> {
    Layer::succeed(Config {
        url: "postgres://test".to_string(),
    })
}

fn database(log: &EventLog) -> Layer<String> {
    let log = log.clone();
    Layer::from_fn_managed(move |config: Config| {
        let url = config.url.clone();
        let close = log.clone();
        Managed::make(
            log.event(format!("connect {url}"))
                .map(move |_| Database { url: url.clone() }),
            move |_| close.finalizer("disconnect"),
        )
    })
}

fn users() -> Layer<String> {
    Layer::from_fn(|db: Database| Users { db })
}

fn orders() -> Layer<String> {
    Layer::from_fn(|db: Database| Orders { db })
}

#[tokio::test]
async fn shared_database_is_opened_once() {
    let log = EventLog::new();
    let db = config().to(&database(&log)).unwrap();
    let app = db
        .to(&users())
        .unwrap()
        .and(&db.to(&orders()).unwrap())
        .unwrap();

    let program = Effect::<Users, String, Environment>::service()
        .zip(Effect::<Orders, String, Environment>::service())
        .map(|(users, orders)| users.db.url == orders.db.url)
        .provide_layer(&app);

    assert_eq!(program.run(&Environment::empty()).await, Ok(true));
    assert_eq!(log.entries(), vec!["connect postgres://test", "disconnect"]);
}

#[tokio::test]
async fn each_program_run_builds_its_own_graph() {
    let log = EventLog::new();
    let app = config().to(&database(&log)).unwrap();
    let program = Effect::<Database, String, Environment>::service()
        .map(|db| db.url)
        .provide_layer(&app);

    program.run(&Environment::empty()).await.unwrap();
    program.run(&Environment::empty()).await.unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "connect postgres://test",
            "disconnect",
            "connect postgres://test",
            "disconnect",
        ]
    );
}

#[tokio::test]
async fn memoized_graph_is_shared_across_programs() {
    let log = EventLog::new();
    let app = config().to(&database(&log)).unwrap();
    let read_url = Effect::<Database, String, Environment>::service().map(|db| db.url);

    let both = app.memoize().with(move |shared| {
        read_url
            .provide_layer(&shared)
            .zip(read_url.provide_layer(&shared))
    });

    let (first, second) = both.run(&Environment::empty()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(log.entries(), vec!["connect postgres://test", "disconnect"]);
}

#[tokio::test(start_paused = true)]
async fn horizontal_layers_build_concurrently() {
    #[derive(Clone)]
    struct Slow(u8);
    #[derive(Clone)]
    struct Slower(u8);

    let slow = Layer::<String>::from_effect(Effect::sleep(Duration::from_secs(1)).map(|_| Slow(1)));
    let slower = Layer::<String>::from_effect(Effect::sleep(Duration::from_secs(1)).map(|_| Slower(2)));
    let both = slow.and(&slower).unwrap();

    let started = tokio::time::Instant::now();
    let program = Effect::<Slow, String, Environment>::service()
        .zip(Effect::<Slower, String, Environment>::service())
        .map(|(a, b)| a.0 + b.0)
        .provide_layer(&both);

    assert_eq!(program.run(&Environment::empty()).await, Ok(3));
    let waited = started.elapsed();
    assert!(waited < Duration::from_secs(2), "{waited:?}");
}

#[test]
fn wiring_errors_are_reported_at_composition() {
    let log = EventLog::new();

    match config().to(&users()) {
        Err(LayerError::MissingCapability { tag, .. }) => {
            assert!(tag.name().ends_with("Database"), "{tag}");
        }
        other => panic!("expected a missing capability, got {other:?}"),
    }

    let two_configs = config().and(&config());
    assert!(matches!(two_configs, Err(LayerError::DuplicateCapability { .. })));

    assert!(config().to(&database(&log)).is_ok());
}

#[tokio::test]
async fn fallback_layer_replaces_a_failing_one() {
    let broken = Layer::<String>::from_effect(Effect::<Config, String, Environment>::fail(
        "no config file".to_string(),
    ));
    let app = broken.or_else(&config());

    let program = Effect::<Config, String, Environment>::service()
        .map(|config| config.url)
        .provide_layer(&app);

    assert_eq!(
        program.run(&Environment::empty()).await,
        Ok("postgres://test".to_string())
    );
}
