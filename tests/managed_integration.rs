//! Integration tests for scoped resources backed by real files.
//!
//! Every test checks the file system after the scope has closed, so a
//! release that did not run shows up as a leftover file.

use std::path::PathBuf;
use std::time::Duration;

use reservoir::managed::Switcher;
use reservoir::testing::EventLog;
use reservoir::{assert_interrupted, Cause, Effect, Managed};

// ============================================================================
// Helpers
// ============================================================================

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "reservoir_managed_{}_{}.txt",
        name,
        std::process::id()
    ))
}

/// A scratch file that exists exactly as long as the scope.
fn temp_file(path: PathBuf) -> Managed<PathBuf, String> {
    Managed::make(
        Effect::from_async(move |_: &()| {
            let path = path.clone();
            async move {
                let written = tokio::fs::write(&path, "scratch").await;
                written.map(|()| path).map_err(|e| e.to_string())
            }
        }),
        |path: PathBuf| {
            Effect::from_async(move |_: &()| {
                let path = path.clone();
                async move {
                    let _ = tokio::fs::remove_file(&path).await;
                    Ok(())
                }
            })
        },
    )
}

fn read(path: PathBuf) -> Effect<String, String> {
    Effect::from_async(move |_: &()| {
        let path = path.clone();
        async move { tokio::fs::read_to_string(&path).await.map_err(|e| e.to_string()) }
    })
}

// ============================================================================
// File lifecycle
// ============================================================================

#[tokio::test]
async fn temp_file_is_removed_after_use() {
    let path = temp_path("success");

    let result = temp_file(path.clone()).with(read).run(&()).await;

    assert_eq!(result, Ok("scratch".to_string()));
    assert!(!path.exists());
}

#[tokio::test]
async fn temp_file_is_removed_when_use_fails() {
    let path = temp_path("failure");

    let result: Result<(), _> = temp_file(path.clone())
        .with(|_| Effect::fail("use failed".to_string()))
        .run(&())
        .await;

    assert_eq!(result, Err(Cause::Fail("use failed".to_string())));
    assert!(!path.exists());
}

#[tokio::test]
async fn temp_file_is_removed_when_fiber_is_interrupted() {
    let path = temp_path("interrupted");
    let fiber = temp_file(path.clone())
        .with(|_| Effect::<(), String>::never())
        .fork(&());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("file was never created");

    assert_interrupted!(fiber.interrupt().await);
    assert!(!path.exists());
}

#[tokio::test]
async fn parallel_files_are_all_removed() {
    let paths: Vec<PathBuf> = (0..3).map(|n| temp_path(&format!("parallel_{n}"))).collect();
    let all = temp_file(paths[0].clone())
        .zip_par(temp_file(paths[1].clone()))
        .zip_par(temp_file(paths[2].clone()));

    let result = all
        .with(|((a, b), c)| Effect::pure(a.exists() && b.exists() && c.exists()))
        .run(&())
        .await;

    assert_eq!(result, Ok(true));
    for path in &paths {
        assert!(!path.exists(), "{path:?} was left behind");
    }
}

// ============================================================================
// Sharing and swapping
// ============================================================================

#[tokio::test]
async fn memoized_resource_is_shared_by_every_use() {
    let log = EventLog::new();
    let shared = log.resource::<String, ()>("pool").memoize();

    let result = shared
        .with(|pool| pool.use_now().zip(pool.use_now()))
        .run(&())
        .await;

    assert_eq!(result, Ok(("pool", "pool")));
    assert_eq!(log.entries(), vec!["acquire pool", "release pool"]);
}

#[tokio::test]
async fn switcher_releases_the_previous_resource_first() {
    let log = EventLog::new();
    let (first, second) = (
        log.resource::<String, ()>("first"),
        log.resource::<String, ()>("second"),
    );
    let marker = log.clone();

    let program = Managed::<Switcher, String>::switchable().with(move |switcher| {
        let (next, second, marker) = (switcher.clone(), second.clone(), marker.clone());
        switcher
            .switch(&first)
            .and_then(move |_| next.switch(&second))
            .and_then(move |current| marker.event(format!("using {current}")))
    });

    program.run(&()).await.unwrap();
    assert_eq!(
        log.entries(),
        vec![
            "acquire first",
            "release first",
            "acquire second",
            "using second",
            "release second",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_acquisition_times_out_and_is_released() {
    let log = EventLog::new();
    let slow = log
        .resource::<String, ()>("slow")
        .and_then(|name| Managed::from_effect(Effect::sleep(Duration::from_secs(30)).map(move |_| name)));

    let result = slow
        .timeout(Duration::from_secs(1))
        .with(|acquired| Effect::pure(acquired.is_some()))
        .run(&())
        .await;

    assert_eq!(result, Ok(false));
    assert_eq!(log.entries(), vec!["acquire slow", "release slow"]);
}
