//! Tutor Cache demo
//!
//! Runs the cache layer against an in-process document store and walks
//! through the scenarios it exists for: collapsing concurrent reads,
//! serving repeats from cache, and refreshing after a write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutor_cache::remote::{where_, FilterOp, MemoryRemoteStore, RemoteStore};
use tutor_cache::{
    spawn_sweep_task, CacheOptions, CachedAccess, Config, IdentityTransition, WriteOptions,
};

#[derive(Debug, Deserialize)]
struct Class {
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_entries={}, default_ttl={}s, persist={}, sweep_interval={}s",
        config.max_entries, config.default_ttl, config.persist, config.sweep_interval
    );

    let remote = Arc::new(MemoryRemoteStore::new().with_read_latency(Duration::from_millis(100)));
    remote.seed("classes", "c1", json!({"name": "Algebra", "teacherId": "t1"}));
    remote.seed("classes", "c2", json!({"name": "Geometry", "teacherId": "t1"}));
    remote.seed("classes", "c3", json!({"name": "Biology", "teacherId": "t2"}));

    let access = CachedAccess::from_config(&config, remote.clone() as Arc<dyn RemoteStore>);
    access.on_identity_transition(IdentityTransition::Login).await;

    let sweep = (config.sweep_interval > 0)
        .then(|| spawn_sweep_task(access.store(), config.sweep_interval));

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    let _subscription = access.subscribe(move |subject| {
        counter.fetch_add(1, Ordering::SeqCst);
        info!(subject = %subject, "Change received, views should refetch");
    });

    let options = CacheOptions::for_user("t1");
    let filters = [where_("teacherId", FilterOp::Eq, "t1")];

    // Three views asking for the same list at once share one round-trip
    let (a, b, c) = tokio::join!(
        access.get_cached_collection::<Class>("classes", &filters, &options),
        access.get_cached_collection::<Class>("classes", &filters, &options),
        access.get_cached_collection::<Class>("classes", &filters, &options),
    );
    let (a, b, c) = (a?, b?, c?);
    info!(
        results = a.len(),
        same = a.len() == b.len() && b.len() == c.len(),
        remote_queries = remote.query_count(),
        "Concurrent reads settled"
    );

    let _ = access
        .get_cached_collection::<Class>("classes", &filters, &options)
        .await?;
    info!(remote_queries = remote.query_count(), "Repeat read served from cache");

    access
        .update_cached_document(
            "classes",
            "c1",
            &json!({"name": "Algebra II"}),
            &WriteOptions::for_user("t1").with_subject("c1"),
        )
        .await?;

    let refreshed = access
        .get_cached_collection::<Class>("classes", &filters, &options)
        .await?;
    for class in &refreshed {
        info!(id = %class.id, name = %class.name, "Class");
    }

    let stats = access.stats().await;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        invalidations = stats.invalidations,
        hit_rate = stats.hit_rate(),
        remote_queries = remote.query_count(),
        notifications = refreshes.load(Ordering::SeqCst),
        "Done"
    );

    if let Some(handle) = sweep {
        handle.abort();
    }
    Ok(())
}
