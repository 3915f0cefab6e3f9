//! This example shows how to drive the lookup engine from the tokio
//! multithreaded runtime. Concurrent lookups for the same name are coalesced
//! onto a single query, and repeated runs within record TTLs are answered
//! from the cache.

fn main() {
    tracing_subscriber::fmt::init();
    run();
}

fn run() {
    use tokio::runtime::Runtime;

    // Set up the standard tokio runtime (multithreaded by default).
    let runtime = Runtime::new().expect("failed to create runtime");

    runtime.block_on(async {
        let engine = hostlookup::LookupEngine::builder()
            .build()
            .expect("failed to build engine");
        engine.bootstrap().await.expect("failed to bootstrap");

        // Issue every lookup concurrently; same-name lookups share one query.
        let names = &["www.google.com", "www.reddit.com", "www.wikipedia.org"];
        let mut lookups = Vec::new();
        for name in names {
            let engine = engine.clone();
            lookups.push((
                name,
                tokio::spawn(async move {
                    engine
                        .lookup(name, hostlookup::LookupOptions::default().all(true))
                        .await
                }),
            ));
        }

        for (name, lookup) in lookups {
            let answer = lookup
                .await
                .expect("lookup task panicked")
                .expect("failed completing lookup");
            let ips: Vec<_> = answer.addrs().iter().map(|addr| addr.ip).collect();
            println!("{name} resolved to {ips:?}");
        }

        engine.teardown().await.expect("failed to tear down");
    });
}
