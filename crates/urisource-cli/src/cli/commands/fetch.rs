use std::path::Path;

use anyhow::Context;
use futures::future::join_all;
use urisource_core::{FetchConfig, FetchResult, ImagePayload, ImageRequest, ImageSource, ResourceKey};

use super::super::args::FetchArgs;
use crate::exit_codes;

pub async fn run(args: FetchArgs) -> anyhow::Result<i32> {
    let mut config = FetchConfig::from_env();
    if args.no_cache {
        config = config.with_caching(false);
    }
    if let Some(schedule) = &args.retry_schedule {
        config = config.with_retry_schedule(&schedule.0);
    }

    let source = ImageSource::from_config(&config).context("failed to create image source")?;

    if let Some(dir) = &args.out {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    }

    // Every repeat of every URI is issued at once so repeats join one fetch.
    let (source_ref, headers, repeat) = (&source, &args.headers, args.repeat);
    let requests = args.uris.iter().flat_map(move |uri| {
        (0..repeat).map(move |_| {
            let request = headers
                .iter()
                .fold(ImageRequest::new(uri), |request, (name, value)| {
                    request.header(name, value)
                });
            source_ref.fetch_with(request)
        })
    });
    let outcomes = join_all(requests).await;

    let mut code = exit_codes::SUCCESS;
    for (uri, results) in args.uris.iter().zip(outcomes.chunks(args.repeat as usize)) {
        let key = ResourceKey::from_uri(uri);

        for result in results {
            if let Err(e) = result {
                code = code.max(e.exit_code());
            }
        }

        report(key, &results[0]);

        if let (Some(dir), Ok(Some(payload))) = (&args.out, &results[0]) {
            write_payload(dir, key, payload).await?;
        }
    }

    let stats = source.coordinator().stats();
    println!(
        "requests={} joined={} fetches={}",
        stats.total_requests, stats.joined_requests, stats.started_fetches
    );
    source.coordinator().log_stats();

    Ok(code)
}

fn report(key: ResourceKey, result: &FetchResult<Option<ImagePayload>>) {
    match result {
        Ok(Some(payload)) => println!("{} ok {}", key, payload.len()),
        Ok(None) => println!("{} empty 0", key),
        Err(e) => {
            println!("{} {} 0", key, e.kind());
            eprintln!("error: {}", e);
        }
    }
}

async fn write_payload(dir: &Path, key: ResourceKey, payload: &ImagePayload) -> anyhow::Result<()> {
    let path = dir.join(format!("{}.bin", key));
    tokio::fs::write(&path, payload.bytes())
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
