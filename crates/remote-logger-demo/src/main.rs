// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use remote_logger::{RemoteLogger, RemoteLoggerConfig, RemoteLoggerEnv, WTF_PRIORITY};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const TAG: &str = "remote-logger-demo";

#[derive(Debug, thiserror::Error)]
#[error("checkout failed")]
struct CheckoutError(#[source] std::io::Error);

#[tokio::main]
pub async fn main() {
    let env = RemoteLoggerEnv::from_os_env();

    let env_filter = format!("h2=off,hyper=off,rustls=off,sled=off,{}", env.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let Some(url) = env.url.clone() else {
        error!("REMOTE_LOGGER_URL is not set. Shutting down.");
        return;
    };
    let user_uuid = env
        .user_uuid
        .clone()
        .unwrap_or_else(|| "anonymous".to_string());

    let config = match RemoteLoggerConfig::from_env(&env) {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {err}");
            return;
        }
    };
    let logger = RemoteLogger::new(config);
    if let Err(err) = logger
        .initialize(&url, &user_uuid, None, Some(env.sync_interval))
        .await
    {
        error!("Unable to start remote logger: {err}");
        return;
    }
    info!(
        "Remote logger started, syncing to {url} every {:?}",
        env.sync_interval
    );

    logger.info(TAG, "Application started", None);
    logger.debug(TAG, "Loaded 3 items from cache", None);
    logger.verbose(TAG, "Cache warmup took 12ms", None);
    let failure = CheckoutError(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "payment gateway timed out",
    ));
    logger.error(TAG, "Unable to complete checkout", Some(&failure));
    logger.log_priority(WTF_PRIORITY, TAG, "Inventory count went negative", None);
    info!("{} logs waiting for upload", logger.pending_count().await);

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {err}");
    }

    info!("Shutting down, flushing pending logs");
    match logger.flush_now().await {
        Ok(outcome) => info!("Final flush: {outcome:?}"),
        Err(err) => error!("Final flush failed: {err}"),
    }
    if let Err(err) = logger.teardown().await {
        error!("Teardown failed: {err}");
    }
}
