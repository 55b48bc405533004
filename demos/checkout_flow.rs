// SPDX-License-Identifier: MIT OR Apache-2.0

//! Example: Guarding a Checkout Flow
//!
//! This example walks one checkout through the resilience layer:
//! - Loading configuration from YAML
//! - Database calls that succeed after retries
//! - A payment provider behind a circuit breaker
//! - A cache lookup with a silent fallback
//! - Health, metrics and operator controls

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use storefront_resilience::runtime::PAYMENT_CIRCUIT;
use storefront_resilience::{
    DependencyCategory, DependencyError, ErrorKind, Operator, Resilience, ResilienceConfig,
    RetryError,
};

const CONFIG: &str = r#"
retry:
  database:
    base_delay: 50ms
  external_service:
    base_delay: 20ms
    max_attempts: 2
  cache:
    base_delay: 10ms
circuits:
  - name: payment
    sliding_window_size: 4
    minimum_calls: 2
    wait_duration_in_open: 200ms
schedule:
  fast_check_interval: 1s
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // ==========================================================================
    // 1. Configuration
    // ==========================================================================
    println!("=== Configuration ===");

    let config = ResilienceConfig::from_yaml(CONFIG)?;
    let resilience = Resilience::from_config(&config)?;
    let tasks = resilience.start_background();

    for policy in resilience.policies().iter() {
        println!(
            "{:<18} attempts={} base={:?}",
            policy.category(),
            policy.max_attempts(),
            policy.backoff().base_delay()
        );
    }

    // ==========================================================================
    // 2. Database: two timeouts, then success
    // ==========================================================================
    println!("\n=== Load Cart ===");

    let cart = resilience.site("cart.load", DependencyCategory::Database);
    let calls = AtomicU32::new(0);
    let items = resilience
        .call(&cart, || {
            let previous = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if previous < 2 {
                    Err(DependencyError::timeout("primary did not answer"))
                } else {
                    Ok(vec!["sku-42", "sku-7"])
                }
            }
        })
        .await?;
    println!("Cart: {:?} after {} calls", items, calls.load(Ordering::SeqCst));

    // ==========================================================================
    // 3. Payment: provider outage opens the circuit
    // ==========================================================================
    println!("\n=== Capture Payment ===");

    let payment = resilience
        .site_with_circuit("payment.capture", DependencyCategory::ExternalService, PAYMENT_CIRCUIT)?
        .ignore(ErrorKind::Conflict);

    for attempt in 1..=3 {
        let result = resilience
            .call(&payment, || async {
                Err::<String, _>(DependencyError::unavailable("provider returned 503"))
            })
            .await;
        match result {
            Ok(receipt) => println!("#{attempt}: captured {receipt}"),
            Err(RetryError::CircuitOpen(e)) => {
                println!("#{attempt}: rejected ({e}), retry after {:?}", e.retry_after())
            }
            Err(e) => println!("#{attempt}: failed: {e}"),
        }
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    let receipt = resilience
        .call(&payment, || async {
            Ok::<_, DependencyError>("rcpt-1001".to_string())
        })
        .await?;
    println!("Trial call captured {receipt}");

    // ==========================================================================
    // 4. Cache: fallback to an empty recommendation list
    // ==========================================================================
    println!("\n=== Recommendations ===");

    let recommendations = resilience.site("recommendations.fetch", DependencyCategory::Cache);
    let suggested = resilience
        .call_or(&recommendations, Vec::new(), || async {
            Err::<Vec<&str>, _>(DependencyError::new(
                ErrorKind::ConnectionReset,
                "cache node restarted",
            ))
        })
        .await?;
    println!("Suggested: {} items", suggested.len());

    // ==========================================================================
    // 5. Health, metrics and operator controls
    // ==========================================================================
    println!("\n=== Health ===");
    println!("{}", resilience.health().to_json()?);

    let ops = Operator::elevated("oncall");
    resilience.force_open_circuit(PAYMENT_CIRCUIT, &ops)?;
    println!("After force open: {:?}", resilience.health().status);
    resilience.reset_circuit(PAYMENT_CIRCUIT, &ops)?;
    println!("After reset: {:?}", resilience.health().status);

    println!("\n=== Metrics ===");
    print!("{}", resilience.metrics().to_prometheus_text());

    let window = resilience.metrics().flush();
    println!("Flushed {} operations", window.operations.len());

    tasks.shutdown().await;
    Ok(())
}
