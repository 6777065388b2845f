// snapshot a page, act on it by reference, snapshot again
// run with: cargo run --example snapshot_demo -- https://example.com
// reuses a Chrome started with --remote-debugging-port=9222, otherwise launches one

use pagehand_lib::browser::BrowserClient;
use pagehand_lib::{Action, ActionError, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());
    let config = Config::from_env();

    println!("=== Snapshot Demo ===\n");
    let client = BrowserClient::connect(config).await?;

    for (idx, page) in client.list_pages().await?.iter().enumerate() {
        println!("{idx}: {} ({})", page.url, page.title);
    }

    let mut session = client.open(&url).await?;
    println!("\nsession {}\n", session.id());

    let snapshot = session.generate_snapshot().await?;
    println!("{}", snapshot.text);
    println!("{} references issued\n", snapshot.reference_count);

    // hover the first element that isn't the document itself
    let target = session
        .references()
        .iter()
        .nth(1)
        .map(|(reference, _)| reference.to_string());

    if let Some(reference) = target {
        let hover = Action::Hover {
            reference: reference.clone(),
        };
        match session.dispatch(&hover).await {
            Ok(outcome) => println!("✓ {}", outcome.message),
            Err(e) => println!("✗ {e} ({})", e.hint()),
        }

        match session
            .dispatch(&Action::Scroll {
                reference: None,
                delta_y: 400,
            })
            .await
        {
            Ok(outcome) => println!("✓ {}", outcome.message),
            Err(e) => println!("✗ {e}"),
        }
    }

    // a reference that was never issued
    match session
        .dispatch(&Action::Click {
            reference: "s1e9999".to_string(),
            double: false,
        })
        .await
    {
        Err(ActionError::ReferenceNotFound { reference }) => {
            println!("✓ {reference} rejected as expected");
        }
        other => println!("✗ unexpected: {other:?}"),
    }

    let info = session.navigate(&url).await?;
    println!("\nreloaded {} (epoch {})", info.url, session.epoch());

    let snapshot = session.current_snapshot().await?;
    println!("\n{}", snapshot.text);

    Ok(())
}
