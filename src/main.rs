use clap::Parser;
use library_loans::adapters::{open_store, sinks::DedupSink};
use library_loans::domain::model::Book;
use library_loans::utils::error::{ErrorSeverity, LibraryError};
use library_loans::utils::{logger, validation::Validate};
use library_loans::{ChangeFeedWatcher, CliConfig, TracingSink, TransactionCoordinator, WatchPositions};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    if config.logging.json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::info!("Starting library-loans");
    tracing::debug!("CLI config: {:?}", cli);

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let store = Arc::new(open_store(&config.store)?);
    store
        .put(&Book::new(cli.book, i64::from(cli.stock)).with_title("Dune", "Frank Herbert"))
        .await?;
    tracing::info!("📚 Seeded book {} with {} copies", cli.book, cli.stock);

    let sink = Arc::new(DedupSink::with_window(TracingSink, config.watch.dedup_window));

    // Start both watchers from the current head so no borrow below is missed.
    let head = Some(store.latest_resume_token());
    let watcher = Arc::new(ChangeFeedWatcher::new(
        Arc::clone(&store),
        Arc::clone(&sink),
        config.watch.clone(),
    ));
    let handles = watcher.spawn(WatchPositions {
        loans: head,
        stock: head,
    });

    let coordinator = Arc::new(TransactionCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&sink),
        config.borrow.clone(),
    ));
    let mut borrows = tokio::task::JoinSet::new();
    for _ in 0..cli.borrows {
        let coordinator = Arc::clone(&coordinator);
        let (member, book) = (cli.member, cli.book);
        borrows.spawn(async move { coordinator.borrow(member, book).await });
    }

    let mut failures = Vec::new();
    while let Some(joined) = borrows.join_next().await {
        match joined? {
            Ok(loan) => tracing::info!(
                loan_id = %loan.loan_id,
                due_date = %loan.due_date,
                "📗 Loan recorded"
            ),
            Err(e) => failures.push(LibraryError::from(e)),
        }
    }

    // Closing the store lets both feeds drain what was committed, then end.
    store.close();
    let report = handles.wait().await?;
    tracing::info!(
        new_loans = report.loans.notifications_emitted,
        low_stock_alerts = report.stock.notifications_emitted,
        "Watchers stopped"
    );

    let worst = failures.iter().map(LibraryError::severity).max();
    for e in &failures {
        tracing::error!(
            "❌ Borrow failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
    }

    let exit_code = match worst {
        None | Some(ErrorSeverity::Low) => 0,
        Some(ErrorSeverity::Medium) => 2,
        Some(ErrorSeverity::High) => 1,
        Some(ErrorSeverity::Critical) => 3,
    };
    if exit_code > 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}
