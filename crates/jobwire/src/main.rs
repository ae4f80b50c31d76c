use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use jobwire_core::{
    config::Config,
    cycle::CycleRunner,
    dispatch::Dispatcher,
    ledger::DedupLedger,
    scan::Scanner,
    session::SessionManager,
    Error,
};
use jobwire_mtproto::MtprotoConnector;
use jobwire_storage::{SqliteCatalog, SqliteLedgerStore};
use jobwire_telegram::TelegramNotifier;

#[tokio::main]
async fn main() -> Result<(), Error> {
    jobwire_core::logging::init("jobwire");

    let cfg = Config::load()?;
    let database_url = cfg.database_url.clone().ok_or_else(|| {
        Error::Config("DATABASE_URL environment variable is required".to_string())
    })?;

    let pool = jobwire_storage::connect(&database_url).await?;
    let catalog = Arc::new(SqliteCatalog::new(pool.clone()));
    let ledger = Arc::new(DedupLedger::new(
        Arc::new(SqliteLedgerStore::new(pool)),
        &cfg.ledger,
    )?);

    let connector = Arc::new(MtprotoConnector::new(
        cfg.api_id,
        cfg.api_hash.clone(),
        cfg.session_file.clone(),
    ));
    let session = Arc::new(SessionManager::new(connector, cfg.session.clone()));
    let notifier = Arc::new(TelegramNotifier::new(&cfg.bot_token));

    let runner = CycleRunner::new(
        session,
        catalog,
        Scanner::new(cfg.scan.clone()),
        ledger,
        Dispatcher::new(notifier, cfg.dispatch.clone()),
        cfg.cycle.clone(),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {e}");
            }
            cancel.cancel();
        });
    }

    info!("worker started, cycle period {:?}", cfg.cycle.period);
    runner.run(cancel).await;
    info!("worker stopped");

    Ok(())
}
