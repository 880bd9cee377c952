use cooldb::config::DatabaseConfig;
use cooldb::Database;
use cooldb_common::{Affinity, FilePage, LatchMode};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("demo");

    match cmd {
        "demo" => run_demo()?,
        "demo-abort" => run_demo_abort()?,
        _ => {
            eprintln!("Usage: cooldb [demo|demo-abort] [--config <path>]");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn config_from_args() -> anyhow::Result<DatabaseConfig> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(idx) = args.iter().position(|a| a == "--config") {
        if let Some(path) = args.get(idx + 1) {
            return DatabaseConfig::from_file(std::path::Path::new(path));
        }
    }
    Ok(DatabaseConfig::default())
}

/// Scenario 1 from the end-to-end suite: commit a single-byte mutation,
/// reopen the database, and confirm it survived.
fn run_demo() -> anyhow::Result<()> {
    let config = config_from_args()?;
    let page = FilePage::new(0, 3);

    {
        let db = Database::open(config.clone())?;
        db.start();
        let trans = db.begin_transaction();
        let mut buf = db.pin(page, LatchMode::Exclusive)?;
        let lsn = db.write_value(&trans, &mut buf, 7)?;
        db.unpin_dirty(buf, Affinity::Liked, lsn);
        db.commit(&trans)?;
        db.stop()?;
        println!("wrote and committed byte[{}] = 7", page);
    }

    let db = Database::open(config)?;
    let buf = db.pin(page, LatchMode::Shared)?;
    println!("after reopen: byte[{}] = {}", page, db.read_value(&buf));
    db.unpin(buf, Affinity::Liked);
    Ok(())
}

/// Same as `demo`, but rolls back before committing; the byte should read
/// back as its original value.
fn run_demo_abort() -> anyhow::Result<()> {
    let config = config_from_args()?;
    let page = FilePage::new(0, 4);

    let db = Database::open(config)?;
    let trans = db.begin_transaction();
    let mut buf = db.pin(page, LatchMode::Exclusive)?;
    let lsn = db.write_value(&trans, &mut buf, 7)?;
    db.unpin_dirty(buf, Affinity::Liked, lsn);
    db.abort(&trans)?;

    let buf = db.pin(page, LatchMode::Shared)?;
    println!("after abort: byte[{}] = {}", page, db.read_value(&buf));
    db.unpin(buf, Affinity::Liked);
    Ok(())
}
