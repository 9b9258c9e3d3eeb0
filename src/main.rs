use anyhow::{Context, Result};
use backup_mirror::backup::BackupManager;
use backup_mirror::command::{self, Reply, HELP};
use backup_mirror::utils;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = utils::config::load_config()?;
    utils::logging::init_tracing(config.log_format);

    info!("Starting backup-mirror v{}", env!("CARGO_PKG_VERSION"));
    debug!("Effective configuration: {:?}", config);

    if let Err(e) = std::env::set_current_dir(&config.home_dir) {
        warn!("chdir to {} failed: {}", config.home_dir.display(), e);
    }

    write_state_marker(&config.state_file)?;

    let mut manager = BackupManager::new(&config);
    println!("Backup system started.");
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        prompt();

        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                println!();
                break;
            }
            Err(e) => {
                warn!("Failed to read input: {}", e);
                continue;
            }
        };

        let command = match command::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };

        // Initial copies and worker joins block; keep them off the async reactor
        let outcome = tokio::task::block_in_place(|| command::dispatch(&mut manager, command));
        for reply in &outcome.replies {
            match reply {
                Reply::Ok(text) => println!("{}", text),
                Reply::Err(text) => eprintln!("{}", text),
            }
        }
        if outcome.exit {
            break;
        }
    }

    tokio::task::block_in_place(|| manager.shutdown_all());
    remove_state_marker(&config.state_file);
    println!("Cleanup completed");
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn write_state_marker(path: &Path) -> Result<()> {
    let contents = format!(
        "pid={}\nstarted={}\n",
        std::process::id(),
        chrono::Local::now().to_rfc3339()
    );
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write state file {}", path.display()))
}

fn remove_state_marker(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove state file {}: {}", path.display(), e),
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let other = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).expect("failed to install signal handler");
        let mut hangup = signal(SignalKind::hangup()).expect("failed to install signal handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install signal handler");
        tokio::select! {
            _ = terminate.recv() => {},
            _ = hangup.recv() => {},
            _ = quit.recv() => {},
        }
    };

    #[cfg(not(unix))]
    let other = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = other => {},
    }

    println!();
    info!("Shutdown signal received");
}
