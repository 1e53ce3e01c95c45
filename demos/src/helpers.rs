use std::io::Write;
use std::str::FromStr;

use clap::Args;

/// Command line options shared by the demo servers.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(short, long)]
    pub debug: bool,
    #[arg(long, default_value_t = format!("127.0.0.1"))]
    pub host: String,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    /// Number of event loop threads
    #[arg(long, default_value_t = 2)]
    pub threads: usize,
    #[arg(long, default_value_t = format!("INFO"))]
    pub log_level: String,
}

impl CommonArgs {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Installs the logger when `--debug` is given.
    pub fn init_log(&self) -> anyhow::Result<()> {
        let log_level = log::LevelFilter::from_str(&self.log_level)?;
        if self.debug {
            env_logger::Builder::new()
                .format(|buf, record| {
                    writeln!(
                        buf,
                        "{}:{} [{}] {} - {}",
                        record.file().unwrap_or("unknown"),
                        record.line().unwrap_or(0),
                        record.level(),
                        chrono::Local::now().format("%H:%M:%S.%6f"),
                        record.args()
                    )
                })
                .filter(None, log_level)
                .init();
        }
        Ok(())
    }
}

/// Resolves once ctrl-c is pressed.
pub async fn ctrl_c() -> anyhow::Result<()> {
    let (tx, rx) = futures::channel::oneshot::channel();
    let mut tx = Some(tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    })?;
    let _ = rx.await;
    Ok(())
}
