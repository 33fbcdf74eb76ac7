use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "milestones")]
#[command(about = "Course milestones and prerequisites server")]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "MILESTONES_HTTP_ADDR", default_value = "0.0.0.0:9191")]
    pub http_addr: SocketAddr,

    /// Data directory
    #[arg(long, env = "MILESTONES_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("milestones.redb")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)?;
        }
        Ok(())
    }
}
