//! CLI for the vidq acquisition queue.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use vidq_core::config;
use vidq_core::store::{Db, Media, NewTorrent, NewVideo};

use commands::{run_add, run_daemon, run_remove, run_status};

/// Top-level CLI for vidq.
#[derive(Debug, Parser)]
#[command(name = "vidq")]
#[command(about = "vidq: queue videos, download them through a supervised engine, export to a library", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a movie or episode for acquisition.
    Add {
        /// External identifier (show id for episodes).
        external_id: String,

        /// Title shown in status output and used for the library entry.
        title: String,

        /// Season number; queues an episode together with --episode.
        #[arg(long, requires = "episode")]
        season: Option<u32>,

        /// Episode number within the season.
        #[arg(long, requires = "season")]
        episode: Option<u32>,

        /// Known source as HASH:SIZE_MB[:NAME], best first. Repeatable.
        /// Without any, a release search is scheduled.
        #[arg(long = "torrent", value_name = "HASH:SIZE_MB[:NAME]", value_parser = parse_torrent)]
        torrents: Vec<NewTorrent>,

        /// User to notify when the video is ready.
        #[arg(long)]
        requester: Option<String>,
    },

    /// Run the daemon: supervise the engine, run jobs, admit downloads.
    Run,

    /// Show tracked videos and their torrents.
    Status {
        /// Also list scheduled jobs.
        #[arg(long)]
        jobs: bool,
    },

    /// Stop and forget a video, deleting its downloaded data.
    Remove {
        /// Video identifier.
        id: i64,
    },
}

/// Parse `HASH:SIZE_MB[:NAME]`. The name defaults to the hash.
pub fn parse_torrent(s: &str) -> Result<NewTorrent, String> {
    let mut parts = s.splitn(3, ':');
    let hash = parts.next().unwrap_or_default().trim();
    if hash.is_empty() {
        return Err("missing hash".to_string());
    }
    let size = parts
        .next()
        .ok_or_else(|| format!("missing size in {s:?} (expected HASH:SIZE_MB)"))?;
    let size_mb: i64 = size
        .trim()
        .parse()
        .map_err(|_| format!("invalid size {size:?}"))?;
    if size_mb < 0 {
        return Err(format!("negative size {size_mb}"));
    }
    let name = parts
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(hash);
    Ok(NewTorrent {
        hash: hash.to_lowercase(),
        name: name.to_string(),
        size_mb,
        quality: None,
    })
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = Db::open_default().await?;

        match cli.command {
            CliCommand::Add {
                external_id,
                title,
                season,
                episode,
                torrents,
                requester,
            } => {
                let media = match (season, episode) {
                    (Some(season), Some(episode)) => Media::Episode { season, episode },
                    _ => Media::Movie,
                };
                let video = NewVideo {
                    external_id,
                    title,
                    media,
                    requester_id: requester,
                };
                run_add(db, &cfg, &video, &torrents).await?;
            }
            CliCommand::Run => run_daemon(db, &cfg).await?,
            CliCommand::Status { jobs } => run_status(&db, jobs).await?,
            CliCommand::Remove { id } => run_remove(db, &cfg, id).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
