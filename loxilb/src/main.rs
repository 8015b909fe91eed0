mod aging;
mod config;
mod conntrack;
mod helpers;
mod info;
mod protocols;
mod replay;
mod stats;

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::{builder::NonEmptyStringValueParser, Parser, Subcommand};
use config::ConfigFile;
use log::{info, warn};
use loxilb_dp::{ktime_get_ns, pdi::PdiMap, Dataplane};
use std::{sync::Arc, time::Duration};
use tokio::{fs::File, io::BufReader, signal};

#[derive(Debug, Parser)]
struct Opt {
    /// The TOML file with the tables to program
    #[clap(short, long, default_value = "loxilb.toml", value_parser = NonEmptyStringValueParser::new())]
    config: String,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validates the config file and lists what it programs
    Check,

    /// Runs the frames of a text file, or of stdin, through the dataplane
    /// and prints a verdict per frame
    Replay {
        input: Option<String>,

        /// Print the global and per table counters at the end
        #[clap(long)]
        stats: bool,

        /// Print the tracked flows at the end
        #[clap(long)]
        conntrack: bool,
    },

    /// Programs the dataplane and ages its flows until Ctrl-C
    Run,
}

fn load(cfg_file: &ConfigFile, dp: &Dataplane, pdi: &PdiMap) -> Result<config::Config, anyhow::Error> {
    let cfg = cfg_file.load()?;
    let count = cfg.apply(dp, ktime_get_ns())?;
    info!("Programmed {} table entries", count);

    for rule in cfg.pdi_rules()? {
        let key = rule.key;
        if let Err(e) = pdi.insert(rule) {
            warn!("Pdi rule {} not added, {}", key, e);
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();

    env_logger::init();

    let cfg_file = ConfigFile::new(&opt.config);
    let dp = Arc::new(Dataplane::new());
    let pdi = Arc::new(PdiMap::default());

    match opt.cmd {
        Command::Check => {
            let cfg = cfg_file.load()?;
            let entries = cfg.entries(0)?;
            let rules = cfg.pdi_rules()?;
            println!(
                "{}: {} table entries, {} pdi rules",
                opt.config,
                entries.len(),
                rules.len()
            );
        }
        Command::Replay {
            input,
            stats,
            conntrack,
        } => {
            load(&cfg_file, &dp, &pdi)?;
            let out = tokio::io::stdout();
            let summary = match input {
                Some(path) => {
                    let file = File::open(&path)
                        .await
                        .context(format!("Can't read frames file: {}", path))?;
                    replay::run(&dp, BufReader::new(file), out).await?
                }
                None => replay::run(&dp, BufReader::new(tokio::io::stdin()), out).await?,
            };
            info!(
                "Replay summary, frames/errors: {}/{}",
                summary.frames, summary.errors
            );
            if stats {
                stats::Stats::new(&dp).print_all();
            }
            if conntrack {
                conntrack::conntrack_list(&dp);
            }
        }
        Command::Run => {
            let cfg = load(&cfg_file, &dp, &pdi)?;
            let started: DateTime<Local> = Local::now();
            let period = Duration::from_secs(cfg.aging.interval.max(1));
            let ager = tokio::spawn(aging::run(dp.clone(), pdi.clone(), period));

            info!("Waiting for Ctrl-C...");
            signal::ctrl_c().await?;
            ager.abort();

            println!("Running since {}", started.format("%Y-%m-%d %H:%M:%S"));
            stats::Stats::new(&dp).print_all();
            let count = conntrack::remove_all(&dp);
            info!("Exiting, {} tracked flows dropped", count);
        }
    }

    Ok(())
}
