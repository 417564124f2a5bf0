//! `dvbreader` CLI: a thin demonstration binary driving the library's
//! public API end to end (tune a channel, list/add/remove scheduled
//! recordings). Argument layout follows
//! `examples/stuayu-recisdb-proxy-rs/recisdb-rs/src/context.rs`'s
//! `#[derive(Parser)]`/`Subcommand` shape.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};

use dvbreader::channel::TunerConfig;
use dvbreader::db::Database;
use dvbreader::status::{CallbackSink, StatusEvent, StatusSink};

#[derive(Debug, Parser)]
#[clap(name = "dvbreader")]
#[clap(about = "Tunes a DVB-S/S2 frontend, tracks PSI/SI and fans the stream out to listeners", long_about = None)]
#[clap(version)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Tune to a stored channel and run until interrupted, printing status
    /// events to stdout.
    Tune {
        /// DVB adapter index (`/dev/dvb/adapter<N>`).
        #[clap(short = 'a', long, default_value = "0")]
        adapter: u32,

        /// DiSEqC/multiswitch port, 0..=3.
        #[clap(long, default_value = "0")]
        satellite_port: u8,

        /// Channel id to tune, as stored in the channel database.
        #[clap(short, long, required = true)]
        channel: u32,

        /// How long to run before shutting down, in seconds. 0 means
        /// "until Ctrl-C" is not implemented here; this demonstration
        /// binary always runs for a fixed duration.
        #[clap(short, long, default_value = "30")]
        seconds: u64,

        /// Database file path.
        #[clap(long, value_name = "DB_PATH", default_value = "dvbreader.db")]
        database: PathBuf,
    },

    /// List upcoming scheduled recordings.
    ScheduleList {
        #[clap(long, value_name = "DB_PATH", default_value = "dvbreader.db")]
        database: PathBuf,
    },

    /// Add a one-off scheduled recording.
    ScheduleAdd {
        /// Channel id to record.
        #[clap(short, long, required = true)]
        channel: u32,

        /// Recording start time, Unix epoch seconds.
        #[clap(long, required = true)]
        start: i64,

        /// Recording end time, Unix epoch seconds.
        #[clap(long, required = true)]
        end: i64,

        #[clap(long, value_name = "DB_PATH", default_value = "dvbreader.db")]
        database: PathBuf,
    },

    /// Remove a scheduled recording by id.
    ScheduleRemove {
        #[clap(required = true)]
        event_id: u32,

        #[clap(long, value_name = "DB_PATH", default_value = "dvbreader.db")]
        database: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Tune { adapter, satellite_port, channel, seconds, database } => {
            run_tune(adapter, satellite_port, channel, seconds, &database)
        }
        Commands::ScheduleList { database } => run_schedule_list(&database),
        Commands::ScheduleAdd { channel, start, end, database } => run_schedule_add(channel, start, end, &database),
        Commands::ScheduleRemove { event_id, database } => run_schedule_remove(event_id, &database),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(unix)]
fn run_tune(adapter: u32, satellite_port: u8, channel_id: u32, seconds: u64, database: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    use dvbreader::reader::DvbReader;
    use dvbreader::tuner::LinuxTuner;

    let db = Database::open(database)?;
    let channel = db.channel_lookup(channel_id)?;
    let config = TunerConfig::from_channel(&channel, satellite_port);

    let status: Arc<dyn StatusSink> = Arc::new(CallbackSink::new(|event: StatusEvent| {
        info!("{event:?}");
    }));

    let tuner = LinuxTuner::open(adapter)?;
    let reader = DvbReader::new(Box::new(tuner), status);
    reader.tune(config, channel.service_id, Some(channel_id));

    std::thread::sleep(Duration::from_secs(seconds));
    reader.shutdown();
    Ok(())
}

#[cfg(not(unix))]
fn run_tune(_adapter: u32, _satellite_port: u8, _channel_id: u32, _seconds: u64, _database: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    Err("the Linux DVB frontend driver is only available on unix".into())
}

fn run_schedule_list(database: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    use dvbreader::scheduler::ScheduleSource;

    let db = Database::open(database)?;
    let now = chrono::Utc::now().timestamp();
    for entry in db.upcoming(now) {
        println!(
            "#{:<6} channel={:<6} start={} end={} status={:?}",
            entry.id, entry.channel_id, entry.time_start, entry.time_end, entry.status
        );
    }
    Ok(())
}

fn run_schedule_add(channel: u32, start: i64, end: i64, database: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(database)?;
    let id = db.schedule_add(channel, start, end, None)?;
    println!("scheduled recording #{id}");
    Ok(())
}

fn run_schedule_remove(event_id: u32, database: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(database)?;
    db.schedule_remove(event_id)?;
    println!("removed scheduled recording #{event_id}");
    Ok(())
}
