use std::path::PathBuf;

use clap::Parser;
use dash_ts_validator::validate::{Options, SegmentType, run};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[clap(about = "Validate a DASH MPEG-2 TS segment")]
struct Opt {
    /// Segment file to validate
    input: PathBuf,

    /// Increase verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// The segment is an initialization segment (PAT/PMT only)
    #[clap(short = 'i', long, conflicts_with = "starts_with_sap")]
    init_segment: bool,

    /// The segment starts with a SAP of the given type
    #[clap(short = 's', long, value_name = "TYPE")]
    starts_with_sap: Option<u8>,

    /// Dump every AVC elementary stream next to the input file
    #[clap(short, long, default_value_t = false)]
    extract: bool,

    /// Print the verdict as JSON
    #[clap(long, default_value_t = false)]
    json: bool,
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    init_logging(opt.verbose);

    let segment_type = match SegmentType::from_flags(opt.init_segment, opt.starts_with_sap) {
        Ok(t) => t,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(err.code());
        }
    };
    let verdict = run(&Options {
        input: opt.input,
        segment_type,
        extract: opt.extract,
        json: opt.json,
    })?;

    if opt.json {
        println!("{}", verdict.to_json());
    } else {
        println!("{}", verdict.summary_line());
    }
    std::process::exit(verdict.status)
}
