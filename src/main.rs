use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context as AnyhowContext, Result};
use clap::Parser;

use indicatif::ProgressStyle;
use tracing::{info, info_span, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use boxtrack::output::JsonLinesSink;
use boxtrack::{
    FlowSupplier, FrameSource, ImageSequence, OpticalFlow, PointSupplier, RedetectSupplier,
    ShiTomasi, Strategy, SyntheticSequence, Tracker, TrackerConfig,
};

#[derive(Parser)]
#[clap(name = "boxtrack", about = "Track the bounding box of a moving object")]
pub struct Args {
    /// Folder with the frames as jpg or png files, read in file name order
    #[clap(short, required_unless_present = "synthetic")]
    pub input_folder: Option<PathBuf>,

    /// Track a generated sequence with this many frames instead
    #[clap(long, conflicts_with = "input_folder")]
    pub synthetic: Option<usize>,

    /// Seed of the generated sequence
    #[clap(long, default_value = "0")]
    pub seed: u64,

    /// Write positions as JSON lines here instead of stdout
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    #[clap(flatten)]
    pub config: TrackerConfig,
}

fn main() -> Result<()> {
    // parse the config
    let mut args = Args::parse();

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    // load frames
    let mut source: Box<dyn FrameSource> = match (&args.input_folder, args.synthetic) {
        (_, Some(frame_count)) => {
            let sequence =
                SyntheticSequence::new(320, 240, frame_count, 48, (40, 100), (3, -1), args.seed);
            // start from where the object is
            let object = sequence.object_box(0);
            args.config.initial_box = object;
            info!("synthetic sequence, object starts at {:?}", object);
            Box::new(sequence)
        }
        (Some(folder), None) => Box::new(ImageSequence::new(folder)?),
        (None, None) => bail!("either an input folder or --synthetic is required"),
    };

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    let mut sink = JsonLinesSink::new(writer);

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    if let Some(length) = source.length() {
        header_span.pb_set_length(length as u64);
    }
    let header_span_enter = header_span.enter();

    let config = &args.config;
    let processed = match config.strategy {
        Strategy::Flow => {
            let supplier = FlowSupplier::new(config, OpticalFlow::new(&config.flow), ShiTomasi::new());
            track(config, supplier, source.as_mut(), &mut sink)?
        }
        Strategy::Redetect => {
            let supplier = RedetectSupplier::new(config, ShiTomasi::new());
            track(config, supplier, source.as_mut(), &mut sink)?
        }
    };
    sink.into_inner()?;

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    info!("tracked {} frames", processed);
    Ok(())
}

fn track<S: PointSupplier, W: Write>(
    config: &TrackerConfig,
    supplier: S,
    source: &mut dyn FrameSource,
    sink: &mut JsonLinesSink<W>,
) -> Result<usize> {
    let mut tracker = Tracker::new(config, supplier)?;
    // never set, the run ends with the sequence
    let cancel = AtomicBool::new(false);
    let processed = tracker.run(source, &cancel, |position| {
        Span::current().pb_inc(1);
        sink.write(position)?;
        Ok(())
    })?;
    info!("final box {:?}", tracker.bbox());
    Ok(processed)
}
