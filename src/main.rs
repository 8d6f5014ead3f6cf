//! Nodal - circuit simulator command line
//!
//! Runs one analysis on a built-in reference circuit and prints the result
//! as CSV on stdout.
//!
//! # Usage
//!
//! ```bash
//! nodal --circuit ccvs dc -10 10 1e-3 > ccvs.csv
//! nodal --circuit rc tran 1e-5 5e-3
//! nodal -vv --circuit diode ac 1 1e6 10
//! ```

use std::io::{self, BufWriter, Write};

use clap::{Parser, Subcommand, ValueEnum};
use log::{LevelFilter, Log, Metadata, Record};
use nodal_core::{
    circuit::{Circuit, DeviceInstance, DeviceRegistry, ModelDef, ModelKind, Netlist},
    devices::Waveform,
    error::{NodalError, Result},
    simulation::{
        Ac, BiasingConfig, DcSweep, FrequencySweep, OperatingPoint, RealSolution, SweepSpec,
        TimeConfig, Transient,
    },
};

/// General-purpose circuit simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Built-in circuit to simulate
    #[arg(short, long, value_enum, default_value_t = BuiltinCircuit::Ccvs)]
    circuit: BuiltinCircuit,

    /// Circuit temperature in degrees Celsius
    #[arg(short, long, default_value_t = 27.0)]
    temperature: f64,

    /// Increase log output on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    analysis: Analysis,
}

#[derive(Subcommand, Debug)]
enum Analysis {
    /// DC operating point
    Op,
    /// Sweep the circuit's input source
    Dc {
        #[arg(allow_negative_numbers = true)]
        start: f64,
        #[arg(allow_negative_numbers = true)]
        stop: f64,
        step: f64,
    },
    /// Small-signal analysis over a decade sweep
    Ac {
        start: f64,
        stop: f64,
        /// Points per decade
        #[arg(default_value_t = 10)]
        points: usize,
    },
    /// Transient analysis
    Tran { step: f64, stop: f64 },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BuiltinCircuit {
    /// Current source driving a transimpedance of 12 ohms
    Ccvs,
    /// RC low-pass driven by a pulse
    Rc,
    /// Diode clamp behind a series resistor
    Diode,
}

impl BuiltinCircuit {
    fn netlist(self) -> Netlist {
        let mut netlist = Netlist::new();
        match self {
            BuiltinCircuit::Ccvs => {
                netlist
                    .add_device(
                        DeviceInstance::new('I', "I1", &["0", "in"])
                            .with_value(0.0)
                            .with_ac(0.9, 0.0),
                    )
                    .add_device(DeviceInstance::new('V', "V1", &["in", "0"]).with_value(0.0))
                    .add_device(
                        DeviceInstance::new('H', "H1", &["0", "out"])
                            .with_control("V1")
                            .with_value(12.0),
                    )
                    .add_device(DeviceInstance::new('R', "RL", &["out", "0"]).with_value(1e3));
            }
            BuiltinCircuit::Rc => {
                netlist
                    .add_device(
                        DeviceInstance::new('V', "V1", &["in", "0"])
                            .with_waveform(Waveform::pulse(0.0, 1.0, 1e-4, 1e-6, 1e-6, 2e-3))
                            .with_ac(1.0, 0.0),
                    )
                    .add_device(DeviceInstance::new('R', "R1", &["in", "out"]).with_value(1e3))
                    .add_device(DeviceInstance::new('C', "C1", &["out", "0"]).with_value(1e-6));
            }
            BuiltinCircuit::Diode => {
                netlist
                    .add_model(
                        ModelDef::new("D1N4148", ModelKind::Diode)
                            .with_param("is", 2.52e-9)
                            .with_param("n", 1.752)
                            .with_param("rs", 0.568)
                            .with_param("cjo", 4e-12)
                            .with_param("tt", 20e-9),
                    )
                    .add_device(
                        DeviceInstance::new('V', "V1", &["in", "0"])
                            .with_value(5.0)
                            .with_ac(1.0, 0.0),
                    )
                    .add_device(DeviceInstance::new('R', "R1", &["in", "a"]).with_value(1e3))
                    .add_device(DeviceInstance::new('D', "D1", &["a", "0"]).with_model("D1N4148"));
            }
        }
        netlist
    }

    /// Source a DC sweep drives.
    fn input(self) -> &'static str {
        match self {
            BuiltinCircuit::Ccvs => "I1",
            BuiltinCircuit::Rc | BuiltinCircuit::Diode => "V1",
        }
    }
}

/// Writes log records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
    log::debug!("log level {level}");
}

fn write_header(out: &mut impl Write, first: &str, solution: &RealSolution) -> io::Result<()> {
    write!(out, "{first}")?;
    for (variable, _) in solution.iter() {
        write!(out, ",{variable}")?;
    }
    writeln!(out)
}

fn write_row(out: &mut impl Write, first: f64, solution: &RealSolution) -> io::Result<()> {
    write!(out, "{first:e}")?;
    for (_, value) in solution.iter() {
        write!(out, ",{value:e}")?;
    }
    writeln!(out)
}

fn run(args: &Args, circuit: &Circuit, out: &mut impl Write) -> Result<()> {
    let config = BiasingConfig::default().with_temperature_celsius(args.temperature);
    let io_error = |e: io::Error| NodalError::invalid_simulation(format!("output: {e}"));

    match args.analysis {
        Analysis::Op => {
            let solution = OperatingPoint::new(config).run(circuit)?;
            writeln!(out, "variable,value").map_err(io_error)?;
            for (variable, value) in solution.iter() {
                writeln!(out, "{variable},{value:e}").map_err(io_error)?;
            }
        }
        Analysis::Dc { start, stop, step } => {
            let source = args.circuit.input();
            let sweep = SweepSpec::new(source, start, stop, step);
            let points = DcSweep::new(config, vec![sweep]).run(circuit)?;
            let mut header = false;
            for point in &points {
                match &point.outcome {
                    Ok(solution) => {
                        if !header {
                            write_header(out, source, solution).map_err(io_error)?;
                            header = true;
                        }
                        write_row(out, point.values[0], solution).map_err(io_error)?;
                    }
                    Err(e) => log::error!("{source} = {}: {e}", point.values[0]),
                }
            }
        }
        Analysis::Ac {
            start,
            stop,
            points,
        } => {
            let sweep = FrequencySweep::Decade {
                points_per_decade: points,
                start,
                stop,
            };
            let result = Ac::new(config, sweep).run(circuit)?;
            write!(out, "frequency").map_err(io_error)?;
            for (variable, _) in result.operating_point.iter() {
                write!(out, ",|{variable}|,arg {variable}").map_err(io_error)?;
            }
            writeln!(out).map_err(io_error)?;
            for point in &result.points {
                write!(out, "{:e}", point.frequency).map_err(io_error)?;
                for (_, value) in point.solution.iter() {
                    write!(out, ",{:e},{:.4}", value.norm(), value.arg().to_degrees())
                        .map_err(io_error)?;
                }
                writeln!(out).map_err(io_error)?;
            }
        }
        Analysis::Tran { step, stop } => {
            let transient = Transient::new(config, TimeConfig::new(step, stop));
            let mut run = transient.start(circuit)?;
            let mut header = false;
            while let Some(point) = run.tick()? {
                if !header {
                    write_header(out, "time", &point.solution).map_err(io_error)?;
                    header = true;
                }
                write_row(out, point.time, &point.solution).map_err(io_error)?;
            }
            let stats = run.statistics();
            log::info!(
                "{} time points, {} accepted, {} rejected, {} iterations",
                stats.time_points,
                stats.accepted,
                stats.rejected,
                stats.iterations
            );
        }
    }
    out.flush().map_err(io_error)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // Build the circuit
    let registry = DeviceRegistry::standard();
    let circuit = Circuit::from_netlist(&args.circuit.netlist(), &registry)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    run(&args, &circuit, &mut out)
}
