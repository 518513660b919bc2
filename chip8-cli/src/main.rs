//! Entrypoint for CLI
use std::{env, error::Error, fs, time::Instant};

use chip8::{constants::*, prelude::*, IMPL_VERSION};
use log::{error, info, warn, LevelFilter};

use self::{error::AppError, inputmap::InputMap, terminal::Terminal};

mod error;
mod inputmap;
mod terminal;

static USAGE: &str = r#"
usage: chip8 CMD [FILE] [OPTIONS]

commands:
    run     Run the target ROM file in the terminal
    dump    Run the target ROM without a display, then print the screen
    dis     Disassemble the target ROM into readable assembly

options:
    --keymap FILE   YAML keymap to use instead of the builtin QWERTY layout (run)
    --hz N          Instructions executed per second, 0 to run unthrottled (run)
    --seed N        Seed for the random number generator (run, dump)
    --steps N       Number of instructions to execute (dump, default 1000)

keys:
    1 2 3 4         Chip8 keypad (default layout)
    q w e r
    a s d f
    z x c v
    p, Esc          Quit

examples:
    chip8 run breakout.rom
    chip8 run breakout.rom --hz 700 --keymap keys.yaml
    chip8 dump maze.rom --seed 7
    chip8 dis breakout.rom
"#;

/// Instructions executed per 60Hz timer tick when running headless.
const STEPS_PER_TICK: usize = (DEFAULT_CLOCK_FREQUENCY / DELAY_FREQUENCY) as usize;

const DEFAULT_DUMP_STEPS: usize = 1000;

fn run_rom(filepath: &str, opts: Opts) -> Result<(), AppError> {
    let bytecode = fs::read(filepath)?;

    let input_map = match opts.keymap {
        Some(ref keymap) => InputMap::from_file(keymap)?,
        None => InputMap::default_layout()?,
    };

    let conf = Chip8Conf {
        clock_frequency: opts.hz.map(Hz),
        rng_seed: opts.seed,
    };
    let mut vm = Chip8Vm::new(conf.clone());
    vm.load_bytecode(&bytecode)?;
    info!("loaded {filepath}, {} bytes", bytecode.len());

    let mut driver = Driver::new(&conf);
    // Terminal and log level are restored when dropped, before any error is reported.
    let mut terminal = Terminal::new(input_map)?;
    driver.run(&mut vm, &mut terminal)?;

    Ok(())
}

fn dump_rom(filepath: &str, opts: Opts) -> Result<(), AppError> {
    let bytecode = fs::read(filepath)?;

    let mut vm = Chip8Vm::new(Chip8Conf {
        clock_frequency: None,
        rng_seed: opts.seed,
    });
    vm.load_bytecode(&bytecode)?;

    let start = Instant::now();
    let executed = run_headless(&mut vm, opts.steps.unwrap_or(DEFAULT_DUMP_STEPS));
    let end = Instant::now();

    println!(
        "executed {executed} instructions in {}ms",
        end.duration_since(start).as_nanos() as f64 / 1000000.0
    ); // to millis
    println!("{}", vm.dump_display().map_err(Chip8Error::from)?);

    Ok(())
}

/// Execute instructions without a host, counting down the timers at the rate
/// of the default clock. Stops early when the program waits for a key.
fn run_headless(vm: &mut Chip8Vm, steps: usize) -> usize {
    for step in 0..steps {
        if vm.step() == Flow::KeyWait {
            warn!("program is waiting for a key, stopping at pc 0x{:03X}", vm.cpu().pc());
            return step;
        }
        if (step + 1) % STEPS_PER_TICK == 0 {
            vm.tick_timers();
        }
    }
    steps
}

fn disassemble_rom(filepath: &str) -> Result<(), AppError> {
    let bytecode = fs::read(filepath)?;

    Disassembler::new(&bytecode)
        .print_bytecode()
        .map_err(Chip8Error::from)?;

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .env()
        .init()?;

    let result = match parse_args(env::args().skip(1)) {
        Some(Cmd::Run { filepath, opts }) => run_rom(&filepath, opts),
        Some(Cmd::Dump { filepath, opts }) => dump_rom(&filepath, opts),
        Some(Cmd::Dis { filepath }) => disassemble_rom(&filepath),
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }

    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<Cmd> {
    let cmd = args.next()?;

    // don't format me T.T
    match cmd.as_str() {
        "run" => Some(Cmd::Run {
            filepath: args.next()?,
            opts: parse_opts(args)?,
        }),
        "dump" => Some(Cmd::Dump {
            filepath: args.next()?,
            opts: parse_opts(args)?,
        }),
        "dis" => Some(Cmd::Dis {
            filepath: args.next()?,
        }),
        _ => None,
    }
}

/// Parse trailing options. Unknown flags and malformed values fail the whole parse.
fn parse_opts(mut args: impl Iterator<Item = String>) -> Option<Opts> {
    let mut opts = Opts::default();

    while let Some(flag) = args.next() {
        let value = args.next()?;
        match flag.as_str() {
            "--keymap" => opts.keymap = Some(value),
            "--hz" => opts.hz = Some(value.parse().ok()?),
            "--seed" => opts.seed = Some(value.parse().ok()?),
            "--steps" => opts.steps = Some(value.parse().ok()?),
            _ => return None,
        }
    }

    Some(opts)
}

fn print_usage() {
    println!("Chip8 v{IMPL_VERSION}");
    println!("{USAGE}");
}

#[derive(Debug, PartialEq, Eq)]
enum Cmd {
    /// Run file
    Run { filepath: String, opts: Opts },
    /// Run headless and print the display
    Dump { filepath: String, opts: Opts },
    /// Disassemble
    Dis { filepath: String },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Opts {
    keymap: Option<String>,
    hz: Option<u64>,
    seed: Option<u64>,
    steps: Option<usize>,
}
