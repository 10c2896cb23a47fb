//! Read a one-step planning template in aspif; compile it, search
//! for a plan over growing horizons, and print what was found.

use std::fs::read_to_string;
use std::io::{stdin, Read};
use std::process::exit;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context as _, Result};
use atty::Stream;

use horizon_planner::{
    BlockMode, Driver, Event, PlanResult, PlannerOptions, ProcStatus, Retry, SequentialCheck, Strategy,
};
use horizon_solver::Solver;
use horizon_syntax::{parse_aspif, parse_facts, Symbol};
use horizon_template::compile;
use horizon_tracer::Trace;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: horizon [options] [file]

Basic Options:
  -h, --help              Print help and exit
  -v, --verbose           Trace every stage to stderr
  --outf=n                Use {0=default|1=competition} output
  --stats                 Print statistics

Scheduler Options:
  -A n                    Run algorithm A with a queue of n lengths
  -B r                    Run algorithm B with parameter r (default 0.9)
  -C r                    Run algorithm C with ratio r
  -M n                    Use at most n runs with B, n lengths with C (default 20)
  -S n                    Step for horizon lengths 0, n, 2n, ... (default 5)
  -F n                    Starting horizon length (default 0)
  -T n                    Ending horizon length (default 3000)
  -i n                    Decisions per restart (default 60, 0 for unbounded)
  -r n                    Restarts per solve call (default 100, 0 for unbounded)
  --time-limit=s          Seconds per solve call
  --memory-limit=n        Do not ground past n MB
  --keep-after-unsat      After finding n to be UNSAT, keep runs with m<n
  --query=symbol          External marking the goal step (default query)
  --skip=symbol           External forbidding actions at a step (default skip)

Test Options:
  --test[=file]           Check plans for serializability, with actions
                          described by the template's facts or by file
  --test-once             Re-solve once after a rejected plan (default)
  --test-until-not-sat    Re-solve until no model is left
  --test-minimal          Block a minimal set of actions, not the plan";

/// Command line settings beyond the planner's own options.
struct Args {
    options: PlannerOptions,
    file: Option<String>,
    test: Option<Option<String>>,
    block: BlockMode,
    outf: u8,
    stats: bool,
    trace: Trace,
}

fn main() {
    match run() {
        Ok(code) => exit(code),
        Err(error) => {
            eprintln!("*** ERROR: {error:#}");
            exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let clock = Instant::now();
    println!("horizon version {VERSION}");
    let Some(args) = parse_args(std::env::args().skip(1))? else {
        println!("{USAGE}");
        return Ok(0);
    };
    let say = |line: &str| {
        if args.outf == 1 {
            println!("% {line}");
        } else {
            println!("{line}");
        }
    };

    if args.file.is_none() && atty::is(Stream::Stdin) && atty::is(Stream::Stdout) {
        println!("Reading aspif from stdin, terminated with Ctrl-D.");
    }
    let input = read_file(args.file.as_deref())?;
    let statements = parse_aspif(&input).context("Parsing the template")?;
    let mut engine = Solver::new(args.options.solve_limit(), args.trace);
    engine.load(statements).context("Loading the template")?;
    let template = compile(&mut engine, args.trace).context("Compiling the template")?;

    let check = match &args.test {
        None => None,
        Some(file) => {
            let facts = match file {
                Some(file) => parse_facts(&read_file(Some(file.as_str()))?).context("Parsing the action descriptions")?,
                None => template.facts().to_vec(),
            };
            Some(SequentialCheck::new(&facts, args.block, args.trace))
        }
    };
    let backend = Solver::new(args.options.solve_limit(), args.trace);
    let mut driver = Driver::new(template, backend, ProcStatus, &args.options, args.trace)?;
    if let Some(check) = check {
        driver = driver.with_check(Box::new(check));
    }

    let result = driver.run(|event| match event {
        Event::Solving { .. } => say("Solving..."),
        Event::Model { answer, .. } => {
            if args.outf == 0 {
                println!("Answer: 1\n{answer}");
            } else {
                let atoms = answer.symbols().map(|s| format!("{s}.")).collect::<Vec<_>>();
                println!("ANSWER\n{}", atoms.join(" "));
            }
        }
        Event::Rejected { .. } | Event::Outcome { .. } => (),
    })?;

    let code = match result {
        PlanResult::Found { .. } => {
            say("SATISFIABLE");
            10
        }
        PlanResult::NotFound => {
            say("PLAN NOT FOUND");
            20
        }
    };
    if args.stats {
        println!("\n{}", driver.stats());
    }
    println!("\nTime\t\t: {:.3}s", clock.elapsed().as_secs_f64());
    Ok(code)
}

/// Returns `None` when help was asked for.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut options = PlannerOptions::default();
    let mut strategies = Vec::new();
    let mut parsed = Args {
        options: PlannerOptions::default(),
        file: None,
        test: None,
        block: BlockMode::Model,
        outf: 0,
        stats: false,
        trace: Trace::none(),
    };
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone() {
                Some(value) => Ok(value),
                None => args.next().ok_or_else(|| anyhow!("{name} expects a value")),
            }
        };
        match flag.as_str() {
            "-h" | "--help" => return Ok(None),
            "-v" | "--verbose" => parsed.trace = Trace::all(),
            "--stats" => parsed.stats = true,
            "--outf" => {
                parsed.outf = number(&value("--outf")?, "--outf")?;
                if parsed.outf > 1 {
                    bail!("--outf must be 0 or 1");
                }
            }
            "-A" => strategies.push(Strategy::Linear {
                size: number(&value("-A")?, "-A")?,
            }),
            "-B" => strategies.push(Strategy::Effort {
                gamma: number(&value("-B")?, "-B")?,
            }),
            "-C" => strategies.push(Strategy::Geometric {
                ratio: number(&value("-C")?, "-C")?,
            }),
            "-M" => options.processes = number(&value("-M")?, "-M")?,
            "-S" => options.inc = number(&value("-S")?, "-S")?,
            "-F" => options.start = number(&value("-F")?, "-F")?,
            "-T" => options.limit = number(&value("-T")?, "-T")?,
            "-i" => options.conflicts_per_restart = number(&value("-i")?, "-i")?,
            "-r" => options.restarts_per_solve = number(&value("-r")?, "-r")?,
            "--time-limit" => {
                options.time_limit = Some(Duration::from_secs_f64(number(&value("--time-limit")?, "--time-limit")?))
            }
            "--memory-limit" => options.memory_limit = Some(number(&value("--memory-limit")?, "--memory-limit")?),
            "--keep-after-unsat" => options.propagate_unsat = false,
            "--query" => options.query = symbol(&value("--query")?)?,
            "--skip" => options.skip = symbol(&value("--skip")?)?,
            "--test" => parsed.test = Some(inline.clone()),
            "--test-once" => options.retry = Retry::Once,
            "--test-until-not-sat" => options.retry = Retry::UntilNotSat { max: usize::MAX },
            "--test-minimal" => parsed.block = BlockMode::Minimal,
            "-" => parsed.file = None,
            _ if flag.starts_with('-') => bail!("unknown option {flag}\n\n{USAGE}"),
            _ => {
                if parsed.file.is_some() {
                    bail!("only one input file is supported");
                }
                parsed.file = Some(arg);
            }
        }
    }
    match strategies.as_slice() {
        [] => (),
        [strategy] => options.strategy = *strategy,
        _ => bail!("please choose only one scheduler: A, B, or C"),
    }
    parsed.options = options;
    Ok(Some(parsed))
}

fn number<T: FromStr>(value: &str, flag: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("{flag} expects a number, not {value:?}"))
}

fn symbol(value: &str) -> Result<Symbol> {
    value.parse().with_context(|| format!("Parsing symbol {value}"))
}

/// Read a file or standard input and return the content as a string.
fn read_file(filename: Option<&str>) -> Result<String> {
    match filename {
        None | Some("-") => {
            let mut buffer = String::new();
            stdin()
                .read_to_string(&mut buffer)
                .context("Reading from stdin")?;
            Ok(buffer)
        }
        Some(filename) => read_to_string(filename).with_context(|| format!("Reading {filename}")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &str) -> Result<Option<Args>> {
        parse_args(args.split_whitespace().map(String::from))
    }

    #[test]
    fn schedulers() {
        let args = parse("-A 4 -S 2 -F 1 plan.aspif").unwrap().unwrap();
        assert_eq!(args.options.strategy, Strategy::Linear { size: 4 });
        assert_eq!((args.options.inc, args.options.start), (2, 1));
        assert_eq!(args.file.as_deref(), Some("plan.aspif"));

        let args = parse("-C 1.5 -M 3").unwrap().unwrap();
        assert_eq!(args.options.strategy, Strategy::Geometric { ratio: 1.5 });
        assert_eq!(args.options.processes, 3);

        let args = parse("").unwrap().unwrap();
        assert_eq!(args.options, PlannerOptions::default());
        assert!(parse("-A 2 -B 0.8").is_err());
        assert!(parse("-A").is_err());
        assert!(parse("-A two").is_err());
    }

    #[test]
    fn long_options() {
        let args = parse("--memory-limit=512 --keep-after-unsat --query=goal --outf=1 --stats").unwrap().unwrap();
        assert_eq!(args.options.memory_limit, Some(512));
        assert!(!args.options.propagate_unsat);
        assert_eq!(args.options.query, Symbol::constant("goal"));
        assert_eq!(args.outf, 1);
        assert!(args.stats);
        assert!(parse("--outf=2").is_err());
        assert!(parse("--frobnicate").is_err());
        assert!(parse("-h").unwrap().is_none());
    }

    #[test]
    fn tests() {
        let args = parse("--test").unwrap().unwrap();
        assert_eq!(args.test, Some(None));
        let args = parse("--test=actions.lp --test-until-not-sat --test-minimal").unwrap().unwrap();
        assert_eq!(args.test, Some(Some(String::from("actions.lp"))));
        assert_eq!(args.options.retry, Retry::UntilNotSat { max: usize::MAX });
        assert_eq!(args.block, BlockMode::Minimal);
        assert!(parse("").unwrap().unwrap().test.is_none());
    }
}
