use anyhow::{bail, Context};
use clap::Parser;
use gdbmux::mi::{Record, Value};
use gdbmux::session::{
    call, call_timeout, CorrelationStrategy, EventKind, Mode, Session, SessionConfig,
};
use gdbmux::{mux_info, SessionEvent};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[clap(long, env = "GDBMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Debug the program through gdbserver
    #[clap(long)]
    remote: bool,

    /// Keep a single command in flight, without command tokens
    #[clap(long)]
    serialized: bool,

    /// Set a breakpoint before the program starts (maybe more than one)
    #[clap(short, long)]
    breakpoint: Vec<String>,

    /// Seconds to wait for the debugger to become ready
    #[clap(long, default_value_t = 10)]
    timeout: u64,

    /// Disable gdbmux logs
    #[clap(short, long)]
    quiet: bool,

    /// Print stop records and call stacks as JSON lines
    #[clap(long)]
    json: bool,

    program: String,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

enum Notice {
    Stopped(Arc<Record>),
    Gone(String),
}

fn frame_line(frame: &Value) -> String {
    let level = frame.get_str("level").unwrap_or("?");
    let func = frame.get_str("func").unwrap_or("??");
    match (frame.get_str("file"), frame.get_str("line")) {
        (Some(file), Some(line)) => format!("#{level} {func} at {file}:{line}"),
        _ => format!("#{level} {func} ({})", frame.get_str("addr").unwrap_or("?")),
    }
}

fn print_stop(session: &Session, record: &Record, json: bool) -> anyhow::Result<()> {
    let stack = call(|k| session.call_stack(&[], k)).context("call stack")?;
    if json {
        println!("{}", serde_json::to_string(record)?);
        println!("{}", serde_json::to_string(&stack.payload)?);
        return Ok(());
    }

    let reason = record.payload.get_str("reason").unwrap_or("unknown");
    println!("stopped: {reason}");
    if let Some(frames) = stack.payload.get("stack") {
        for frame in frames.items() {
            println!("  {}", frame_line(frame));
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    gdbmux::log::init("info");
    if args.quiet {
        gdbmux::log::disable();
    }

    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    if args.remote {
        config.mode = Mode::Remote;
    }
    if args.serialized {
        config.correlation = CorrelationStrategy::Serialized;
    }
    config.breakpoints.extend(args.breakpoint.iter().cloned());

    let session = Session::start(config).context("start debug session")?;

    let (tx, rx) = mpsc::channel();
    let tx = Arc::new(Mutex::new(tx));
    session.subscribe(EventKind::ProgramOutput, |e| {
        if let SessionEvent::ProgramOutput(text) = e {
            print!("{text}");
            _ = std::io::stdout().flush();
        }
    });
    session.subscribe(EventKind::ProgramError, |e| {
        if let SessionEvent::ProgramError(text) = e {
            eprint!("{text}");
        }
    });
    session.subscribe(EventKind::StateChange, {
        let tx = tx.clone();
        move |e| {
            if let SessionEvent::Record(record) = e {
                if record.class == "stopped" {
                    _ = tx
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .send(Notice::Stopped(record.clone()));
                }
            }
        }
    });
    for kind in [EventKind::Exit, EventKind::Error, EventKind::Disconnect] {
        let tx = tx.clone();
        session.subscribe(kind, move |e| {
            _ = tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send(Notice::Gone(format!("{e:?}")));
        });
    }

    if !session.wait_ready(Duration::from_secs(args.timeout)) {
        bail!("debugger is not ready after {} seconds", args.timeout);
    }
    if let Some(version) = session.debugger_version() {
        mux_info!("using gdb {version}");
    }

    let program_args: Vec<&str> = args.args.iter().map(String::as_str).collect();
    call(|k| session.load(&args.program, &program_args, k))
        .with_context(|| format!("load {}", args.program))?;
    call(|k| session.run(&[], k)).context("run program")?;

    while let Ok(notice) = rx.recv() {
        match notice {
            Notice::Stopped(record) => {
                let reason = record.payload.get_str("reason").unwrap_or_default();
                if reason.starts_with("exited") {
                    match record.payload.get_str("exit-code") {
                        Some(code) => println!("program exited with code {code}"),
                        None => println!("program exited"),
                    }
                    break;
                }
                print_stop(&session, &record, args.json)?;
                call(|k| session.continue_execution(&[], k)).context("continue")?;
            }
            Notice::Gone(event) => bail!("debugger is gone: {event}"),
        }
    }

    _ = call_timeout(Duration::from_secs(args.timeout), |k| session.quit(k));
    Ok(())
}
