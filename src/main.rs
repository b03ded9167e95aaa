//! intel-gpu-top: top-like Intel GPU usage from the i915 PMU
//!
//! Option parsing, output-mode arbitration, terminal and signal handling,
//! and the fixed-interval sampling loop. All the machinery lives in the
//! library; this file owns the process.

use std::fs::File;
use std::io::{self, Write};
use std::mem;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;

use intel_gpu_top::error::Error;
use intel_gpu_top::linux::{device, Sampler};
use intel_gpu_top::output::{
    build_report, json::JsonRenderer, prometheus::PrometheusRenderer, render_sample,
    term::TermRenderer, text::TextRenderer, Renderer,
};

/// Display a top-like summary of Intel GPU usage
#[derive(Parser, Debug)]
#[command(name = "intel-gpu-top", version, about)]
struct Opts {
    /// Refresh period in milliseconds
    #[arg(short = 's', value_name = "ms", default_value_t = 1000)]
    period_ms: u64,

    /// Output to the specified file, or '-' for standard out
    #[arg(short = 'o', value_name = "file")]
    output: Option<PathBuf>,

    /// Output JSON formatted data
    #[arg(short = 'J', conflicts_with_all = ["list_text", "prometheus"])]
    json: bool,

    /// List plain text data
    #[arg(short = 'l', conflicts_with = "prometheus")]
    list_text: bool,

    /// Print one snapshot in the format of Prometheus metrics and exit
    #[arg(short = 'p')]
    prometheus: bool,

    /// List all cards and exit
    #[arg(short = 'L')]
    list_devices: bool,

    /// Device filter, e.g. card0, drm:/dev/dri/card0 or
    /// pci:vendor=8086,device=5917,card=0
    #[arg(short = 'd', value_name = "filter")]
    device: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Interactive,
    Text,
    Json,
    Prometheus,
}

impl Opts {
    fn mode(&self) -> Mode {
        if self.json {
            Mode::Json
        } else if self.list_text {
            Mode::Text
        } else if self.prometheus {
            Mode::Prometheus
        } else {
            Mode::Interactive
        }
    }
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn stopping() -> bool {
    STOP.load(Ordering::Relaxed)
}

/// Terminal geometry, with the serial-console fallback of 80x24
fn terminal_size() -> (usize, usize) {
    let mut ws: libc::winsize = unsafe { mem::zeroed() };
    let ret = unsafe { libc::ioctl(0, libc::TIOCGWINSZ, &mut ws) };

    if ret == -1 || ws.ws_col == 0 || ws.ws_row == 0 {
        (80, 24)
    } else {
        (ws.ws_col as usize, ws.ws_row as usize)
    }
}

/// Scoped raw-mode stdin: single characters, non-blocking, restored on drop
struct RawTerminal {
    orig_termios: libc::termios,
    orig_flags: libc::c_int,
}

impl RawTerminal {
    fn new() -> intel_gpu_top::Result<Self> {
        let last_err = || Error::TerminalIo(io::Error::last_os_error());

        unsafe {
            let orig_flags = libc::fcntl(0, libc::F_GETFL, 0);
            if orig_flags < 0 {
                return Err(last_err());
            }
            if libc::fcntl(0, libc::F_SETFL, orig_flags | libc::O_NONBLOCK) != 0 {
                return Err(last_err());
            }

            let mut termios: libc::termios = mem::zeroed();
            if libc::tcgetattr(0, &mut termios) != 0 {
                let err = last_err();
                let _ = libc::fcntl(0, libc::F_SETFL, orig_flags);
                return Err(err);
            }

            let orig_termios = termios;
            termios.c_lflag &= !libc::ICANON;
            termios.c_cc[libc::VMIN] = 1;
            termios.c_cc[libc::VTIME] = 0; // deciseconds only, poll() paces us

            if libc::tcsetattr(0, libc::TCSAFLUSH, &termios) != 0 {
                let err = last_err();
                let _ = libc::fcntl(0, libc::F_SETFL, orig_flags);
                return Err(err);
            }

            Ok(RawTerminal {
                orig_termios,
                orig_flags,
            })
        }
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::tcsetattr(0, libc::TCSAFLUSH, &self.orig_termios);
            let _ = libc::fcntl(0, libc::F_SETFL, self.orig_flags);
        }
    }
}

/// Wait out the remaining period on stdin; 'q' quits, '1' toggles the
/// per-class view. Returns true when the loop should stop.
fn process_stdin(timeout: Duration, class_view: &mut bool) -> bool {
    let mut pfd = libc::pollfd {
        fd: 0,
        events: libc::POLLIN,
        revents: 0,
    };

    let ret = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
    if ret < 0 {
        return true;
    }
    if ret == 0 {
        return false;
    }

    loop {
        let mut c = 0u8;
        let n = unsafe { libc::read(0, &mut c as *mut u8 as *mut libc::c_void, 1) };
        if n <= 0 {
            break;
        }

        match c {
            b'q' => return true,
            b'1' => *class_view = !*class_view,
            _ => {}
        }
    }

    false
}

fn run(opts: Opts) -> Result<()> {
    let mut mode = opts.mode();

    let stdout_is_tty = unsafe { libc::isatty(1) } == 1;
    if mode == Mode::Interactive && (opts.output.is_some() || !stdout_is_tty) {
        mode = Mode::Text;
    }

    let out: Box<dyn Write> = match &opts.output {
        Some(path) if path.as_os_str() != "-" => Box::new(File::create(path).with_context(
            || format!("Failed to open output file - '{}'!", path.display()),
        )?),
        _ => Box::new(io::stdout()),
    };

    let cards = device::scan()?;

    if opts.list_devices {
        for card in &cards {
            println!(
                "{}: {} ({:04x}:{:04x}) @ {}",
                card.card, card.codename, card.vendor_id, card.device_id, card.pci_slot
            );
        }
        return Ok(());
    }

    let card = device::select_card(&cards, opts.device.as_deref())?.clone();
    let mut sampler = Sampler::open(&card)?;

    // The flag ends the loop between ticks; in interactive mode the EINTR
    // out of poll() does the same, so the terminal guard always unwinds.
    let prev = unsafe {
        libc::signal(
            libc::SIGINT,
            on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        )
    };
    if prev == libc::SIG_ERR {
        warn!("Failed to install signal handler!");
    }

    // Raw stdin for single-character commands; a console that refuses is
    // not fatal, the output degrades to the column format.
    let mut raw_term = None;
    if mode == Mode::Interactive {
        match RawTerminal::new() {
            Ok(guard) => raw_term = Some(guard),
            Err(e) => {
                warn!("terminal setup failed ({e}), falling back to list output");
                mode = Mode::Text;
            }
        }
    }
    let _raw_term = raw_term;

    let mut class_view = mode == Mode::Interactive;

    let mut renderer: Box<dyn Renderer> = match mode {
        Mode::Interactive => Box::new(TermRenderer::new(
            io::stdout(),
            &card.codename,
            &card.card,
        )),
        Mode::Text => Box::new(TextRenderer::new(out)),
        Mode::Json => Box::new(JsonRenderer::new(out)),
        Mode::Prometheus => Box::new(PrometheusRenderer::new(out)),
    };

    let period = Duration::from_millis(opts.period_ms);

    // Priming read: the first displayed sample needs previous values.
    sampler.sample()?;

    while !stopping() {
        if mode == Mode::Interactive {
            let (w, h) = terminal_size();
            renderer.begin_frame(w, h, class_view);
        }

        // Prometheus is scraped: wait out the period, then print once.
        if mode == Mode::Prometheus {
            std::thread::sleep(period);
        }

        sampler.sample()?;

        if stopping() {
            break;
        }

        let show_classes = mode == Mode::Interactive && class_view;
        let report = build_report(&sampler.view(show_classes, &card.codename, &card.card));
        render_sample(renderer.as_mut(), &report)?;

        if mode == Mode::Prometheus {
            break;
        }

        if stopping() {
            break;
        }

        if mode == Mode::Interactive {
            if process_stdin(period, &mut class_view) {
                break;
            }
        } else {
            std::thread::sleep(period);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let opts = Opts::parse();

    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
