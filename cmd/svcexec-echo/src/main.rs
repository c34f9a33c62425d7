//! svcexec Echo Server
//!
//! TCP echo server whose connections are served by a selectable threading
//! model. Each connection reads one chunk per readiness callback, echoes it
//! back and re-registers for the next.
//!
//! Usage:
//!     cargo build --release -p svcexec-echo
//!     ./target/release/svcexec-echo [port] [model] [extra_port]
//!
//!     model:      dedicated | borrowed (default: borrowed)
//!     extra_port: connections accepted here are exempt from pool
//!                 saturation and overflow into the reserved executor
//!
//! Tuning via environment:
//!     SVX_POOL_THREADS, SVX_QUEUE_CAPACITY, SVX_RESERVED_THREADS,
//!     SVX_LOG_LEVEL=debug, SVX_ECHO_DRAIN_MS (shutdown deadline)
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999

use svcexec::{
    env_get_ms, kdebug, kerror, kinfo, kwarn, Executor, ExecutorSet, ReadyCallback, Session,
    SessionHandle, SessionOutcome, TcpSession, ThreadingModel,
};

use nix::sys::signal::{signal, SigHandler, Signal};

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BUF_SIZE: usize = 4096;
const ACCEPT_IDLE: Duration = Duration::from_millis(20);
const STATS_INTERVAL: Duration = Duration::from_secs(10);

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}

// ── Per-connection handling ──

/// Register `conn` for its next readable event on `exec`.
fn arm(exec: Arc<dyn Executor>, conn: Arc<TcpSession>) {
    let session: SessionHandle = conn.clone();
    let id = conn.id();
    let next = Arc::clone(&exec);
    let callback: ReadyCallback = Box::new(move |outcome| on_ready(next, conn, outcome));
    if let Err(e) = exec.run_when_data_available(session, callback) {
        kdebug!("{}: not registered: {}", id, e);
    }
}

fn on_ready(exec: Arc<dyn Executor>, conn: Arc<TcpSession>, outcome: SessionOutcome) {
    match outcome {
        SessionOutcome::Readable => match echo_once(&conn) {
            Ok(true) => arm(exec, conn),
            Ok(false) => kdebug!("{}: peer closed", conn.id()),
            Err(e) => kdebug!("{}: {}", conn.id(), e),
        },
        other => kdebug!("{}: {:?}", conn.id(), other),
    }
}

/// Echo one chunk. `Ok(false)` on EOF.
fn echo_once(conn: &TcpSession) -> io::Result<bool> {
    let mut buf = [0u8; BUF_SIZE];
    let mut stream = conn.stream();
    let n = stream.read(&mut buf)?;
    if n == 0 {
        return Ok(false);
    }
    stream.write_all(&buf[..n])?;
    Ok(true)
}

fn accept(set: &ExecutorSet, stream: TcpStream, model: ThreadingModel, exempt: bool) {
    // Accepted sockets may inherit O_NONBLOCK from the listener.
    if let Err(e) = stream.set_nonblocking(false) {
        kwarn!("accept: {}", e);
        return;
    }
    let conn = Arc::new(TcpSession::new(stream));
    let exec = set.executor_for_client(model, exempt);
    kdebug!(
        "{} from {:?} on {}",
        conn.id(),
        conn.peer_addr().ok(),
        exec.name()
    );
    arm(exec, conn);
}

fn bind(port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Accept whatever is pending. Returns true if anything was accepted.
fn poll_accept(set: &ExecutorSet, listener: &TcpListener, model: ThreadingModel, exempt: bool) -> bool {
    let mut accepted = false;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                accept(set, stream, model, exempt);
                accepted = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return accepted,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                kwarn!("accept: {}", e);
                return accepted;
            }
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9999);
    let model: ThreadingModel = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(ThreadingModel::Borrowed);
    let extra_port: Option<u16> = args.get(3).and_then(|s| s.parse().ok());

    // SAFETY: the handler only stores to an atomic.
    unsafe {
        for sig in [Signal::SIGINT, Signal::SIGTERM] {
            if let Err(e) = signal(sig, SigHandler::Handler(handle_signal)) {
                kwarn!("cannot install {} handler: {}", sig, e);
            }
        }
    }

    let set = match ExecutorSet::from_env() {
        Ok(set) => set,
        Err(e) => {
            kerror!("{}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = set.start() {
        kerror!("cannot start executors: {}", e);
        set.shutdown(Duration::ZERO);
        std::process::exit(1);
    }

    let listener = match bind(port) {
        Ok(l) => l,
        Err(e) => {
            kerror!("bind :{}: {}", port, e);
            set.shutdown(Duration::ZERO);
            std::process::exit(1);
        }
    };
    let extra = match extra_port.map(bind).transpose() {
        Ok(l) => l,
        Err(e) => {
            kerror!("bind extra port: {}", e);
            set.shutdown(Duration::ZERO);
            std::process::exit(1);
        }
    };

    kinfo!(
        "svcexec-echo: listening on :{} ({}){}",
        port,
        model,
        extra_port.map(|p| format!(", exempt clients on :{}", p)).unwrap_or_default()
    );

    let mut last_stats = Instant::now();
    while RUNNING.load(Ordering::Relaxed) {
        let mut busy = poll_accept(&set, &listener, model, false);
        if let Some(extra) = &extra {
            busy |= poll_accept(&set, extra, model, true);
        }
        if !busy {
            std::thread::sleep(ACCEPT_IDLE);
        }
        if last_stats.elapsed() >= STATS_INTERVAL {
            for (name, stats) in set.stats() {
                kdebug!("{}: {:?}", name, stats);
            }
            last_stats = Instant::now();
        }
    }

    kinfo!("svcexec-echo: shutting down");
    drop(listener);
    drop(extra);
    let drain = env_get_ms("SVX_ECHO_DRAIN_MS", Duration::from_secs(5));
    for (name, report) in set.shutdown(drain) {
        kinfo!(
            "{}: drained={} cancelled={} sessions_ended={} in {:?}",
            name,
            report.drained,
            report.cancelled,
            report.sessions_ended,
            report.elapsed
        );
    }
    let acct = set.accounting().snapshot();
    kinfo!(
        "threads: launched={} failed={} peak={}",
        acct.launched,
        acct.failed,
        acct.peak
    );
}
