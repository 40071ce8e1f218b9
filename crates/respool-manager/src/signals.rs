//! Signal intake: OS signals → bounded in-process event stream.
//!
//! Handlers installed here are restricted to async-signal-safe work: push
//! the signal into a fixed-capacity ring, raise a flag, write one byte to
//! the self-pipe. All substantive handling happens on the supervisor loop.
//!
//! The ring holds at most [`SIGNAL_QUEUE_CAP`] entries. Overflow drops the
//! new arrival and bumps an atomic counter which the loop turns into a log
//! note on its next drain (handlers themselves cannot log). Losing one of
//! many queued signals is harmless because every signal's effect is
//! idempotent over the loop.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::pipe2;
use respool_common::PoolResult;

/// Maximum number of queued, not-yet-handled signals.
pub const SIGNAL_QUEUE_CAP: usize = 5;

const RING_SLOTS: usize = SIGNAL_QUEUE_CAP + 1;

/// Signals the master queues for the loop.
///
/// SIGCHLD is handled too, but it only wakes the loop (the opportunistic
/// reaper runs every iteration regardless), so it never appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSignal {
    Quit,
    Int,
    Term,
    Usr1,
    Usr2,
    Cont,
    Hup,
    Winch,
}

impl PoolSignal {
    /// Every signal the master queues, in escalation-friendly order.
    pub const ALL: [PoolSignal; 8] = [
        PoolSignal::Quit,
        PoolSignal::Int,
        PoolSignal::Term,
        PoolSignal::Usr1,
        PoolSignal::Usr2,
        PoolSignal::Cont,
        PoolSignal::Hup,
        PoolSignal::Winch,
    ];

    /// The OS signal this corresponds to.
    pub fn os_signal(self) -> Signal {
        match self {
            PoolSignal::Quit => Signal::SIGQUIT,
            PoolSignal::Int => Signal::SIGINT,
            PoolSignal::Term => Signal::SIGTERM,
            PoolSignal::Usr1 => Signal::SIGUSR1,
            PoolSignal::Usr2 => Signal::SIGUSR2,
            PoolSignal::Cont => Signal::SIGCONT,
            PoolSignal::Hup => Signal::SIGHUP,
            PoolSignal::Winch => Signal::SIGWINCH,
        }
    }

    pub fn name(self) -> &'static str {
        self.os_signal().as_str()
    }

    fn from_raw(signum: libc::c_int) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|sig| sig.os_signal() as libc::c_int == signum)
    }

    fn encode(self) -> u8 {
        // Offset by one so 0 can mean "slot empty" in the ring.
        self as u8 + 1
    }

    fn decode(value: u8) -> Option<Self> {
        Self::ALL.get(value.checked_sub(1)? as usize).copied()
    }
}

/// Fixed-capacity lock-free FIFO of pending signals.
///
/// Push is async-signal-safe (atomics only). The supervisor loop is the
/// only consumer. Slot value 0 marks an empty slot, so a consumer that
/// races a reserved-but-unwritten slot spins for the handful of
/// instructions until the producer's store lands.
pub struct SignalRing {
    slots: [AtomicU8; RING_SLOTS],
    head: AtomicUsize,
    tail: AtomicUsize,
    dropped: AtomicUsize,
}

impl SignalRing {
    pub const fn new() -> Self {
        Self {
            slots: [
                AtomicU8::new(0),
                AtomicU8::new(0),
                AtomicU8::new(0),
                AtomicU8::new(0),
                AtomicU8::new(0),
                AtomicU8::new(0),
            ],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Enqueue a signal; false (and a dropped-count bump) when full.
    pub fn push(&self, signal: PoolSignal) -> bool {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) >= SIGNAL_QUEUE_CAP {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            if self
                .tail
                .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.slots[tail % RING_SLOTS].store(signal.encode(), Ordering::Release);
                return true;
            }
        }
    }

    /// Dequeue the oldest pending signal.
    pub fn pop(&self) -> Option<PoolSignal> {
        let head = self.head.load(Ordering::Acquire);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let slot = &self.slots[head % RING_SLOTS];
        loop {
            let value = slot.swap(0, Ordering::AcqRel);
            if value != 0 {
                self.head.store(head.wrapping_add(1), Ordering::Release);
                return PoolSignal::decode(value);
            }
            // A handler reserved this slot but has not stored yet.
            std::hint::spin_loop();
        }
    }

    /// Number of queued signals.
    pub fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of signals dropped since the last call, resetting the count.
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl Default for SignalRing {
    fn default() -> Self {
        Self::new()
    }
}

static INTAKE: SignalRing = SignalRing::new();
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);
static REAP_IN_PROGRESS: AtomicBool = AtomicBool::new(false);
static INTERRUPT_REAP: AtomicBool = AtomicBool::new(false);

/// The process-wide intake ring the handlers feed.
pub fn intake() -> &'static SignalRing {
    &INTAKE
}

extern "C" fn queueable_handler(signum: libc::c_int) {
    if let Some(signal) = PoolSignal::from_raw(signum) {
        INTAKE.push(signal);
        // INT/TERM during a blocking drain-reap must unwind the wait so the
        // loop can escalate; the EINTR'd waitpid checks this flag.
        if matches!(signal, PoolSignal::Int | PoolSignal::Term)
            && REAP_IN_PROGRESS.load(Ordering::Relaxed)
        {
            INTERRUPT_REAP.store(true, Ordering::Relaxed);
        }
    }
    wake();
}

extern "C" fn child_handler(_signum: libc::c_int) {
    wake();
}

/// Write one byte to the self-pipe. EAGAIN (pipe full) means the loop is
/// already due to wake, so every outcome is fine to ignore.
fn wake() {
    let fd = WAKE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let buf = [0u8; 1];
        unsafe {
            libc::write(fd, buf.as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// Install the master's signal handlers.
///
/// Handlers are installed without `SA_RESTART` so blocking waits observe
/// EINTR and can notice the interrupt-reap flag.
pub fn install() -> PoolResult<()> {
    let queueable = SigAction::new(
        SigHandler::Handler(queueable_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in PoolSignal::ALL {
        unsafe { sigaction(signal.os_signal(), &queueable) }
            .map_err(std::io::Error::from)?;
    }
    let child = SigAction::new(
        SigHandler::Handler(child_handler),
        SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGCHLD, &child) }.map_err(std::io::Error::from)?;
    Ok(())
}

/// Restore default dispositions in a forked child.
///
/// The child must not inherit the master's deferred handlers; its worker
/// installs its own. Failures are ignored: there is no one to report to in
/// the child at this point, and the dispositions involved cannot fail for
/// these fixed signals.
pub fn reset_child_dispositions() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in PoolSignal::ALL {
        let _ = unsafe { sigaction(signal.os_signal(), &default) };
    }
    let _ = unsafe { sigaction(Signal::SIGCHLD, &default) };
}

/// Mark a blocking drain-reap as in progress (clears any stale interrupt).
pub fn begin_drain_reap() {
    INTERRUPT_REAP.store(false, Ordering::Relaxed);
    REAP_IN_PROGRESS.store(true, Ordering::Relaxed);
}

pub fn end_drain_reap() {
    REAP_IN_PROGRESS.store(false, Ordering::Relaxed);
}

/// Whether an INT/TERM arrived during the current drain-reap.
pub fn reap_interrupted() -> bool {
    INTERRUPT_REAP.load(Ordering::Relaxed)
}

/// Wake-up channel between the handlers and the supervisor loop.
///
/// A kernel pipe with both ends close-on-exec and the write end registered
/// for the handlers. The read end is drained with non-blocking reads after
/// the loop wakes.
pub struct SelfPipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl SelfPipe {
    pub fn new() -> PoolResult<Self> {
        let (read, write) =
            pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(std::io::Error::from)?;
        WAKE_FD.store(write.as_raw_fd(), Ordering::Relaxed);
        Ok(Self { read, write })
    }

    /// Block until the pipe is readable or `timeout` elapses.
    ///
    /// Returns true when the loop should treat this as a wake (readable or
    /// interrupted), false on a quiet timeout.
    pub fn wait_readable(&self, timeout: Duration) -> PoolResult<bool> {
        let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(self.read.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(Errno::EINTR) => Ok(true),
            Err(e) => Err(std::io::Error::from(e).into()),
        }
    }

    /// Drain every pending wake byte.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match nix::unistd::read(self.read.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break, // EAGAIN: drained
            }
        }
    }

    /// Detach and close both ends inside a forked child.
    ///
    /// The child keeps no wake channel; its copy of the registration is
    /// cleared first so a handler racing the close cannot write to a
    /// recycled descriptor.
    pub fn close_in_child(&self) {
        WAKE_FD.store(-1, Ordering::Relaxed);
        unsafe {
            libc::close(self.write.as_raw_fd());
            libc::close(self.read.as_raw_fd());
        }
    }
}

impl Drop for SelfPipe {
    fn drop(&mut self) {
        WAKE_FD.store(-1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_fifo() {
        let ring = SignalRing::new();
        assert!(ring.push(PoolSignal::Hup));
        assert!(ring.push(PoolSignal::Winch));
        assert!(ring.push(PoolSignal::Quit));
        assert_eq!(ring.pop(), Some(PoolSignal::Hup));
        assert_eq!(ring.pop(), Some(PoolSignal::Winch));
        assert_eq!(ring.pop(), Some(PoolSignal::Quit));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_ring_caps_at_five_and_counts_drops() {
        let ring = SignalRing::new();
        for _ in 0..SIGNAL_QUEUE_CAP {
            assert!(ring.push(PoolSignal::Hup));
        }
        assert!(!ring.push(PoolSignal::Term));
        assert!(!ring.push(PoolSignal::Term));
        assert_eq!(ring.len(), SIGNAL_QUEUE_CAP);
        assert_eq!(ring.take_dropped(), 2);
        assert_eq!(ring.take_dropped(), 0);
    }

    #[test]
    fn test_ring_reuses_slots_after_pop() {
        let ring = SignalRing::new();
        for round in 0..20 {
            let sig = if round % 2 == 0 {
                PoolSignal::Usr1
            } else {
                PoolSignal::Usr2
            };
            assert!(ring.push(sig));
            assert_eq!(ring.pop(), Some(sig));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_signal_round_trip() {
        for signal in PoolSignal::ALL {
            assert_eq!(PoolSignal::decode(signal.encode()), Some(signal));
            assert_eq!(
                PoolSignal::from_raw(signal.os_signal() as libc::c_int),
                Some(signal)
            );
        }
        assert_eq!(PoolSignal::decode(0), None);
        assert_eq!(PoolSignal::from_raw(libc::SIGPIPE), None);
    }

    #[test]
    fn test_self_pipe_wake_and_drain() {
        let pipe = SelfPipe::new().unwrap();
        assert!(!pipe.wait_readable(Duration::from_millis(10)).unwrap());
        wake();
        assert!(pipe.wait_readable(Duration::from_millis(1000)).unwrap());
        pipe.drain();
        assert!(!pipe.wait_readable(Duration::from_millis(10)).unwrap());
    }
}
